//! Turning pull requests into dataset instances
//!
//! A run has two passes. The listing pass ([`ListingPass`]) enumerates the closed pull
//! requests of a repository and links each one to the issues it closes. The harvest
//! pass ([`HarvestPipeline`]) reads that listing and, for every merged pull request
//! that closes an issue, fetches its diff, splits it into a code patch and a test patch,
//! and gathers a problem statement and hints from the linked issues.
//!
//! # Outputs
//!
//! Instances are appended as JSON lines. `<output>.all` holds every instance, and
//! `<output>` only those with a non-blank test patch. `successful_requests.txt` beside
//! them lists every pull request whose diff was fetched. The [`Ledger`] replays all
//! three on startup so an interrupted run picks up where it stopped.

mod instance;
mod ledger;
mod listing;
mod patch;
mod pipeline;
mod problem;
mod pull_request;
mod resolved_issues;
mod stats;

pub use instance::Instance;
pub use ledger::Ledger;
pub use listing::{ListingOptions, ListingPass};
pub use patch::{ClassifiedPatch, Language, PatchClassifier, ProjectOverride};
pub use pipeline::{HarvestOptions, HarvestPipeline, RejectReason, UnitOutcome};
pub use problem::{HINT_SEPARATOR, ProblemStatement, problem_statement};
pub use pull_request::{BaseRef, BaseRepo, PullRequest};
pub use resolved_issues::{closing_references, reference_text, resolve_issues};
pub use stats::{HarvestCounts, HarvestStats, ListingCounts, ListingStats};
