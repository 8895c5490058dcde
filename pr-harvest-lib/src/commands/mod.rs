//! Command-line interface and orchestration for pr-harvest
//!
//! This module parses the command line, sets up logging, configuration, and the HTTP
//! transport, and hands off to the listing and harvest passes in [`crate::dataset`].
//!
//! # Implementation Model
//!
//! ## Commands
//!
//! - **pulls**: List every closed pull request of one repository, resolve the issues
//!   each one closes, and append them to a JSONL file
//! - **build**: Read such a listing and turn every merged, issue-linked pull request
//!   into a dataset instance
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes to the
//! matching handler. Both handlers build a `Session` from the shared arguments, which
//! covers logging, the TOML configuration, the optional rotating proxy, and the progress
//! reporter. They then run their pass and print its counters.
//!
//! Configuration lives in `harvest.toml` (see `default_config.toml` for the embedded
//! defaults) and covers listing page sizes and per-project classifier overrides.

mod build;
mod common;
mod config;
mod host;
mod progress_reporter;
mod pulls;
mod run;

pub use build::{BuildArgs, build_dataset};
pub use common::{ColorMode, CommonArgs, LogLevel, ProxyArgs};
pub use config::{Config, DEFAULT_CONFIG_TOML, default_overrides};
pub use host::Host;
pub use progress_reporter::ProgressReporter;
pub use pulls::{PullsArgs, list_pulls};
pub use run::run;
