//! The per-pull-request harvest: from a listing line to a dataset instance.

use super::instance::Instance;
use super::ledger::Ledger;
use super::patch::{Language, PatchClassifier, ProjectOverride};
use super::problem::problem_statement;
use super::pull_request::PullRequest;
use super::stats::{HarvestCounts, HarvestStats};
use crate::Result;
use crate::collect::{ApiUrls, DIFF_MEDIA_TYPE, FetchStats, IdentityRotator, Progress, ProxyConfig, QuotaGate, ResilientFetcher, RetryPolicy, Transport};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use core::fmt::{Display, Formatter};
use ohno::IntoAppError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

const LOG_TARGET: &str = "   harvest";

/// How a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Already emitted or fetched by an earlier run, or a duplicate within this one.
    Skipped,
    Rejected(RejectReason),
    Emitted { with_tests: bool },
}

/// Why a pull request did not become an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not merged, not linked to an issue, or undated.
    Invalid,
    FetchFailed,
    TooRecent,
    NoPatch,
    NoProblemStatement,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Invalid => "not merged or not linked to an issue",
            Self::FetchFailed => "diff could not be fetched",
            Self::TooRecent => "created after the cutoff",
            Self::NoPatch => "no code changes",
            Self::NoProblemStatement => "no readable issue",
        })
    }
}

/// Knobs for a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub language: Language,
    pub overrides: Vec<ProjectOverride>,

    /// Pull requests created at or after this instant are rejected.
    pub cutoff: DateTime<Utc>,

    /// Units in flight at once.
    pub max_concurrency: usize,
    pub policy: RetryPolicy,
    pub proxy: Option<Arc<ProxyConfig>>,
}

#[derive(Debug)]
struct UnitContext {
    transport: Arc<dyn Transport>,
    api: ApiUrls,
    options: HarvestOptions,
    fetch_stats: Arc<FetchStats>,
}

/// Turns a JSONL listing of pull requests into dataset instances.
///
/// Each line becomes an independent unit running on its own task with its own
/// [`IdentityRotator`]. The [`Ledger`] is the only state units share. Reruns over the
/// same output skip every pull request whose diff was already fetched.
#[derive(Debug)]
pub struct HarvestPipeline {
    context: Arc<UnitContext>,
    stats: Arc<HarvestStats>,
}

impl HarvestPipeline {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, api: ApiUrls, options: HarvestOptions) -> Self {
        Self {
            context: Arc::new(UnitContext {
                transport,
                api,
                options,
                fetch_stats: Arc::new(FetchStats::default()),
            }),
            stats: Arc::new(HarvestStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<HarvestStats> {
        &self.stats
    }

    #[must_use]
    pub fn fetch_stats(&self) -> &Arc<FetchStats> {
        &self.context.fetch_stats
    }

    /// Harvest every pull request listed in `input` into `output` and `<output>.all`.
    ///
    /// Failing to open the input or the outputs is fatal. A line that cannot be decoded,
    /// and anything that goes wrong inside a unit, is logged and counted without
    /// affecting its siblings.
    pub async fn run(&self, input: &Utf8Path, output: &Utf8Path, progress: &dyn Progress) -> Result<HarvestCounts> {
        let file = File::open(input).into_app_err_with(|| format!("opening pull request list '{input}'"))?;
        let ledger = Arc::new(Ledger::open(output)?);
        let gate = QuotaGate::new(self.context.options.max_concurrency);

        progress.set_phase("Harvesting");
        let stats = Arc::clone(&self.stats);
        let status_gate = Arc::clone(&gate);
        progress.set_determinate(Box::new(move || {
            let counts = stats.snapshot();
            let message = status_gate
                .hold()
                .map_or_else(|| format!("{} emitted, {} with tests", counts.emitted, counts.with_tests), |hold| hold.describe());
            (counts.queued, counts.processed, message)
        }));

        let mut units = JoinSet::new();
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!(target: LOG_TARGET, "Stopped reading '{input}' at line {}: {e}", index + 1);
                    break;
                }
            };

            if line.trim_ascii().is_empty() {
                continue;
            }

            self.stats.record_queued();
            let Ok(line) = String::from_utf8(line) else {
                log::warn!(target: LOG_TARGET, "Line {} of '{input}' is not valid UTF-8", index + 1);
                self.stats.record_failure();
                continue;
            };

            let pull = match serde_json::from_str::<PullRequest>(&line) {
                Ok(pull) => pull,
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "Line {} of '{input}' is not a pull request: {e}", index + 1);
                    self.stats.record_failure();
                    continue;
                }
            };

            let permit = gate.acquire().await;
            let context = Arc::clone(&self.context);
            let ledger = Arc::clone(&ledger);
            let gate = Arc::clone(&gate);
            let _ = units.spawn(async move {
                let _permit = permit;
                let id = pull.instance_id();
                let outcome = harvest_unit(&context, &ledger, &gate, pull).await;
                (id, outcome)
            });

            while let Some(done) = units.try_join_next() {
                self.settle(done);
            }
        }

        while let Some(done) = units.join_next().await {
            self.settle(done);
        }

        let counts = self.stats.snapshot();
        log::info!(target: LOG_TARGET, "Harvest finished: {counts}");
        log::info!(target: LOG_TARGET, "Requests: {}", self.context.fetch_stats.snapshot());
        Ok(counts)
    }

    fn settle(&self, done: Result<(String, Result<UnitOutcome>), JoinError>) {
        match done {
            Ok((_, Ok(outcome))) => self.stats.record(outcome),
            Ok((id, Err(e))) => {
                log::error!(target: LOG_TARGET, "Could not harvest {id}: {e}");
                self.stats.record_failure();
            }
            Err(e) => {
                log::error!(target: LOG_TARGET, "A harvest task did not complete: {e}");
                self.stats.record_failure();
            }
        }
    }
}

async fn harvest_unit(context: &UnitContext, ledger: &Ledger, gate: &Arc<QuotaGate>, pull: PullRequest) -> Result<UnitOutcome> {
    let id = pull.instance_id();
    let options = &context.options;

    if !ledger.claim(&id).await {
        log::debug!(target: LOG_TARGET, "Skipping {id}, already harvested");
        return Ok(UnitOutcome::Skipped);
    }

    let created_at = match pull.created_at {
        Some(created_at) if pull.is_valid() => created_at,
        _ => return Ok(reject(&id, RejectReason::Invalid)),
    };

    let repo = pull.repo();
    let rotator = IdentityRotator::new(repo, options.proxy.clone()).starting_at(pull.number);
    let mut fetcher = ResilientFetcher::new(Arc::clone(&context.transport), rotator, options.policy)
        .with_stats(Arc::clone(&context.fetch_stats))
        .with_gate(Arc::clone(gate));

    let fetched = fetcher.fetch(&context.api.pull(repo, pull.number), DIFF_MEDIA_TYPE).await;
    let Some(diff) = fetched.body.filter(|diff| !diff.is_empty()) else {
        return Ok(reject(&id, RejectReason::FetchFailed));
    };

    let patch = PatchClassifier::for_repository(options.language, repo, &options.overrides).classify(&diff);
    ledger.record_fetch(&id).await?;

    if created_at >= options.cutoff {
        return Ok(reject(&id, RejectReason::TooRecent));
    }

    if patch.code_patch.is_empty() {
        return Ok(reject(&id, RejectReason::NoPatch));
    }

    let statement = problem_statement(&mut fetcher, &context.api, &pull).await;
    if statement.text.is_empty() {
        return Ok(reject(&id, RejectReason::NoProblemStatement));
    }

    let instance = Instance::new(&pull, created_at, patch.code_patch, patch.test_patch, statement.text, statement.hints);
    let with_tests = ledger.emit(&instance).await?;
    log::info!(target: LOG_TARGET, "Emitted {id}{}", if with_tests { " with tests" } else { "" });

    Ok(UnitOutcome::Emitted { with_tests })
}

fn reject(id: &str, reason: RejectReason) -> UnitOutcome {
    log::info!(target: LOG_TARGET, "Rejected {id}: {reason}");
    UnitOutcome::Rejected(reason)
}
