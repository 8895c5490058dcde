//! The listing pass: every closed pull request of a repository, linked to its issues.

use super::ledger::append_line;
use super::pull_request::PullRequest;
use super::resolved_issues::resolve_issues;
use super::stats::{ListingCounts, ListingStats};
use crate::collect::{ApiUrls, FetchStats, IdentityRotator, ParallelPageCache, Progress, ProxyConfig, QuotaGate, ResilientFetcher, RetryPolicy, Transport};
use crate::{HashSet, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ohno::IntoAppError;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

const LOG_TARGET: &str = "   listing";

/// Knobs for a listing run.
#[derive(Debug, Clone)]
pub struct ListingOptions {
    pub per_page: u32,
    pub page_workers: usize,

    /// Pull requests whose issues are resolved at once.
    pub workers: usize,
    pub policy: RetryPolicy,
    pub proxy: Option<Arc<ProxyConfig>>,

    /// Where listing pages are cached; `None` disables the cache.
    pub cache_root: Option<Utf8PathBuf>,
}

#[derive(Deserialize)]
struct ListedNumber {
    number: u64,
}

/// Produces the JSONL listing that a harvest consumes.
///
/// Closed pull requests come from a [`ParallelPageCache`]. Those already present in the
/// output are left alone; each of the others gets its `resolved_issues` filled in and is
/// appended as one line.
#[derive(Debug)]
pub struct ListingPass {
    transport: Arc<dyn Transport>,
    api: ApiUrls,
    options: ListingOptions,
    stats: Arc<ListingStats>,
    fetch_stats: Arc<FetchStats>,
}

impl ListingPass {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, api: ApiUrls, options: ListingOptions) -> Self {
        Self {
            transport,
            api,
            options,
            stats: Arc::new(ListingStats::default()),
            fetch_stats: Arc::new(FetchStats::default()),
        }
    }

    #[must_use]
    pub fn fetch_stats(&self) -> &Arc<FetchStats> {
        &self.fetch_stats
    }

    /// List the closed pull requests of `repo` into `output`.
    pub async fn run(&self, repo: &str, output: &Utf8Path, progress: &dyn Progress) -> Result<ListingCounts> {
        let existing = listed_numbers(output)?;

        progress.set_phase("Listing");
        progress.set_indeterminate(Box::new({
            let repo = repo.to_string();
            move || format!("closed pull requests of {repo}")
        }));

        let pulls: Vec<PullRequest> = ParallelPageCache::new(Arc::clone(&self.transport), self.api.clone())
            .with_proxy(self.options.proxy.clone())
            .with_policy(self.options.policy)
            .with_stats(Arc::clone(&self.fetch_stats))
            .per_page(self.options.per_page)
            .workers(self.options.page_workers)
            .cache_root(self.options.cache_root.clone())
            .closed_pulls(repo)
            .await;

        let listed = pulls.len();
        let pending: Vec<PullRequest> = pulls.into_iter().filter(|pull| !existing.contains(&pull.number)).collect();
        self.stats.record_listed(listed as u64, (listed - pending.len()) as u64);
        log::info!(target: LOG_TARGET, "{listed} closed pull request(s) in {repo}, {} new", pending.len());

        if pending.is_empty() {
            return Ok(self.stats.snapshot());
        }

        let sink = Arc::new(Mutex::new(open_output(output)?));
        let gate = QuotaGate::new(self.options.workers);
        let total = pending.len() as u64;

        progress.set_phase("Linking");
        let stats = Arc::clone(&self.stats);
        let status_gate = Arc::clone(&gate);
        progress.set_determinate(Box::new(move || {
            let counts = stats.snapshot();
            let message = status_gate.hold().map_or_else(|| format!("{} linked to issues", counts.linked), |hold| hold.describe());
            (total, counts.written + counts.failed, message)
        }));

        let mut workers = JoinSet::new();
        for mut pull in pending {
            let permit = gate.acquire().await;
            let transport = Arc::clone(&self.transport);
            let api = self.api.clone();
            let proxy = self.options.proxy.clone();
            let policy = self.options.policy;
            let fetch_stats = Arc::clone(&self.fetch_stats);
            let gate = Arc::clone(&gate);
            let sink = Arc::clone(&sink);
            let repo = repo.to_string();

            let _ = workers.spawn(async move {
                let _permit = permit;
                let mut rotator = IdentityRotator::new(&repo, proxy);
                rotator.randomize();
                let mut fetcher = ResilientFetcher::new(transport, rotator, policy)
                    .with_stats(fetch_stats)
                    .with_gate(gate);

                pull.resolved_issues = resolve_issues(&mut fetcher, &api, &pull).await;
                let line = serde_json::to_string(&pull).into_app_err_with(|| format!("serializing {repo}#{}", pull.number))?;

                let mut sink = sink.lock().await;
                append_line(&mut sink, line).into_app_err("appending to the listing")?;
                sink.flush().into_app_err("flushing the listing")?;
                Ok::<bool, ohno::AppError>(!pull.resolved_issues.is_empty())
            });
        }

        while let Some(done) = workers.join_next().await {
            match done {
                Ok(Ok(linked)) => self.stats.record_written(linked),
                Ok(Err(e)) => {
                    log::error!(target: LOG_TARGET, "Could not list a pull request: {e}");
                    self.stats.record_failure();
                }
                Err(e) => {
                    log::error!(target: LOG_TARGET, "A listing task did not complete: {e}");
                    self.stats.record_failure();
                }
            }
        }

        let counts = self.stats.snapshot();
        log::info!(target: LOG_TARGET, "Listing finished: {counts}");
        log::info!(target: LOG_TARGET, "Requests: {}", self.fetch_stats.snapshot());
        Ok(counts)
    }
}

fn open_output(output: &Utf8Path) -> Result<File> {
    if let Some(parent) = output.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent).into_app_err_with(|| format!("creating output directory '{parent}'"))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .into_app_err_with(|| format!("opening '{output}' for appending"))
}

/// Pull request numbers already written to `output`.
fn listed_numbers(output: &Utf8Path) -> Result<HashSet<u64>> {
    let mut numbers = HashSet::default();
    let file = match File::open(output) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(numbers),
        Err(e) => return Err(e).into_app_err_with(|| format!("reading '{output}'")),
    };

    for line in BufReader::new(file).lines() {
        let line = line.into_app_err_with(|| format!("reading '{output}'"))?;
        if let Ok(listed) = serde_json::from_str::<ListedNumber>(&line) {
            let _ = numbers.insert(listed.number);
        }
    }

    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::scripted::{ScriptedTransport, ok};

    #[derive(Debug)]
    struct NoOpProgress;

    impl Progress for NoOpProgress {
        fn set_phase(&self, _phase: &str) {}
        fn set_determinate(&self, _callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {}
        fn set_indeterminate(&self, _callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {}
        fn println(&self, _msg: &str) {}
        fn done(&self) {}
    }

    fn listed(number: u64, body: &str) -> String {
        format!(r#"{{"number": {number}, "title": "PR {number}", "body": "{body}", "state": "closed", "base": {{"sha": "s", "repo": {{"full_name": "o/r"}}}}}}"#)
    }

    fn transport() -> ScriptedTransport {
        let page = format!("[{}, {}]", listed(1, "Fixes #10"), listed(2, "no link"));
        ScriptedTransport::new()
            .route("/repos/o/r/pulls?state=closed", [ok(&page)])
            .route("/pulls/1/commits", [ok("[]")])
            .route("/pulls/2/commits", [ok(r#"[{"commit": {"message": "closes #20"}}]"#), ok("[]")])
    }

    fn pass(transport: &Arc<ScriptedTransport>, cache_root: Option<Utf8PathBuf>) -> ListingPass {
        ListingPass::new(
            Arc::clone(transport) as Arc<dyn Transport>,
            ApiUrls::new("http://api"),
            ListingOptions {
                per_page: 100,
                page_workers: 2,
                workers: 2,
                policy: RetryPolicy::no_delay(),
                proxy: None,
                cache_root,
            },
        )
    }

    fn root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[tokio::test]
    async fn writes_every_pull_request_with_its_issues() {
        let dir = tempfile::tempdir().unwrap();
        let output = root(&dir).join("prs.jsonl");
        let transport = Arc::new(transport());

        let counts = pass(&transport, None).run("o/r", &output, &NoOpProgress).await.unwrap();
        assert_eq!(counts.listed, 2);
        assert_eq!(counts.written, 2);
        assert_eq!(counts.linked, 2);

        let mut pulls: Vec<PullRequest> = fs::read_to_string(&output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        pulls.sort_by_key(|pull| pull.number);

        assert_eq!(pulls[0].resolved_issues, vec!["10"]);
        assert_eq!(pulls[1].resolved_issues, vec!["20"]);
        assert_eq!(pulls[1].extra["state"], "closed");
    }

    #[tokio::test]
    async fn already_listed_numbers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let output = root(&dir).join("prs.jsonl");
        fs::write(&output, format!("{}\n", listed(1, "Fixes #10"))).unwrap();
        let transport = Arc::new(transport());

        let counts = pass(&transport, None).run("o/r", &output, &NoOpProgress).await.unwrap();

        assert_eq!(counts.already_present, 1);
        assert_eq!(counts.written, 1);
        assert_eq!(transport.count("/pulls/1/commits"), 0);
        assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn listing_pages_are_cached_beside_the_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = root(&dir);
        let output = root.join("prs.jsonl");
        let transport = Arc::new(transport());

        let _ = pass(&transport, Some(root.clone())).run("o/r", &output, &NoOpProgress).await.unwrap();

        assert!(root.join(".prcache_o_r").join("page_0001.json").exists());
    }

    #[tokio::test]
    async fn nothing_new_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let output = root(&dir).join("prs.jsonl");
        let transport = Arc::new(ScriptedTransport::new().route("/repos/o/r/pulls?state=closed", [ok("[]")]));

        let counts = pass(&transport, None).run("o/r", &output, &NoOpProgress).await.unwrap();

        assert_eq!(counts.listed, 0);
        assert!(!output.exists());
    }
}
