//! Resumable, concurrent listing of a repository's closed pull requests.
//!
//! [`ParallelPageCache`] learns the page count from the first page's `Link` header,
//! then fetches every page it does not already have concurrently, each page worker on
//! its own identity. Pages land in a [`PageCache`] directory as they arrive, so an
//! interrupted listing picks up where it stopped.

use super::client::{ApiUrls, JSON_MEDIA_TYPE, last_page_from_link, paged};
use super::fetcher::{ResilientFetcher, RetryPolicy};
use super::identity::{Identity, IdentityRotator, ProxyConfig};
use super::paginator::Paginator;
use super::path_utils::page_cache_dir;
use super::quota_gate::QuotaGate;
use super::stats::FetchStats;
use super::transport::Transport;
use crate::{HashMap, HashSet, Result};
use camino::{Utf8Path, Utf8PathBuf};
use futures_util::future::join_all;
use ohno::IntoAppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

const LOG_TARGET: &str = "     pages";

const META_FILE: &str = "meta.json";

/// Default number of items requested per page.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default number of pages fetched at once.
pub const DEFAULT_PAGE_WORKERS: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    total_pages: u32,
}

/// A directory of raw listing pages plus a `meta.json` with the page count.
///
/// Page files are only ever written after a successful fetch, through a temporary file
/// and a rename, so a file that exists is always complete.
#[derive(Debug, Clone)]
pub struct PageCache {
    dir: Utf8PathBuf,
}

impl PageCache {
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache for `repo` under `root`.
    #[must_use]
    pub fn for_repository(root: &Utf8Path, repo: &str) -> Self {
        Self::new(page_cache_dir(root, repo))
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    #[must_use]
    pub fn page_path(&self, page: u32) -> Utf8PathBuf {
        self.dir.join(format!("page_{page:04}.json"))
    }

    /// Page count recorded by an earlier run, if any.
    #[must_use]
    pub fn total_pages(&self) -> Option<u32> {
        let path = self.dir.join(META_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Meta>(&text) {
            Ok(meta) => Some(meta.total_pages),
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Ignoring unreadable '{path}': {e}");
                None
            }
        }
    }

    pub fn save_total_pages(&self, total_pages: u32) -> Result<()> {
        let text = serde_json::to_string(&Meta { total_pages })?;
        self.write_atomic(META_FILE, &text)
    }

    pub fn save_page(&self, page: u32, body: &str) -> Result<()> {
        self.write_atomic(&format!("page_{page:04}.json"), body)
    }

    #[must_use]
    pub fn load_page(&self, page: u32) -> Option<String> {
        fs::read_to_string(self.page_path(page)).ok()
    }

    /// Page numbers that already have a file in the cache.
    #[must_use]
    pub fn cached_pages(&self) -> HashSet<u32> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return HashSet::default();
        };

        entries
            .filter_map(core::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("page_")?.strip_suffix(".json")?.parse().ok()
            })
            .collect()
    }

    fn write_atomic(&self, name: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).into_app_err_with(|| format!("creating cache directory '{}'", self.dir))?;

        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        fs::write(&tmp, contents).into_app_err_with(|| format!("writing '{tmp}'"))?;
        fs::rename(&tmp, &target).into_app_err_with(|| format!("moving '{tmp}' into place"))?;
        Ok(())
    }
}

/// Lists every closed pull request of a repository, fetching pages concurrently.
#[derive(Debug, Clone)]
pub struct ParallelPageCache {
    transport: Arc<dyn Transport>,
    api: ApiUrls,
    proxy: Option<Arc<ProxyConfig>>,
    policy: RetryPolicy,
    stats: Arc<FetchStats>,
    per_page: u32,
    workers: usize,
    cache_root: Option<Utf8PathBuf>,
}

impl ParallelPageCache {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, api: ApiUrls) -> Self {
        Self {
            transport,
            api,
            proxy: None,
            policy: RetryPolicy::default(),
            stats: Arc::default(),
            per_page: DEFAULT_PER_PAGE,
            workers: DEFAULT_PAGE_WORKERS,
            cache_root: None,
        }
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<Arc<ProxyConfig>>) -> Self {
        self.proxy = proxy;
        self
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<FetchStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub const fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Persist pages under `root`; `None` keeps everything in memory.
    #[must_use]
    pub fn cache_root(mut self, root: Option<Utf8PathBuf>) -> Self {
        self.cache_root = root;
        self
    }

    /// All closed pull requests of `repo`, in listing order.
    pub async fn closed_pulls<T: DeserializeOwned>(&self, repo: &str) -> Vec<T> {
        let endpoint = self.api.closed_pulls(repo);
        let cache = self.cache_root.as_deref().map(|root| PageCache::for_repository(root, repo));
        let mut rotator = IdentityRotator::new(repo, self.proxy.clone());
        let mut bodies: HashMap<u32, String> = HashMap::default();

        let total = match cache.as_ref().and_then(PageCache::total_pages) {
            Some(total) => {
                log::info!(target: LOG_TARGET, "Resuming listing of {repo}: {total} page(s)");
                total
            }

            None => {
                let Some((total, first)) = self.discover(&endpoint, &mut rotator).await else {
                    log::warn!(target: LOG_TARGET, "Could not size the listing of {repo}, paging through it sequentially");
                    return self.sequential(repo, &endpoint, rotator).await;
                };

                if let Some(cache) = &cache {
                    self.persist(cache, 1, &first);
                    if let Err(e) = cache.save_total_pages(total) {
                        log::warn!(target: LOG_TARGET, "Could not record the page count of {repo}: {e:#}");
                    }
                }

                log::info!(target: LOG_TARGET, "Listing of {repo} has {total} page(s)");
                let _ = bodies.insert(1, first);
                total
            }
        };

        let cached = cache.as_ref().map(PageCache::cached_pages).unwrap_or_default();
        let missing: Vec<u32> = (1..=total).filter(|p| !cached.contains(p) && !bodies.contains_key(p)).collect();

        if !missing.is_empty() {
            log::info!(target: LOG_TARGET, "Fetching {} page(s) of {repo}", missing.len());

            let gate = QuotaGate::new(self.workers);
            let fetches = missing.iter().map(|&page| {
                let gate = Arc::clone(&gate);
                let identity = rotator.fork(u64::from(page));
                let endpoint = endpoint.as_str();
                let cache = cache.as_ref();
                async move {
                    let _permit = gate.acquire().await;
                    (page, self.fetch_page(endpoint, page, identity, cache).await)
                }
            });

            for (page, body) in join_all(fetches).await {
                if let Some(body) = body {
                    let _ = bodies.insert(page, body);
                }
            }
        }

        let mut items = Vec::new();
        for page in 1..=total {
            let body = bodies.remove(&page).or_else(|| cache.as_ref().and_then(|c| c.load_page(page)));
            let Some(body) = body else {
                log::warn!(target: LOG_TARGET, "Page {page} of {repo} is missing from the listing");
                continue;
            };

            match serde_json::from_str::<Vec<T>>(&body) {
                Ok(page_items) => items.extend(page_items),
                Err(e) => log::warn!(target: LOG_TARGET, "Page {page} of {repo} is malformed: {e}"),
            }
        }

        items
    }

    /// One plain request for page 1, returning the page count and the page itself.
    async fn discover(&self, endpoint: &str, rotator: &mut IdentityRotator) -> Option<(u32, String)> {
        let url = paged(endpoint, self.per_page, 1);

        rotator.record_request();
        let identity = rotator.current_identity();
        self.stats.record_request();

        let resp = match self.transport.get(&url, JSON_MEDIA_TYPE, identity.as_ref()).await {
            Ok(resp) => resp,
            Err(e) => {
                log::debug!(target: LOG_TARGET, "Sizing request failed: {e:#}");
                return None;
            }
        };

        if resp.status != 200 || !is_json_array(&resp.body) {
            log::debug!(target: LOG_TARGET, "Sizing request returned {}", resp.status);
            return None;
        }

        let total = resp.link().as_deref().and_then(last_page_from_link).unwrap_or(1).max(1);
        Some((total, resp.body))
    }

    async fn fetch_page(&self, endpoint: &str, page: u32, mut identity: Option<Identity>, cache: Option<&PageCache>) -> Option<String> {
        let url = paged(endpoint, self.per_page, page);
        let attempts = self.policy.page_attempts.max(1);

        for attempt in 1..=attempts {
            self.stats.record_request();

            match self.transport.get(&url, JSON_MEDIA_TYPE, identity.as_ref()).await {
                Ok(resp) if resp.status == 200 && is_json_array(&resp.body) => {
                    if let Some(cache) = cache {
                        self.persist(cache, page, &resp.body);
                    }
                    return Some(resp.body);
                }

                Ok(resp) => {
                    log::debug!(target: LOG_TARGET, "Page {page} returned {} (attempt {attempt}/{attempts})", resp.status);
                    if matches!(resp.status, 403 | 429)
                        && let Some(proxy) = &self.proxy
                    {
                        identity = Some(proxy.random_identity());
                        self.stats.record_rotation();
                    }
                }

                Err(e) => log::debug!(target: LOG_TARGET, "Page {page} failed (attempt {attempt}/{attempts}): {e:#}"),
            }

            if attempt < attempts {
                self.stats.record_retry();
                tokio::time::sleep(self.policy.page_retry_delay).await;
            }
        }

        self.stats.record_exhausted();
        log::warn!(target: LOG_TARGET, "Giving up on page {page} after {attempts} attempt(s)");
        None
    }

    async fn sequential<T: DeserializeOwned>(&self, repo: &str, endpoint: &str, rotator: IdentityRotator) -> Vec<T> {
        let mut fetcher =
            ResilientFetcher::new(Arc::clone(&self.transport), rotator, self.policy).with_stats(Arc::clone(&self.stats));
        let items = Paginator::new(&mut fetcher, &self.api, endpoint, self.per_page).collect_all().await;
        log::info!(target: LOG_TARGET, "Listed {} pull request(s) of {repo} sequentially", items.len());
        items
    }

    fn persist(&self, cache: &PageCache, page: u32, body: &str) {
        if let Err(e) = cache.save_page(page, body) {
            log::warn!(target: LOG_TARGET, "Could not cache page {page} in '{}': {e:#}", cache.dir());
        }
    }
}

fn is_json_array(body: &str) -> bool {
    matches!(serde_json::from_str::<serde_json::Value>(body), Ok(serde_json::Value::Array(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::transport::RawResponse;
    use crate::collect::transport::scripted::{ScriptedTransport, Step, ok, status};

    fn first_page(body: &str, last: u32) -> Step {
        Step::Respond(RawResponse::new(200, body).with_header(
            "link",
            &format!(r#"<http://api/repos/o/r/pulls?state=closed&per_page=2&page=2>; rel="next", <http://api/repos/o/r/pulls?state=closed&per_page=2&page={last}>; rel="last""#),
        ))
    }

    fn lister(transport: &Arc<ScriptedTransport>, root: Option<&Utf8Path>) -> ParallelPageCache {
        ParallelPageCache::new(Arc::clone(transport) as Arc<dyn Transport>, ApiUrls::new("http://api"))
            .with_policy(RetryPolicy::no_delay())
            .per_page(2)
            .workers(2)
            .cache_root(root.map(Utf8Path::to_path_buf))
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, root)
    }

    #[tokio::test]
    async fn fetches_all_pages_in_order_and_caches_them() {
        let (_tmp, root) = tempdir();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [first_page("[1, 2]", 3)])
                .route("&page=2", [ok("[3, 4]")])
                .route("&page=3", [ok("[5]")]),
        );

        let items: Vec<u32> = lister(&transport, Some(&root)).closed_pulls("o/r").await;
        assert_eq!(items, vec![1, 2, 3, 4, 5]);

        let cache = PageCache::for_repository(&root, "o/r");
        assert_eq!(cache.dir(), root.join(".prcache_o_r").as_path());
        assert_eq!(cache.total_pages(), Some(3));
        assert_eq!(cache.cached_pages().len(), 3);
        assert_eq!(cache.load_page(2).as_deref(), Some("[3, 4]"));
    }

    #[tokio::test]
    async fn resumes_from_cached_pages() {
        let (_tmp, root) = tempdir();
        let cache = PageCache::for_repository(&root, "o/r");
        cache.save_total_pages(3).unwrap();
        cache.save_page(1, "[1]").unwrap();
        cache.save_page(3, "[3]").unwrap();

        let transport = Arc::new(ScriptedTransport::new().route("&page=2", [ok("[2]")]));

        let items: Vec<u32> = lister(&transport, Some(&root)).closed_pulls("o/r").await;

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(transport.count("&page="), 1);
        assert_eq!(transport.count("&page=2"), 1);
    }

    #[tokio::test]
    async fn later_run_fills_gaps_without_duplicating_pages() {
        let (_tmp, root) = tempdir();
        let first_run = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [first_page("[1, 2]", 3)])
                .route("&page=2", [status(500)])
                .route("&page=3", [ok("[5]")]),
        );

        let partial: Vec<u32> = lister(&first_run, Some(&root)).closed_pulls("o/r").await;
        assert_eq!(partial, vec![1, 2, 5]);

        let second_run = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [status(500)])
                .route("&page=2", [ok("[3, 4]")])
                .route("&page=3", [status(500)]),
        );

        let items: Vec<u32> = lister(&second_run, Some(&root)).closed_pulls("o/r").await;

        assert_eq!(items, vec![1, 2, 3, 4, 5]);
        assert_eq!(second_run.count("&page=2"), 1);
        assert_eq!(second_run.count("&page=1"), 0);
        assert_eq!(second_run.count("&page=3"), 0);
        assert_eq!(PageCache::for_repository(&root, "o/r").cached_pages().len(), 3);
    }

    #[tokio::test]
    async fn single_page_listing_needs_one_request() {
        let transport = Arc::new(ScriptedTransport::new().route("&page=1", [ok("[9]")]));

        let items: Vec<u32> = lister(&transport, None).closed_pulls("o/r").await;

        assert_eq!(items, vec![9]);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn failed_page_contributes_nothing() {
        let (_tmp, root) = tempdir();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [first_page("[1]", 3)])
                .route("&page=2", [status(500)])
                .route("&page=3", [ok("[3]")]),
        );

        let items: Vec<u32> = lister(&transport, Some(&root)).closed_pulls("o/r").await;

        assert_eq!(items, vec![1, 3]);
        assert_eq!(transport.count("&page=2"), 3);

        let cache = PageCache::for_repository(&root, "o/r");
        assert!(!cache.page_path(2).exists());
        assert!(cache.page_path(3).exists());
    }

    #[tokio::test]
    async fn refused_page_switches_to_random_identity() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [first_page("[1]", 2)])
                .route("&page=2", [status(429), ok("[2]")]),
        );
        let proxy = Arc::new(ProxyConfig {
            host: "proxy.local".to_string(),
            password: "pw".to_string(),
            port: 8080,
            country: "us".to_string(),
            use_session: true,
            max_requests_per_identity: 50,
        });

        let items: Vec<u32> = lister(&transport, None).with_proxy(Some(proxy)).closed_pulls("o/r").await;
        assert_eq!(items, vec![1, 2]);

        let sessions: Vec<_> = transport
            .seen()
            .into_iter()
            .filter(|s| s.url.contains("&page=2"))
            .map(|s| s.session.unwrap())
            .collect();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
    }

    #[tokio::test]
    async fn sizing_failure_falls_back_to_sequential_paging() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("&page=1", [status(502), ok("[1, 2]")])
                .route("&page=2", [ok("[3]")])
                .route("&page=3", [ok("[]")]),
        );

        let items: Vec<u32> = lister(&transport, None).closed_pulls("o/r").await;
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn cached_pages_ignores_foreign_files() {
        let (_tmp, root) = tempdir();
        let cache = PageCache::new(root.join("c"));
        cache.save_page(12, "[]").unwrap();
        cache.save_total_pages(12).unwrap();
        fs::write(cache.dir().join("notes.txt"), "x").unwrap();
        fs::write(cache.dir().join("page_xx.json"), "[]").unwrap();

        let pages = cache.cached_pages();
        assert_eq!(pages.len(), 1);
        assert!(pages.contains(&12));
        assert!(cache.page_path(12).as_str().ends_with("page_0012.json"));
    }

    #[test]
    fn unreadable_meta_is_ignored() {
        let (_tmp, root) = tempdir();
        let cache = PageCache::new(root.clone());
        fs::write(root.join(META_FILE), "{").unwrap();
        assert_eq!(cache.total_pages(), None);
    }
}
