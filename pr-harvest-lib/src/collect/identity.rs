//! Rotating proxy identities.
//!
//! Every concurrent unit of work owns an [`IdentityRotator`]. The rotator hands out the
//! proxy session to use for the next request and moves to a fresh session once the
//! current one has served enough requests, or when the caller reports that the remote
//! side has started refusing it.

use core::fmt::{Display, Formatter};
use rand::Rng;
use std::sync::{Arc, LazyLock};

const LOG_TARGET: &str = "  identity";

/// Session ids are rendered as 8 decimal digits.
const SESSION_SPACE: u64 = 100_000_000;

/// Salt multiplier used when deriving sibling identities for page workers.
const FORK_STRIDE: u64 = 7;

/// Offset mixed into every session id so two runs over the same repository do not
/// replay the same sequence of sessions.
static PROCESS_OFFSET: LazyLock<u64> = LazyLock::new(|| rand::thread_rng().gen_range(0..1_000_000));

/// Proxy endpoint parameters shared by all rotators of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub password: String,
    pub port: u16,
    pub country: String,
    pub use_session: bool,
    pub max_requests_per_identity: u32,
}

impl ProxyConfig {
    /// Build the identity for a specific session id.
    #[must_use]
    pub fn identity(&self, session: u64) -> Identity {
        let session_id = format!("{:08}", session % SESSION_SPACE);
        let user = if self.use_session {
            format!("proxy-cot-{}-sid-{session_id}", self.country)
        } else {
            "proxy".to_string()
        };

        Identity {
            proxy_url: format!("http://{user}:{}@{}:{}", self.password, self.host, self.port),
            session_id,
        }
    }

    /// Build an identity with a brand-new random session.
    #[must_use]
    pub fn random_identity(&self) -> Identity {
        self.identity(random_session())
    }
}

/// A network egress identity: one proxy session.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    session_id: String,
    proxy_url: String,
}

impl Identity {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn proxy_url(&self) -> &str {
        &self.proxy_url
    }
}

// The proxy URL embeds the password, keep it out of logs.
impl core::fmt::Debug for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Identity")
            .field("session_id", &self.session_id)
            .field("proxy_url", &"<redacted>")
            .finish()
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "session {}", self.session_id)
    }
}

/// Tracks the identity used by one unit of work and decides when to rotate it.
///
/// Without a [`ProxyConfig`] the rotator is disabled: it never yields an identity and
/// every rotation request is a no-op.
#[derive(Debug, Clone)]
pub struct IdentityRotator {
    config: Option<Arc<ProxyConfig>>,
    label: Arc<str>,
    base_hash: u64,
    session: Option<u64>,
    request_count: u32,
    rotation_count: u64,
}

impl IdentityRotator {
    /// Create a rotator for the given repository. The repository name seeds the
    /// sequence of sessions.
    #[must_use]
    pub fn new(repo: &str, config: Option<Arc<ProxyConfig>>) -> Self {
        let digest = md5::compute(repo.as_bytes());
        let base_hash = u128::from_be_bytes(digest.0) % u128::from(SESSION_SPACE);

        Self {
            config,
            label: Arc::from(repo),
            base_hash: u64::try_from(base_hash).unwrap_or_default(),
            session: None,
            request_count: 0,
            rotation_count: 0,
        }
    }

    /// Create a disabled rotator.
    #[must_use]
    pub fn disabled(repo: &str) -> Self {
        Self::new(repo, None)
    }

    /// Start the rotation sequence at `index` instead of zero, so that sibling units
    /// working on the same repository begin on different sessions.
    #[must_use]
    pub fn starting_at(mut self, index: u64) -> Self {
        self.rotation_count = index;
        self
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    #[must_use]
    pub fn config(&self) -> Option<&Arc<ProxyConfig>> {
        self.config.as_ref()
    }

    #[must_use]
    pub const fn request_count(&self) -> u32 {
        self.request_count
    }

    #[must_use]
    pub const fn rotation_count(&self) -> u64 {
        self.rotation_count
    }

    /// The identity to use for the next request, establishing a session if the
    /// previous one was discarded.
    pub fn current_identity(&mut self) -> Option<Identity> {
        let config = self.config.as_ref()?;

        let session = match self.session {
            Some(session) => session,
            None => {
                let session = (self.base_hash + self.rotation_count + *PROCESS_OFFSET) % SESSION_SPACE;
                log::debug!(target: LOG_TARGET, "[{}] New session {session:08} (rotation #{})", self.label, self.rotation_count);
                self.session = Some(session);
                session
            }
        };

        Some(config.identity(session))
    }

    /// Account for one request about to be issued, rotating first if the current
    /// session has already served its quota.
    pub fn record_request(&mut self) {
        let Some(config) = &self.config else {
            return;
        };

        if self.request_count >= config.max_requests_per_identity {
            self.rotate();
            log::info!(target: LOG_TARGET, "[{}] Rotating to a new identity (rotation #{})", self.label, self.rotation_count);
        }

        self.request_count += 1;
    }

    /// Discard the current session immediately, typically after the remote side
    /// refused it.
    pub fn force_rotate(&mut self) {
        if self.config.is_some() {
            self.rotate();
            log::debug!(target: LOG_TARGET, "[{}] Forced rotation (rotation #{})", self.label, self.rotation_count);
        }
    }

    /// Abandon the deterministic sequence and adopt a random session.
    pub fn randomize(&mut self) {
        if self.config.is_some() {
            self.session = Some(random_session());
            self.request_count = 0;
            self.rotation_count = 0;
        }
    }

    /// Derive a sibling identity for an independent worker: `(session + salt * 7) mod 10^8`.
    #[must_use]
    pub fn fork(&self, salt: u64) -> Option<Identity> {
        let config = self.config.as_ref()?;
        let parent = self.session.unwrap_or(0);
        Some(config.identity((parent + salt.wrapping_mul(FORK_STRIDE)) % SESSION_SPACE))
    }

    const fn rotate(&mut self) {
        self.rotation_count += 1;
        self.request_count = 0;
        self.session = None;
    }
}

fn random_session() -> u64 {
    rand::thread_rng().gen_range(10_000_000..SESSION_SPACE)
}
