//! Arguments and setup shared by every command.

use super::ProgressReporter;
use super::config::Config;
use crate::Result;
use crate::collect::{ApiUrls, DEFAULT_API_URL, HttpTransport, JSON_MEDIA_TYPE, ProxyConfig, Transport};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Args, ValueEnum};
use core::time::Duration;
use std::io::IsTerminal;
use std::sync::Arc;

const LOG_TARGET: &str = "   session";

/// How long a run must last before the progress indicator appears.
const PROGRESS_DELAY: Duration = Duration::from_millis(300);

/// Effectively never, for runs that log to stderr instead.
const PROGRESS_DELAY_WHILE_LOGGING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if stderr is a terminal, otherwise don't use colors
    Auto,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Rotating proxy settings
#[derive(Args, Debug, Clone)]
pub struct ProxyArgs {
    /// Proxy gateway host; requests go out directly when unset
    #[arg(long = "proxy-host", value_name = "HOST", env = "PR_HARVEST_PROXY_HOST", help_heading = "Proxy")]
    pub host: Option<String>,

    /// Proxy gateway password
    #[arg(
        long = "proxy-password",
        value_name = "PASSWORD",
        env = "PR_HARVEST_PROXY_PASSWORD",
        hide_env_values = true,
        help_heading = "Proxy"
    )]
    pub password: Option<String>,

    /// Proxy gateway port
    #[arg(long = "proxy-port", value_name = "PORT", env = "PR_HARVEST_PROXY_PORT", default_value_t = 8080, help_heading = "Proxy")]
    pub port: u16,

    /// Country code requested from the proxy pool
    #[arg(long = "proxy-country", value_name = "CODE", env = "PR_HARVEST_PROXY_COUNTRY", default_value = "us", help_heading = "Proxy")]
    pub country: String,

    /// Pin each identity to a proxy session
    #[arg(
        long = "proxy-use-session",
        value_name = "BOOL",
        env = "PR_HARVEST_PROXY_USE_SESSION",
        default_value_t = true,
        action = ArgAction::Set,
        help_heading = "Proxy"
    )]
    pub use_session: bool,

    /// Requests served by one identity before it is rotated
    #[arg(
        long = "proxy-max-requests",
        value_name = "COUNT",
        env = "PR_HARVEST_PROXY_MAX_REQUESTS",
        default_value_t = 50,
        help_heading = "Proxy"
    )]
    pub max_requests: u32,

    /// Ignore any proxy settings and connect directly
    #[arg(long, help_heading = "Proxy")]
    pub no_proxy: bool,
}

impl ProxyArgs {
    /// The proxy to rotate through, if one is configured.
    #[must_use]
    pub fn config(&self) -> Option<Arc<ProxyConfig>> {
        if self.no_proxy {
            return None;
        }

        let host = self.host.as_deref().filter(|h| !h.trim().is_empty())?;
        if self.password.is_none() {
            log::warn!(target: LOG_TARGET, "Proxy host is set without a password");
        }

        Some(Arc::new(ProxyConfig {
            host: host.to_string(),
            password: self.password.clone().unwrap_or_default(),
            port: self.port,
            country: self.country.clone(),
            use_session: self.use_session,
            max_requests_per_identity: self.max_requests.max(1),
        }))
    }
}

/// Arguments shared by all commands
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the GitHub-compatible REST API
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,

    #[command(flatten)]
    pub proxy: ProxyArgs,
}

/// Everything a command needs to talk to the API.
#[derive(Debug)]
pub struct Session {
    pub config: Config,
    pub api: ApiUrls,
    pub transport: Arc<dyn Transport>,
    pub proxy: Option<Arc<ProxyConfig>>,
    pub progress: ProgressReporter,
}

impl Session {
    /// Set up logging, load the configuration, and check the token.
    pub async fn new(args: &CommonArgs) -> Result<Self> {
        init_logging(args.log_level);

        let config = Config::load(Utf8Path::new("."), args.config.as_deref())?;
        let api = ApiUrls::new(args.api_url.as_str());
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(args.token.as_deref())?);
        check_token(transport.as_ref(), &api, args.token.is_some()).await;

        let proxy = args.proxy.config();
        if let Some(proxy) = &proxy {
            log::info!(target: LOG_TARGET, "Rotating identities through {}:{}", proxy.host, proxy.port);
        }

        let delay = if args.log_level == LogLevel::None {
            PROGRESS_DELAY
        } else {
            PROGRESS_DELAY_WHILE_LOGGING
        };

        let use_colors = match args.color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stderr().is_terminal(),
        };

        Ok(Self {
            config,
            api,
            transport,
            proxy,
            progress: ProgressReporter::new(delay, use_colors),
        })
    }
}

/// Initialize logger based on log level
fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // A second command in the same process keeps the first logger.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}

/// Warn early when requests are going to be anonymous or rejected.
async fn check_token(transport: &dyn Transport, api: &ApiUrls, has_token: bool) {
    if !has_token {
        log::warn!(target: LOG_TARGET, "No API token given, requests are subject to the anonymous rate limit");
        return;
    }

    match transport.get(&api.user(), JSON_MEDIA_TYPE, None).await {
        Ok(resp) if resp.status == 200 => log::debug!(target: LOG_TARGET, "API token accepted"),
        Ok(resp) => log::warn!(target: LOG_TARGET, "API token check returned {}, continuing anyway", resp.status),
        Err(e) => log::warn!(target: LOG_TARGET, "Could not check the API token: {e:#}"),
    }
}
