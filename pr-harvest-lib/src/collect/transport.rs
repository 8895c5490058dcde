//! Single-attempt HTTP access.
//!
//! [`Transport`] issues exactly one GET and reports what came back; retries, backoff, and
//! identity rotation live one layer up in the fetcher. Keeping the seam this narrow lets
//! tests script responses without a network.

use super::client::{extract_rate_limit_from_headers, link_header, parse_retry_after, remaining_quota, RateLimitInfo};
use super::identity::Identity;
use crate::{HashMap, Result};
use core::time::Duration;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use ohno::IntoAppError;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the number of proxied clients kept alive at once.
const MAX_PROXY_CLIENTS: usize = 256;

const USER_AGENT: &str = concat!("pr-harvest/", env!("CARGO_PKG_VERSION"));

/// The canonical view of one HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header, ignoring values that are not valid header text.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            let _ = self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        extract_rate_limit_from_headers(&self.headers)
    }

    #[must_use]
    pub fn remaining_quota(&self) -> Option<usize> {
        remaining_quota(&self.headers)
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(&self.headers)
    }

    #[must_use]
    pub fn link(&self) -> Option<String> {
        link_header(&self.headers)
    }
}

/// Issues one GET request, optionally through a proxy identity.
///
/// Transport failures (connection refused, timeouts, broken bodies) are reported as
/// errors; every HTTP status, successful or not, is a `RawResponse`.
pub trait Transport: Send + Sync + core::fmt::Debug {
    fn get<'a>(&'a self, url: &'a str, accept: &'a str, identity: Option<&'a Identity>) -> BoxFuture<'a, Result<RawResponse>>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug)]
pub struct HttpTransport {
    direct: reqwest::Client,
    default_headers: HeaderMap,
    proxied: Mutex<ProxyClients<reqwest::Client>>,
}

/// Clients keyed by proxy URL. Once full, the oldest entry makes room for a new one.
#[derive(Debug)]
struct ProxyClients<C> {
    capacity: usize,
    clients: HashMap<String, C>,
    order: VecDeque<String>,
}

impl<C: Clone> ProxyClients<C> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clients: HashMap::default(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, proxy_url: &str) -> Option<C> {
        self.clients.get(proxy_url).cloned()
    }

    fn insert(&mut self, proxy_url: &str, client: C) {
        if self.clients.insert(proxy_url.to_string(), client).is_none() {
            self.order.push_back(proxy_url.to_string());
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.clients.remove(&oldest);
            }
        }
    }
}

impl HttpTransport {
    /// Create a transport with an optional API token sent on every request.
    pub fn new(token: Option<&str>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("token {t}"))?;
            auth_val.set_sensitive(true);
            let _ = default_headers.insert(AUTHORIZATION, auth_val);
        }

        Ok(Self {
            direct: Self::builder(&default_headers).build()?,
            default_headers,
            proxied: Mutex::new(ProxyClients::new(MAX_PROXY_CLIENTS)),
        })
    }

    fn builder(headers: &HeaderMap) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers.clone())
            .timeout(REQUEST_TIMEOUT)
    }

    fn client_for(&self, identity: Option<&Identity>) -> Result<reqwest::Client> {
        let Some(identity) = identity else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(identity.proxy_url()) {
            return Ok(client);
        }

        let proxy = reqwest::Proxy::all(identity.proxy_url()).into_app_err_with(|| format!("configuring proxy for {identity}"))?;
        let client = Self::builder(&self.default_headers).proxy(proxy).build()?;
        clients.insert(identity.proxy_url(), client.clone());
        Ok(client)
    }

    async fn send(&self, url: &str, accept: &str, identity: Option<&Identity>) -> Result<RawResponse> {
        let client = self.client_for(identity)?;

        let resp = client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .await
            .into_app_err_with(|| format!("requesting '{url}'"))?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await.into_app_err_with(|| format!("reading response body of '{url}'"))?;

        Ok(RawResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a str, accept: &'a str, identity: Option<&'a Identity>) -> BoxFuture<'a, Result<RawResponse>> {
        self.send(url, accept, identity).boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_header_helpers() {
        let resp = RawResponse::new(429, "")
            .with_header("retry-after", "5")
            .with_header("x-ratelimit-remaining", "0")
            .with_header("x-ratelimit-reset", "1700000000")
            .with_header("link", r#"<http://x/?page=3>; rel="last""#);

        assert_eq!(resp.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(resp.remaining_quota(), Some(0));
        assert_eq!(resp.rate_limit().unwrap().reset_at.timestamp(), 1_700_000_000);
        assert!(resp.link().unwrap().contains("page=3"));
    }

    #[test]
    fn http_transport_accepts_token() {
        let transport = HttpTransport::new(Some("abc123")).unwrap();
        let auth = transport.default_headers.get(AUTHORIZATION).unwrap();
        assert!(auth.is_sensitive());
        assert_eq!(auth.to_str().unwrap(), "token abc123");
    }

    #[test]
    fn http_transport_caches_proxied_clients() {
        let transport = HttpTransport::new(None).unwrap();
        let config = crate::collect::identity::ProxyConfig {
            host: "127.0.0.1".to_string(),
            password: "pw".to_string(),
            port: 9,
            country: "us".to_string(),
            use_session: true,
            max_requests_per_identity: 50,
        };
        let identity = config.identity(1);

        let _ = transport.client_for(Some(&identity)).unwrap();
        let _ = transport.client_for(Some(&identity)).unwrap();
        let _ = transport.client_for(None).unwrap();

        assert_eq!(transport.proxied.lock().unwrap().clients.len(), 1);
    }

    #[test]
    fn full_proxy_cache_evicts_the_oldest_client() {
        let mut clients = ProxyClients::new(2);
        clients.insert("http://a", 1);
        clients.insert("http://b", 2);
        clients.insert("http://a", 10);
        clients.insert("http://c", 3);

        assert_eq!(clients.get("http://a"), None);
        assert_eq!(clients.get("http://b"), Some(2));
        assert_eq!(clients.get("http://c"), Some(3));
        assert_eq!(clients.clients.len(), 2);
        assert_eq!(clients.order.len(), 2);
    }
}
