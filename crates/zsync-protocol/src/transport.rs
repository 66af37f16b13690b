//! HTTP transport
//!
//! A single pooled `reqwest` client shared by control-file resolution,
//! probing and range downloads. Redirects are always followed; range
//! support is a property of the final host.

use crate::error::Result;
use reqwest::{Client, ClientBuilder, Proxy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// HTTP transport client with connection pooling
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Create a client with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone());

        // No overall timeout by default; large range bodies can take a while
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        let client = builder.build()?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Connection pool idle timeout
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Whole-request timeout, none by default
    pub request_timeout: Option<Duration>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Redirect hops followed before giving up
    pub max_redirects: usize,

    /// User agent header
    pub user_agent: String,

    /// Proxy for all requests
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 16,
            request_timeout: None,
            connect_timeout: Duration::from_secs(15),
            max_redirects: 10,
            user_agent: concat!("zsync-protocol/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
        }
    }
}

impl HttpConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            pool_idle_timeout: defaults.pool_idle_timeout,
            pool_max_idle_per_host: std::env::var("ZSYNC_POOL_MAX_IDLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_max_idle_per_host),
            request_timeout: std::env::var("ZSYNC_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            connect_timeout: std::env::var("ZSYNC_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.connect_timeout, Duration::from_secs),
            max_redirects: std::env::var("ZSYNC_MAX_REDIRECTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_redirects),
            user_agent: std::env::var("ZSYNC_USER_AGENT").unwrap_or(defaults.user_agent),
            proxy: std::env::var("ZSYNC_PROXY").ok().filter(|p| !p.is_empty()),
        })
    }
}
