//! Centralized HTTP client configuration and building.
//!
//! Every outbound call in the workspace (provider replay, broker uploads)
//! goes through a client built here, so timeouts and identification are
//! configured in one place.

use crate::PlatformError;
use reqwest::{Client, ClientBuilder, redirect};
use std::time::Duration;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout (default: 30s)
    pub timeout: Duration,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Whether redirects are followed (default: false)
    pub follow_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("pact-engine/", env!("CARGO_PKG_VERSION")).to_string(),
            follow_redirects: false,
        }
    }
}

impl HttpConfig {
    /// Create a new HTTP config with custom timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a new HTTP config with custom connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create a new HTTP config with custom user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Follow redirects instead of returning the 3xx response as-is.
    #[must_use]
    pub const fn with_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }
}

/// Build a configured HTTP client.
///
/// The connect timeout never exceeds the overall request timeout.
///
/// # Errors
///
/// Returns an error if the client cannot be built (e.g., TLS initialization fails).
///
/// # Examples
///
/// ```
/// use rust_common::{HttpConfig, build_http_client};
/// use std::time::Duration;
///
/// let config = HttpConfig::default()
///     .with_timeout(Duration::from_secs(5));
/// let client = build_http_client(&config).expect("Failed to build client");
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, PlatformError> {
    let policy = if config.follow_redirects {
        redirect::Policy::default()
    } else {
        redirect::Policy::none()
    };

    ClientBuilder::new()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout.min(config.timeout))
        .user_agent(&config.user_agent)
        .redirect(policy)
        .use_rustls_tls()
        .build()
        .map_err(PlatformError::Http)
}
