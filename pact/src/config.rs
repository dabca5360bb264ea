//! Configuration for the broker client, verifier and mock server.
//!
//! Environment loading goes through a lookup function so the same parsing
//! runs against the process environment (with `.env` support) and against
//! plain maps in tests.

use crate::error::{ContractError, Result};
use rust_common::HttpConfig;
use secrecy::SecretString;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Default request timeout for provider replay.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Broker coordinates and publishing inputs.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker base URL
    pub base_url: Url,
    /// Bearer token, redacted in `Debug`
    pub token: Option<SecretString>,
    /// Consumer name for publishing
    pub consumer_name: Option<String>,
    /// Provider name for verification
    pub provider_name: Option<String>,
    /// Consumer version being published
    pub consumer_version: String,
    /// Provider version being verified
    pub provider_version: String,
    /// Branch of the version being published or verified
    pub branch: String,
    /// Whether verification results are sent back to the broker
    pub publish_results: bool,
}

impl BrokerConfig {
    /// Broker config with defaults for everything but the URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            consumer_name: None,
            provider_name: None,
            consumer_version: "default-version".to_string(),
            provider_version: "1.0.0".to_string(),
            branch: "main".to_string(),
            publish_results: false,
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Set the consumer version.
    #[must_use]
    pub fn with_consumer_version(mut self, version: impl Into<String>) -> Self {
        self.consumer_version = version.into();
        self
    }

    /// Set the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Load from the process environment, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Fails if `PACT_BROKER_BASE_URL` is missing or not a URL, or if
    /// `PACT_PUBLISH_RESULTS` is not a boolean.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = non_empty(&lookup, "PACT_BROKER_BASE_URL").ok_or_else(|| {
            ContractError::configuration("missing required variable PACT_BROKER_BASE_URL")
        })?;
        let base_url = parse_url("PACT_BROKER_BASE_URL", &raw_url)?;

        let defaults = Self::new(base_url);
        Ok(Self {
            token: non_empty(&lookup, "PACT_BROKER_TOKEN").map(SecretString::from),
            consumer_name: non_empty(&lookup, "CONSUMER_NAME"),
            provider_name: non_empty(&lookup, "PROVIDER_NAME"),
            consumer_version: non_empty(&lookup, "CONSUMER_VERSION")
                .unwrap_or(defaults.consumer_version),
            provider_version: non_empty(&lookup, "PROVIDER_VERSION")
                .unwrap_or(defaults.provider_version),
            branch: non_empty(&lookup, "GIT_BRANCH").unwrap_or(defaults.branch),
            publish_results: parse_var(&lookup, "PACT_PUBLISH_RESULTS", false)?,
            base_url: defaults.base_url,
        })
    }
}

/// Provider replay settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Upper bound for each replayed request
    pub timeout: Duration,
    /// Connection timeout, capped at `timeout`
    pub connect_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_VERIFY_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl VerifierConfig {
    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load from the process environment (`PACT_VERIFY_TIMEOUT_SECS`).
    ///
    /// # Errors
    ///
    /// Fails if the timeout is not a positive integer.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs: u64 = parse_var(
            &lookup,
            "PACT_VERIFY_TIMEOUT_SECS",
            DEFAULT_VERIFY_TIMEOUT.as_secs(),
        )?;
        if secs == 0 {
            return Err(ContractError::configuration(
                "PACT_VERIFY_TIMEOUT_SECS must be greater than 0",
            ));
        }
        Ok(Self::default().with_timeout(Duration::from_secs(secs)))
    }

    /// HTTP client settings for replay.
    #[must_use]
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig::default()
            .with_timeout(self.timeout)
            .with_connect_timeout(self.connect_timeout)
    }
}

/// Mock provider server settings.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Address to bind; port 0 picks a free port
    pub bind_addr: SocketAddr,
    /// How long `stop` waits for in-flight requests before aborting them
    pub stop_grace: Duration,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl MockServerConfig {
    /// Bind to a specific address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the stop grace period.
    #[must_use]
    pub const fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            ContractError::configuration(format!("failed to parse {name}: {e}"))
        }),
        None => Ok(default),
    }
}

/// Parse a base URL, rejecting anything that is not http(s).
pub(crate) fn parse_url(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ContractError::configuration(format!("invalid URL for {name}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ContractError::configuration(format!(
            "invalid URL for {name}: scheme must be http or https"
        )));
    }
    if url.cannot_be_a_base() {
        return Err(ContractError::configuration(format!(
            "invalid URL for {name}: not a base URL"
        )));
    }
    Ok(url)
}
