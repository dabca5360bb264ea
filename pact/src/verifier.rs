//! Provider verification.
//!
//! [`Verifier::verify`] replays every interaction of a document against a
//! running provider, one at a time in document order. Each interaction gets
//! its provider state set up first, then a concrete request is built from
//! the request examples and the real response is checked with the matcher
//! engine. Failures are collected per interaction and never cut the run
//! short; only a [`StopSignal`] does, and even then the remaining
//! interactions are reported as cancelled.

use crate::config::{VerifierConfig, parse_url};
use crate::contract::{ContractDocument, Interaction};
use crate::error::Result;
use crate::matchers::{Mismatch, body_text, body_value, match_headers, matches_at};
use futures::future::BoxFuture;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument, warn};

/// Zero-argument async action that puts the provider into a named state.
pub type StateHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Provider-state handlers keyed by exact state name.
#[derive(Clone, Default)]
pub struct StateHandlers {
    handlers: HashMap<String, StateHandler>,
}

impl StateHandlers {
    /// Empty handler map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `state`, replacing any previous one.
    pub fn insert<F, Fut>(&mut self, state: impl Into<String>, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: StateHandler = Arc::new(move || Box::pin(handler()));
        self.handlers.insert(state.into(), handler);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, state: impl Into<String>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(state, handler);
        self
    }

    /// Handler registered for `state`.
    #[must_use]
    pub fn get(&self, state: &str) -> Option<&StateHandler> {
        self.handlers.get(state)
    }

    /// Number of registered states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no state is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for StateHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut states: Vec<_> = self.handlers.keys().collect();
        states.sort();
        f.debug_struct("StateHandlers").field("states", &states).finish()
    }
}

/// Cooperative cancellation for a verification run.
///
/// Checked between interactions; an interaction already in flight runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    /// New, unrequested signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before the next interaction.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Why an interaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Response did not satisfy the expectation
    MatchFailure,
    /// Provider unreachable or too slow
    TransportError,
    /// State handler failed
    StateSetup,
    /// Missing handler or unusable request
    Configuration,
    /// Run stopped before the interaction started
    Cancelled,
}

impl FailureCategory {
    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MatchFailure => "match_failure",
            Self::TransportError => "transport_error",
            Self::StateSetup => "state_setup",
            Self::Configuration => "configuration",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of a failed interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    /// Failure category
    pub category: FailureCategory,
    /// Human-readable summary
    pub message: String,
    /// Every top-level mismatch, for match failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
}

/// Outcome of replaying one interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Description of the replayed interaction
    pub interaction_description: String,
    /// Whether the provider satisfied the interaction
    pub passed: bool,
    /// Set when `passed` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<FailureDetail>,
    /// Set when the provider state could not be established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_setup_error: Option<String>,
}

impl VerificationResult {
    fn passed(description: &str) -> Self {
        Self {
            interaction_description: description.to_string(),
            passed: true,
            failure_detail: None,
            state_setup_error: None,
        }
    }

    fn failed(description: &str, category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            interaction_description: description.to_string(),
            passed: false,
            failure_detail: Some(FailureDetail {
                category,
                message: message.into(),
                mismatches: Vec::new(),
            }),
            state_setup_error: None,
        }
    }

    fn state_failure(description: &str, category: FailureCategory, message: String) -> Self {
        let mut result = Self::failed(description, category, message.clone());
        result.state_setup_error = Some(message);
        result
    }

    fn mismatched(description: &str, mismatches: Vec<Mismatch>) -> Self {
        let message = match mismatches.as_slice() {
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
            [] => String::new(),
        };
        let mut result = Self::failed(description, FailureCategory::MatchFailure, message);
        if let Some(detail) = result.failure_detail.as_mut() {
            detail.mismatches = mismatches;
        }
        result
    }

    /// Failure category, if the interaction failed.
    #[must_use]
    pub fn category(&self) -> Option<FailureCategory> {
        self.failure_detail.as_ref().map(|d| d.category)
    }
}

/// Run-level aggregation of results, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Number of interactions in the document
    pub total_count: usize,
    /// Number that passed
    pub passed_count: usize,
    /// One result per interaction
    pub results: Vec<VerificationResult>,
}

impl VerificationReport {
    fn from_results(results: Vec<VerificationResult>) -> Self {
        Self {
            total_count: results.len(),
            passed_count: results.iter().filter(|r| r.passed).count(),
            results,
        }
    }

    /// Whether every interaction passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed_count == self.total_count
    }

    /// Results that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Sequential verification runner.
#[derive(Debug, Clone)]
pub struct Verifier {
    client: reqwest::Client,
    stop: StopSignal,
}

impl Verifier {
    /// Runner using `config` for every replayed request.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: &VerifierConfig) -> Result<Self> {
        let client = rust_common::build_http_client(&config.http_config())?;
        Ok(Self {
            client,
            stop: StopSignal::new(),
        })
    }

    /// Use an externally owned stop signal.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Signal that stops this runner.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Replay every interaction of `document` against `provider_base_url`.
    ///
    /// # Errors
    ///
    /// Only a malformed base URL fails the whole call; everything that goes
    /// wrong with a single interaction is recorded in its result.
    #[instrument(
        skip_all,
        fields(
            consumer = %document.consumer_name(),
            provider = %document.provider_name(),
            base_url = %provider_base_url
        )
    )]
    pub async fn verify(
        &self,
        document: &ContractDocument,
        provider_base_url: &str,
        handlers: &StateHandlers,
    ) -> Result<VerificationReport> {
        let base = parse_url("provider base URL", provider_base_url)?;
        let base = base.as_str().trim_end_matches('/');

        let mut results = Vec::with_capacity(document.interactions.len());
        for interaction in &document.interactions {
            let result = if self.stop.is_stop_requested() {
                VerificationResult::failed(
                    &interaction.description,
                    FailureCategory::Cancelled,
                    "verification stopped before this interaction started",
                )
            } else {
                self.verify_interaction(base, interaction, handlers).await
            };

            match result.failure_detail.as_ref() {
                None => info!(interaction = %interaction.description, "Interaction passed"),
                Some(detail) => warn!(
                    interaction = %interaction.description,
                    category = %detail.category,
                    message = %detail.message,
                    "Interaction failed"
                ),
            }
            results.push(result);
        }

        let report = VerificationReport::from_results(results);
        info!(
            total = report.total_count,
            passed = report.passed_count,
            "Verification finished"
        );
        Ok(report)
    }

    async fn verify_interaction(
        &self,
        base: &str,
        interaction: &Interaction,
        handlers: &StateHandlers,
    ) -> VerificationResult {
        let description = interaction.description.as_str();

        if let Some(state) = &interaction.provider_state {
            let Some(handler) = handlers.get(state) else {
                return VerificationResult::state_failure(
                    description,
                    FailureCategory::Configuration,
                    format!("no state handler registered for '{state}'"),
                );
            };
            if let Err(e) = handler().await {
                return VerificationResult::state_failure(
                    description,
                    FailureCategory::StateSetup,
                    format!("state handler for '{state}' failed: {e:#}"),
                );
            }
        }

        let request = match self.build_request(base, interaction) {
            Ok(request) => request,
            Err(message) => {
                return VerificationResult::failed(
                    description,
                    FailureCategory::Configuration,
                    message,
                );
            }
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return VerificationResult::failed(
                    description,
                    FailureCategory::TransportError,
                    transport_message(&e),
                );
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return VerificationResult::failed(
                    description,
                    FailureCategory::TransportError,
                    transport_message(&e),
                );
            }
        };

        let expected = &interaction.response;
        let mut mismatches =
            matches_at(&expected.status, &Value::from(status), "/response/status").mismatches;
        mismatches.extend(match_headers(&expected.headers, &headers, "/response/headers"));
        if let Some(body_spec) = &expected.body {
            match body_value(&bytes) {
                Some(body) => {
                    mismatches.extend(matches_at(body_spec, &body, "/response/body").mismatches);
                }
                None => mismatches.push(Mismatch::new("/response/body", "missing body")),
            }
        }

        if mismatches.is_empty() {
            VerificationResult::passed(description)
        } else {
            VerificationResult::mismatched(description, mismatches)
        }
    }

    /// Concrete request from the interaction's example values.
    fn build_request(
        &self,
        base: &str,
        interaction: &Interaction,
    ) -> std::result::Result<reqwest::RequestBuilder, String> {
        let spec = &interaction.request;
        let method = Method::from_bytes(spec.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| format!("invalid request method '{}': {e}", spec.method))?;

        let path = match spec.path.example() {
            Value::String(path) => path,
            other => other.to_string(),
        };
        let separator = if path.starts_with('/') { "" } else { "/" };
        let url = format!("{base}{separator}{path}");

        let mut request = self.client.request(method, &url);
        for (name, value_spec) in &spec.headers {
            let value = match value_spec.example() {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| format!("invalid request header name '{name}': {e}"))?;
            let value = HeaderValue::try_from(value)
                .map_err(|e| format!("invalid value for request header '{name}': {e}"))?;
            request = request.header(name, value);
        }

        if let Some(body_spec) = &spec.body {
            let content_type = spec
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
                .map(|(_, v)| match v.example() {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            if content_type.is_none() {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(body_text(&body_spec.example(), content_type.as_deref()));
        }

        Ok(request)
    }
}

fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("could not connect to provider: {err}")
    } else {
        format!("request failed: {err}")
    }
}
