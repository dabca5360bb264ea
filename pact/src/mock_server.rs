//! Mock provider server.
//!
//! A [`MockServer`] starts `Idle`. [`MockServer::start`] binds a listener and
//! returns a caller-owned [`MockServerHandle`] (`Listening`); stopping or
//! dropping the handle shuts the listener down (`Stopped`). Each run keeps
//! its own ledger, so concurrent suites never share state.
//!
//! Inbound requests are matched against the registered interactions in
//! registration order. The first interaction whose method, path, headers
//! and body all match wins and is marked exercised. Requests that match
//! nothing get a `500` describing the nearest miss.

use crate::config::MockServerConfig;
use crate::contract::{Interaction, RequestSpec, ResponseSpec};
use crate::error::Result;
use crate::matchers::{Mismatch, body_text, body_value, match_headers, matches_at};
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Largest inbound body the mock buffers.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Lifecycle state of a mock server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Configured, not yet bound
    Idle,
    /// Accepting requests
    Listening,
    /// Listener released
    Stopped,
}

/// Inbound request that matched no interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRequest {
    /// Request method
    pub method: String,
    /// Request path
    pub path: String,
    /// Why the closest interaction did not match
    pub nearest_miss: String,
}

/// Snapshot of what a run has seen so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Run identifier
    pub run_id: Uuid,
    /// Descriptions of interactions matched at least once
    pub exercised: Vec<String>,
    /// Descriptions of interactions never matched
    pub unexercised: Vec<String>,
    /// Requests that matched nothing
    pub unmatched: Vec<UnmatchedRequest>,
    /// Whether any registered interaction went unexercised
    pub incomplete: bool,
}

impl RunSummary {
    /// No unexercised interactions and no unmatched requests.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.incomplete && self.unmatched.is_empty()
    }
}

/// Mock server in the `Idle` state.
#[derive(Debug, Clone)]
pub struct MockServer {
    interactions: Vec<Interaction>,
    config: MockServerConfig,
}

impl MockServer {
    /// Mock serving `interactions` with default settings.
    #[must_use]
    pub fn new(interactions: Vec<Interaction>) -> Self {
        Self {
            interactions,
            config: MockServerConfig::default(),
        }
    }

    /// Replace the server settings.
    #[must_use]
    pub fn with_config(mut self, config: MockServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Always [`ServerState::Idle`]; a started server is a handle.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        ServerState::Idle
    }

    /// Bind the listener and start serving.
    ///
    /// # Errors
    ///
    /// Fails if an interaction is invalid or the address cannot be bound.
    pub async fn start(self) -> Result<MockServerHandle> {
        for interaction in &self.interactions {
            interaction.validate()?;
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let run_id = Uuid::new_v4();
        let state = Arc::new(MockState::new(run_id, self.interactions));

        let router = Router::new()
            .fallback(handle_request)
            .with_state(Arc::clone(&state));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        shutdown_rx.await.ok();
                    })
                    .await
            }
            .instrument(info_span!("mock_run", %run_id, %addr)),
        );

        info!(
            %run_id,
            %addr,
            interactions = state.interactions.len(),
            "Mock server listening"
        );

        Ok(MockServerHandle {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            stop_grace: self.config.stop_grace,
        })
    }
}

/// Running mock server.
///
/// Dropping the handle without calling [`stop`](Self::stop) still releases
/// the listener.
#[derive(Debug)]
pub struct MockServerHandle {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
    stop_grace: Duration,
}

impl MockServerHandle {
    /// Bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL consumers should call, without trailing slash.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Run identifier used in logs and the summary.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        match &self.task {
            Some(task) if !task.is_finished() => ServerState::Listening,
            _ => ServerState::Stopped,
        }
    }

    /// Live snapshot of the run.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.state.summary()
    }

    /// Stop serving, release the listener and return the final summary.
    ///
    /// In-flight requests get the configured grace period to finish before
    /// their connections are dropped.
    pub async fn stop(mut self) -> RunSummary {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.stop_grace, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "Mock server exited with error"),
                Ok(Err(e)) => warn!(error = %e, "Mock server task failed"),
                Err(_) => {
                    warn!(grace = ?self.stop_grace, "Mock server did not drain in time, aborting");
                    task.abort();
                    task.await.ok();
                }
            }
        }

        let summary = self.state.summary();
        if summary.incomplete {
            warn!(
                run_id = %summary.run_id,
                unexercised = ?summary.unexercised,
                "Mock run incomplete: some interactions were never exercised"
            );
        }
        info!(
            run_id = %summary.run_id,
            exercised = summary.exercised.len(),
            unmatched = summary.unmatched.len(),
            "Mock server stopped"
        );
        summary
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
struct MockState {
    run_id: Uuid,
    interactions: Vec<Interaction>,
    ledger: Mutex<Ledger>,
}

#[derive(Debug, Default)]
struct Ledger {
    hits: Vec<usize>,
    unmatched: Vec<UnmatchedRequest>,
}

struct InboundRequest {
    method: String,
    path: String,
    headers: HeaderMap,
    body: Option<Value>,
}

impl MockState {
    fn new(run_id: Uuid, interactions: Vec<Interaction>) -> Self {
        let ledger = Ledger {
            hits: vec![0; interactions.len()],
            unmatched: Vec::new(),
        };
        Self {
            run_id,
            interactions,
            ledger: Mutex::new(ledger),
        }
    }

    /// Select the interaction for `inbound` and record the outcome.
    fn match_and_mark(&self, inbound: &InboundRequest) -> std::result::Result<usize, String> {
        let mut ledger = self.ledger.lock();
        match select(&self.interactions, inbound) {
            Ok(index) => {
                ledger.hits[index] += 1;
                Ok(index)
            }
            Err(nearest_miss) => {
                ledger.unmatched.push(UnmatchedRequest {
                    method: inbound.method.clone(),
                    path: inbound.path.clone(),
                    nearest_miss: nearest_miss.clone(),
                });
                Err(nearest_miss)
            }
        }
    }

    fn summary(&self) -> RunSummary {
        let ledger = self.ledger.lock();
        let (exercised, unexercised): (Vec<_>, Vec<_>) = self
            .interactions
            .iter()
            .zip(&ledger.hits)
            .partition(|(_, hits)| **hits > 0);

        RunSummary {
            run_id: self.run_id,
            incomplete: !unexercised.is_empty(),
            exercised: exercised.into_iter().map(|(i, _)| i.description.clone()).collect(),
            unexercised: unexercised
                .into_iter()
                .map(|(i, _)| i.description.clone())
                .collect(),
            unmatched: ledger.unmatched.clone(),
        }
    }
}

/// First fully matching interaction, or the nearest miss as text.
///
/// Interactions whose method and path match rank before those that do
/// not; ties go to the one with fewer mismatches, then to registration
/// order.
fn select(
    interactions: &[Interaction],
    inbound: &InboundRequest,
) -> std::result::Result<usize, String> {
    let mut nearest: Option<((bool, usize), &Interaction, Vec<Mismatch>)> = None;

    for (index, interaction) in interactions.iter().enumerate() {
        let route = route_mismatches(&interaction.request, inbound);
        let is_candidate = route.is_empty();
        let mismatches = if is_candidate {
            content_mismatches(&interaction.request, inbound)
        } else {
            route
        };
        if mismatches.is_empty() {
            return Ok(index);
        }

        let rank = (!is_candidate, mismatches.len());
        if nearest.as_ref().is_none_or(|(best, _, _)| rank < *best) {
            nearest = Some((rank, interaction, mismatches));
        }
    }

    Err(nearest.map_or_else(
        || "no interactions registered".to_string(),
        |(_, interaction, mismatches)| {
            let first = mismatches.first().map(ToString::to_string).unwrap_or_default();
            format!("interaction '{}': {first}", interaction.description)
        },
    ))
}

fn route_mismatches(spec: &RequestSpec, inbound: &InboundRequest) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    if !spec.method.eq_ignore_ascii_case(&inbound.method) {
        mismatches.push(Mismatch::new(
            "/request/method",
            format!("expected {}, got {}", spec.method.to_ascii_uppercase(), inbound.method),
        ));
    }
    mismatches.extend(
        matches_at(&spec.path, &Value::String(inbound.path.clone()), "/request/path").mismatches,
    );
    mismatches
}

fn content_mismatches(spec: &RequestSpec, inbound: &InboundRequest) -> Vec<Mismatch> {
    let mut mismatches = match_headers(&spec.headers, &inbound.headers, "/request/headers");
    if let Some(body_spec) = &spec.body {
        match &inbound.body {
            Some(body) => {
                mismatches.extend(matches_at(body_spec, body, "/request/body").mismatches);
            }
            None => mismatches.push(Mismatch::new("/request/body", "missing body")),
        }
    }
    mismatches
}

async fn handle_request(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(run_id = %state.run_id, error = %e, "Failed to read request body");
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(json!({ "error": format!("unreadable request body: {e}") })),
            )
                .into_response();
        }
    };

    let inbound = InboundRequest {
        method: parts.method.as_str().to_string(),
        path: decoded_path(parts.uri.path()),
        headers: parts.headers,
        body: body_value(&bytes),
    };

    match state.match_and_mark(&inbound) {
        Ok(index) => {
            let interaction = &state.interactions[index];
            debug!(
                run_id = %state.run_id,
                method = %inbound.method,
                path = %inbound.path,
                interaction = %interaction.description,
                "Matched request"
            );
            build_response(&interaction.response)
        }
        Err(nearest_miss) => {
            warn!(
                run_id = %state.run_id,
                method = %inbound.method,
                path = %inbound.path,
                %nearest_miss,
                "Unmatched request"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({
                    "error": "no matching interaction",
                    "method": inbound.method,
                    "path": inbound.path,
                    "nearestMiss": nearest_miss,
                })),
            )
                .into_response()
        }
    }
}

/// Percent-decoded request path; the raw path when it does not decode to
/// UTF-8.
fn decoded_path(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map_or_else(|_| raw.to_string(), |path| path.into_owned())
}

/// Render an interaction's response from its example values.
fn build_response(spec: &ResponseSpec) -> Response {
    let status = spec
        .status_example()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    let mut headers = HeaderMap::new();
    for (name, value_spec) in &spec.headers {
        let value = match value_spec.example() {
            Value::String(s) => s,
            other => other.to_string(),
        };
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Skipping header that is not valid on the wire"),
        }
    }

    let body = match &spec.body {
        Some(body_spec) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
            Body::from(body_text(&body_spec.example(), content_type))
        }
        None => Body::empty(),
    };

    (status, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::InteractionBuilder;
    use crate::matchers::{MatchSpec, like};

    fn interaction(description: &str, method: &str, path: &str) -> Interaction {
        InteractionBuilder::new()
            .upon_receiving(description)
            .with_request(RequestSpec::new(method, path))
            .will_respond_with(ResponseSpec::new(200))
            .build()
            .unwrap()
    }

    fn inbound(method: &str, path: &str, body: Option<Value>) -> InboundRequest {
        InboundRequest {
            method: method.to_string(),
            path: path.to_string(),
            headers: HeaderMap::new(),
            body,
        }
    }

    #[test]
    fn test_select_is_first_match_in_registration_order() {
        let interactions = vec![
            interaction("first", "GET", "/posts"),
            interaction("second", "GET", "/posts"),
        ];
        assert_eq!(select(&interactions, &inbound("get", "/posts", None)), Ok(0));
    }

    #[test]
    fn test_select_filters_candidates_by_body() {
        let mut create_a = interaction("create a", "POST", "/posts");
        create_a.request.body = Some(MatchSpec::literal(json!({"title": "a"})));
        let mut create_b = interaction("create b", "POST", "/posts");
        create_b.request.body = Some(MatchSpec::literal(json!({"title": "b"})));

        let interactions = vec![create_a, create_b];
        let request = inbound("POST", "/posts", Some(json!({"title": "b"})));
        assert_eq!(select(&interactions, &request), Ok(1));
    }

    #[test]
    fn test_nearest_miss_prefers_route_candidates() {
        let mut create = interaction("create post", "POST", "/posts");
        create.request.body = Some(like(json!({"title": "x"})));
        let interactions = vec![interaction("get post", "GET", "/posts/1"), create];

        let miss = select(&interactions, &inbound("POST", "/posts", None)).unwrap_err();
        assert!(miss.starts_with("interaction 'create post'"), "{miss}");
        assert!(miss.contains("missing body"));
    }

    #[test]
    fn test_nearest_miss_without_interactions() {
        let miss = select(&[], &inbound("GET", "/", None)).unwrap_err();
        assert_eq!(miss, "no interactions registered");
    }

    #[test]
    fn test_summary_tracks_hits_and_misses() {
        let state = MockState::new(
            Uuid::new_v4(),
            vec![interaction("a", "GET", "/a"), interaction("b", "GET", "/b")],
        );
        assert!(state.match_and_mark(&inbound("GET", "/a", None)).is_ok());
        assert!(state.match_and_mark(&inbound("GET", "/c", None)).is_err());

        let summary = state.summary();
        assert_eq!(summary.exercised, vec!["a"]);
        assert_eq!(summary.unexercised, vec!["b"]);
        assert_eq!(summary.unmatched.len(), 1);
        assert_eq!(summary.unmatched[0].path, "/c");
        assert!(summary.incomplete);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_build_response_uses_examples() {
        let spec = ResponseSpec::new(like(201))
            .with_header("X-Trace", like("abc"))
            .with_body(like(json!({"id": 1})));
        let response = build_response(&spec);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-trace"], "abc");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_build_response_keeps_explicit_content_type() {
        let spec = ResponseSpec::new(200)
            .with_header("Content-Type", "application/hal+json")
            .with_body(json!({"_links": {}}));
        let response = build_response(&spec);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/hal+json");
    }

    #[test]
    fn test_decoded_path() {
        assert_eq!(decoded_path("/users/jane%20doe"), "/users/jane doe");
        assert_eq!(decoded_path("/caf%C3%A9"), "/café");
        assert_eq!(decoded_path("/raw/%FF"), "/raw/%FF");
        assert_eq!(decoded_path("/plain"), "/plain");
    }

    #[tokio::test]
    async fn test_build_response_sends_plain_text_raw() {
        let spec = ResponseSpec::new(200)
            .with_header("Content-Type", "text/plain")
            .with_body("hello");
        let response = build_response(&spec);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_start_serves_and_stop_releases() {
        let server = MockServer::new(vec![interaction("a", "GET", "/a")]);
        assert_eq!(server.state(), ServerState::Idle);

        let handle = server.start().await.unwrap();
        assert_eq!(handle.state(), ServerState::Listening);
        let addr = handle.addr();

        let status = reqwest::get(format!("{}/a", handle.url())).await.unwrap().status();
        assert_eq!(status, 200);
        assert_eq!(handle.summary().exercised, vec!["a"]);

        let summary = handle.stop().await;
        assert!(summary.is_clean());
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }
}
