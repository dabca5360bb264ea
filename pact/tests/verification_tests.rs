//! Provider verification against stub providers.

use pact_engine::{
    ContractDocument, FailureCategory, InteractionBuilder, RequestSpec, ResponseSpec,
    StateHandlers, StopSignal, Verifier, VerifierConfig,
};
use serde_json::json;
use std::time::Duration;
use test_utils::fixtures::{
    POSTS_EXIST, get_post_interaction, get_post_with_state_interaction, list_posts_interaction,
    posts_contract, sample_post, single_interaction_contract,
};
use test_utils::mocks::StateRecorder;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn verifier() -> Verifier {
    Verifier::new(&VerifierConfig::default()).unwrap()
}

async fn provider_returning(route: &str, template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_type_like_body_accepts_richer_provider_response() {
    let mut post = sample_post(1);
    post["extra"] = json!(true);
    let provider =
        provider_returning("/posts/1", ResponseTemplate::new(200).set_body_json(post)).await;

    let report = verifier()
        .verify(
            &single_interaction_contract(get_post_interaction()),
            &provider.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    assert!(report.passed());
    assert_eq!(report.total_count, 1);
    assert_eq!(report.passed_count, 1);
    assert!(report.results[0].failure_detail.is_none());
}

#[tokio::test]
async fn test_plain_text_bodies_are_sent_and_checked_raw() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .and(header("content-type", "text/plain"))
        .and(body_string("hello"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("hello"),
        )
        .expect(1)
        .mount(&provider)
        .await;
    let interaction = InteractionBuilder::new()
        .upon_receiving("echo greeting")
        .with_request(
            RequestSpec::post("/echo")
                .with_header("Content-Type", "text/plain")
                .with_body("hello"),
        )
        .will_respond_with(
            ResponseSpec::new(200)
                .with_header("Content-Type", "text/plain")
                .with_body("hello"),
        )
        .build()
        .unwrap();

    let report = verifier()
        .verify(
            &single_interaction_contract(interaction),
            &provider.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    assert!(report.passed(), "{:?}", report.results);
}

#[tokio::test]
async fn test_wrong_status_is_a_match_failure() {
    let provider = provider_returning("/posts/1", ResponseTemplate::new(404)).await;

    let report = verifier()
        .verify(
            &single_interaction_contract(get_post_interaction()),
            &provider.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    assert!(!report.passed());
    let result = &report.results[0];
    assert_eq!(result.category(), Some(FailureCategory::MatchFailure));
    let detail = result.failure_detail.as_ref().unwrap();
    let status = detail
        .mismatches
        .iter()
        .find(|m| m.path == "/response/status")
        .unwrap();
    assert_eq!(status.reason, "expected 200, got 404");
}

#[tokio::test]
async fn test_missing_state_handler_skips_the_request() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;

    let report = verifier()
        .verify(
            &single_interaction_contract(get_post_with_state_interaction()),
            &provider.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    let result = &report.results[0];
    assert!(!result.passed);
    assert_eq!(result.category(), Some(FailureCategory::Configuration));
    assert!(result.state_setup_error.as_deref().unwrap().contains(POSTS_EXIST));
}

#[tokio::test]
async fn test_state_handler_runs_before_request() {
    let provider = provider_returning(
        "/posts",
        ResponseTemplate::new(200).set_body_json(json!([sample_post(1), sample_post(2)])),
    )
    .await;
    let recorder = StateRecorder::new();

    let report = verifier()
        .verify(&posts_contract(), &provider.uri(), &recorder.handlers(&[POSTS_EXIST]))
        .await
        .unwrap();

    assert!(report.passed(), "{:?}", report.results);
    assert_eq!(recorder.calls(), vec![POSTS_EXIST.to_string()]);
}

#[tokio::test]
async fn test_failing_state_handler_is_state_setup_failure() {
    let provider = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;
    let recorder = StateRecorder::new();
    let handlers = recorder.failing(StateHandlers::new(), POSTS_EXIST, "seed failed");

    let report = verifier()
        .verify(&posts_contract(), &provider.uri(), &handlers)
        .await
        .unwrap();

    let result = &report.results[0];
    assert_eq!(result.category(), Some(FailureCategory::StateSetup));
    assert!(result.state_setup_error.as_deref().unwrap().contains("seed failed"));
    assert_eq!(recorder.calls(), vec![POSTS_EXIST.to_string()]);
}

#[tokio::test]
async fn test_verification_is_deterministic() {
    let provider = provider_returning("/posts/1", ResponseTemplate::new(500)).await;
    let document = single_interaction_contract(get_post_interaction());
    let verifier = verifier();

    let first = verifier
        .verify(&document, &provider.uri(), &StateHandlers::new())
        .await
        .unwrap();
    let second = verifier
        .verify(&document, &provider.uri(), &StateHandlers::new())
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let report = verifier()
        .verify(
            &single_interaction_contract(get_post_interaction()),
            &format!("http://{addr}"),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results[0].category(), Some(FailureCategory::TransportError));
}

#[tokio::test]
async fn test_slow_provider_times_out_as_transport_error() {
    let provider = provider_returning(
        "/posts/1",
        ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
    )
    .await;
    let verifier =
        Verifier::new(&VerifierConfig::default().with_timeout(Duration::from_millis(200))).unwrap();

    let report = verifier
        .verify(
            &single_interaction_contract(get_post_interaction()),
            &provider.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.results[0].category(), Some(FailureCategory::TransportError));
}

#[tokio::test]
async fn test_stop_signal_cancels_remaining_interactions() {
    let provider = MockServer::start().await;
    let stop = StopSignal::new();
    stop.request_stop();
    let document = ContractDocument::new("web", "api")
        .with_interaction(get_post_interaction())
        .with_interaction(list_posts_interaction());

    let report = verifier()
        .with_stop_signal(stop)
        .verify(&document, &provider.uri(), &StateHandlers::new())
        .await
        .unwrap();

    assert_eq!(report.total_count, 2);
    assert!(
        report
            .results
            .iter()
            .all(|r| r.category() == Some(FailureCategory::Cancelled))
    );
}

#[tokio::test]
async fn test_malformed_base_url_fails_the_call() {
    let result = verifier()
        .verify(&posts_contract(), "not a url", &StateHandlers::new())
        .await;

    assert!(result.is_err());
}
