//! Broker client against a stub broker.

use pact_engine::format::serialize;
use pact_engine::{
    BrokerClient, ConsumerVersionSelector, ContractDocument, ContractError, PublishOptions,
    ResultOptions, StateHandlers, Verifier, VerifierConfig,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use test_utils::fixtures::{POSTS_CONSUMER, POSTS_PROVIDER, posts_contract};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTRACT_PATH: &str =
    "/pacts/provider/jsonplaceholder-provider/consumer/test-app-consumer/version/1.0.0";

fn client(broker: &MockServer) -> BrokerClient {
    BrokerClient::new(&broker.uri()).unwrap()
}

#[tokio::test]
async fn test_publish_puts_document_with_bearer_token() {
    let broker = MockServer::start().await;
    let document = posts_contract();
    let expected_body: Value = serde_json::from_slice(&serialize(&document).unwrap()).unwrap();
    Mock::given(method("PUT"))
        .and(path(CONTRACT_PATH))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_partial_json(expected_body))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&broker)
        .await;

    client(&broker)
        .with_token(SecretString::from("s3cret".to_string()))
        .publish(&document, &PublishOptions::new("1.0.0"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_records_branch_and_tags() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(CONTRACT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&broker)
        .await;
    Mock::given(method("PUT"))
        .and(path("/pacticipants/test-app-consumer/branches/main/versions/1.0.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&broker)
        .await;
    for tag in ["main", "latest"] {
        Mock::given(method("PUT"))
            .and(path(format!("/pacticipants/test-app-consumer/versions/1.0.0/tags/{tag}")))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&broker)
            .await;
    }

    let options = PublishOptions::new("1.0.0")
        .with_branch("main")
        .with_tag("main")
        .with_tag("latest");
    client(&broker).publish(&posts_contract(), &options).await.unwrap();
}

#[tokio::test]
async fn test_empty_document_is_refused_without_a_request() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&broker)
        .await;

    let empty = ContractDocument::new(POSTS_CONSUMER, POSTS_PROVIDER);
    let err = client(&broker)
        .publish(&empty, &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, ContractError::Configuration(_)));
}

#[tokio::test]
async fn test_rejected_publish_surfaces_status_and_body() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409).set_body_string("version already exists"))
        .mount(&broker)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let written = posts_contract().write_to(dir.path()).unwrap();
    let before = std::fs::read(&written).unwrap();

    let err = client(&broker)
        .publish_directory(dir.path(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    match &err {
        ContractError::Publish { status, body } => {
            assert_eq!(*status, 409);
            assert_eq!(body, "version already exists");
        }
        other => panic!("expected publish error, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(std::fs::read(&written).unwrap(), before);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broker)
        .await;

    let err = client(&broker)
        .publish(&posts_contract(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_broker_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = BrokerClient::new(&format!("http://{addr}"))
        .unwrap()
        .publish(&posts_contract(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    assert!(err.is_transport());
}

#[tokio::test]
async fn test_publish_directory_uploads_every_contract() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&broker)
        .await;
    let dir = tempfile::tempdir().unwrap();
    posts_contract().write_to(dir.path()).unwrap();
    let mut other = posts_contract();
    other.consumer.name = "mobile-app".to_string();
    other.write_to(dir.path()).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let published = client(&broker)
        .publish_directory(dir.path(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap();

    let names: Vec<_> = published
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "mobile-app-jsonplaceholder-provider.json",
            "test-app-consumer-jsonplaceholder-provider.json",
        ]
    );
}

#[tokio::test]
async fn test_corrupt_file_fails_before_any_upload() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&broker)
        .await;
    let dir = tempfile::tempdir().unwrap();
    posts_contract().write_to(dir.path()).unwrap();
    std::fs::write(dir.path().join("zz-broken.json"), "{not json").unwrap();

    let err = client(&broker)
        .publish_directory(dir.path(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, ContractError::Format(_)));
}

#[tokio::test]
async fn test_empty_contract_in_directory_blocks_every_upload() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&broker)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let mut first = posts_contract();
    first.consumer.name = "a".to_string();
    first.provider.name = "api".to_string();
    first.write_to(dir.path()).unwrap();
    ContractDocument::new("b", "api").write_to(dir.path()).unwrap();

    let err = client(&broker)
        .publish_directory(dir.path(), &PublishOptions::new("1.0.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, ContractError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("b-api.json"), "{err}");
}

#[tokio::test]
async fn test_publish_directory_skips_other_consumers() {
    let broker = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(CONTRACT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&broker)
        .await;
    Mock::given(method("PUT"))
        .and(path("/pacts/provider/jsonplaceholder-provider/consumer/mobile-app/version/1.0.0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&broker)
        .await;
    let dir = tempfile::tempdir().unwrap();
    posts_contract().write_to(dir.path()).unwrap();
    let mut other = posts_contract();
    other.consumer.name = "mobile-app".to_string();
    other.write_to(dir.path()).unwrap();

    let options = PublishOptions::new("1.0.0").with_consumer(POSTS_CONSUMER);
    let published = client(&broker).publish_directory(dir.path(), &options).await.unwrap();
    assert_eq!(published.len(), 1);
    assert!(published[0].ends_with("test-app-consumer-jsonplaceholder-provider.json"));

    let options = PublishOptions::new("1.0.0").with_consumer("nobody");
    let err = client(&broker).publish_directory(dir.path(), &options).await.unwrap_err();
    assert!(matches!(err, ContractError::Configuration(_)), "{err}");
}

#[tokio::test]
async fn test_failed_fetch_is_reported_as_fetch_error() {
    let broker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pacts/provider/jsonplaceholder-provider/for-verification"))
        .respond_with(ResponseTemplate::new(404).set_body_string("unknown provider"))
        .mount(&broker)
        .await;

    let err = client(&broker)
        .fetch_for_verification(POSTS_PROVIDER, &[], None)
        .await
        .unwrap_err();

    match &err {
        ContractError::Fetch { status, body } => {
            assert_eq!(*status, 404);
            assert_eq!(body, "unknown provider");
        }
        other => panic!("expected a fetch error, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_moved_contract_link_is_followed() {
    let broker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pacts/provider/jsonplaceholder-provider/for-verification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": {"pacts": [{"_links": {"self": {"href": "/pacts/moved"}}}]}
        })))
        .mount(&broker)
        .await;
    Mock::given(method("GET"))
        .and(path("/pacts/moved"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", CONTRACT_PATH))
        .expect(1)
        .mount(&broker)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTRACT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(serialize(&posts_contract()).unwrap(), "application/json"),
        )
        .expect(1)
        .mount(&broker)
        .await;

    let fetched = client(&broker)
        .fetch_for_verification(POSTS_PROVIDER, &[], None)
        .await
        .unwrap();

    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].document, posts_contract());
}

#[tokio::test]
async fn test_listing_without_contracts_is_format_error() {
    let broker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pacts/provider/jsonplaceholder-provider/for-verification"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_links": {}})))
        .mount(&broker)
        .await;

    let err = client(&broker)
        .fetch_for_verification(POSTS_PROVIDER, &[], None)
        .await
        .unwrap_err();

    assert!(matches!(err, ContractError::Format(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert!(!err.is_transport());
}

#[tokio::test]
async fn test_fetch_for_verification_and_publish_results() {
    let broker = MockServer::start().await;
    let mut served: Value = serde_json::from_slice(&serialize(&posts_contract()).unwrap()).unwrap();
    served["_links"] = json!({
        "pb:publish-verification-results": {
            "href": format!("{}{CONTRACT_PATH}/verification-results", broker.uri())
        }
    });

    Mock::given(method("POST"))
        .and(path("/pacts/provider/jsonplaceholder-provider/for-verification"))
        .and(body_partial_json(json!({
            "consumerVersionSelectors": [{"mainBranch": true}, {"deployedOrReleased": true}],
            "providerVersionBranch": "main",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": {"pacts": [{"_links": {"self": {"href": CONTRACT_PATH}}}]}
        })))
        .expect(1)
        .mount(&broker)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTRACT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(served))
        .expect(1)
        .mount(&broker)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{CONTRACT_PATH}/verification-results")))
        .and(body_partial_json(json!({
            "success": false,
            "providerApplicationVersion": "2.0.0",
            "providerVersionBranch": "main",
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&broker)
        .await;

    let broker_client = client(&broker);
    let selectors = [
        ConsumerVersionSelector::main_branch(),
        ConsumerVersionSelector::deployed_or_released(),
    ];
    let fetched = broker_client
        .fetch_for_verification(POSTS_PROVIDER, &selectors, Some("main"))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].document, posts_contract());
    assert!(fetched[0].results_url.is_some());

    // The stub broker answers GET /posts with 404, so the report fails.
    let report = Verifier::new(&VerifierConfig::default())
        .unwrap()
        .verify(
            &fetched[0].document,
            &broker.uri(),
            &StateHandlers::new().with_handler("posts exist", || async { Ok(()) }),
        )
        .await
        .unwrap();
    assert!(!report.passed());

    broker_client
        .publish_results_for(
            &fetched[0],
            &report,
            &ResultOptions::new("2.0.0").with_branch("main"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_results_by_coordinate() {
    let broker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{CONTRACT_PATH}/verification-results")))
        .and(body_partial_json(json!({"success": true, "testResults": []})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&broker)
        .await;

    let report = Verifier::new(&VerifierConfig::default())
        .unwrap()
        .verify(
            &ContractDocument::new(POSTS_CONSUMER, POSTS_PROVIDER),
            &broker.uri(),
            &StateHandlers::new(),
        )
        .await
        .unwrap();

    client(&broker)
        .publish_verification_results(
            POSTS_CONSUMER,
            POSTS_PROVIDER,
            "1.0.0",
            &report,
            &ResultOptions::new("1.0.0"),
        )
        .await
        .unwrap();
}
