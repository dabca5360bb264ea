//! Broker HTTP client.
//!
//! Publishes contract documents under a (provider, consumer, version)
//! coordinate, records branches and tags, fetches the contracts a provider
//! has to verify and reports verification results back. Selection inputs
//! are passed through to the broker untouched.

use crate::config::{BrokerConfig, parse_url};
use crate::contract::ContractDocument;
use crate::error::{ContractError, FormatError, Result};
use crate::format;
use crate::verifier::{VerificationReport, VerificationResult};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response};
use rust_common::HttpConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Options for publishing a consumer version.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Consumer version the documents belong to
    pub consumer_version: String,
    /// Branch the version was built from
    pub branch: Option<String>,
    /// Tags applied to the version
    pub tags: Vec<String>,
    /// Only publish documents from this consumer when set
    pub consumer: Option<String>,
}

impl PublishOptions {
    /// Publish under `consumer_version` with no branch or tags.
    #[must_use]
    pub fn new(consumer_version: impl Into<String>) -> Self {
        Self {
            consumer_version: consumer_version.into(),
            branch: None,
            tags: Vec::new(),
            consumer: None,
        }
    }

    /// Record the version on `branch`.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Apply `tag` to the version.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Restrict directory publishing to documents from `consumer`.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }
}

/// Which kind of broker call a non-success answer belongs to.
#[derive(Debug, Clone, Copy)]
enum Call {
    Write,
    Read,
}

/// Which consumer versions a provider should verify.
///
/// The broker interprets selectors; this client only forwards them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerVersionSelector {
    /// Versions from each consumer's main branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<bool>,
    /// Versions from a named branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Versions currently deployed or released
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_or_released: Option<bool>,
    /// Only the latest version matching the other fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<bool>,
    /// Versions carrying a tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Restrict to one consumer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
}

impl ConsumerVersionSelector {
    /// `{ "mainBranch": true }`
    #[must_use]
    pub fn main_branch() -> Self {
        Self {
            main_branch: Some(true),
            ..Self::default()
        }
    }

    /// `{ "deployedOrReleased": true }`
    #[must_use]
    pub fn deployed_or_released() -> Self {
        Self {
            deployed_or_released: Some(true),
            ..Self::default()
        }
    }

    /// `{ "branch": name }`
    #[must_use]
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            branch: Some(name.into()),
            ..Self::default()
        }
    }

    /// `{ "tag": tag, "latest": true }`
    #[must_use]
    pub fn latest_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            latest: Some(true),
            ..Self::default()
        }
    }
}

/// Contract downloaded for verification.
#[derive(Debug, Clone)]
pub struct FetchedContract {
    /// Decoded document
    pub document: ContractDocument,
    /// Where the document was fetched from
    pub url: Url,
    /// Where the broker wants results for this document, if it said
    pub results_url: Option<Url>,
}

/// Provider-side identity attached to published results.
#[derive(Debug, Clone)]
pub struct ResultOptions {
    /// Provider application version that was verified
    pub provider_version: String,
    /// Branch the provider version was built from
    pub provider_branch: Option<String>,
}

impl ResultOptions {
    /// Results for `provider_version` without a branch.
    #[must_use]
    pub fn new(provider_version: impl Into<String>) -> Self {
        Self {
            provider_version: provider_version.into(),
            provider_branch: None,
        }
    }

    /// Attach the provider branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.provider_branch = Some(branch.into());
        self
    }
}

/// Body of a verification-results publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResultsPayload {
    /// Whether every interaction passed
    pub success: bool,
    /// Provider application version
    pub provider_application_version: String,
    /// Provider branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_version_branch: Option<String>,
    /// When verification finished
    pub verified_at: DateTime<Utc>,
    /// Per-interaction results
    pub test_results: Vec<VerificationResult>,
}

impl VerificationResultsPayload {
    /// Payload for `report`, stamped with the current time.
    #[must_use]
    pub fn new(report: &VerificationReport, options: &ResultOptions) -> Self {
        Self {
            success: report.passed(),
            provider_application_version: options.provider_version.clone(),
            provider_version_branch: options.provider_branch.clone(),
            verified_at: Utc::now(),
            test_results: report.results.clone(),
        }
    }
}

/// HTTP client for a contract broker.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    base_url: Url,
    token: Option<SecretString>,
    http: Client,
}

impl BrokerClient {
    /// Client for the broker at `base_url`.
    ///
    /// # Errors
    ///
    /// Fails if the URL is not an http(s) base URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = parse_url("broker base URL", base_url)?;
        let http = rust_common::build_http_client(&HttpConfig::default().with_redirects())?;
        Ok(Self {
            base_url,
            token: None,
            http,
        })
    }

    /// Client built from environment-derived settings.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let mut client = Self::new(config.base_url.as_str())?;
        client.token.clone_from(&config.token);
        Ok(client)
    }

    /// Authenticate with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Base URL of the broker.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upload one document, then record branch and tags.
    ///
    /// # Errors
    ///
    /// - [`ContractError::Configuration`] for a document with no interactions
    /// - [`ContractError::Publish`] when the broker answers non-2xx
    /// - [`ContractError::Transport`] when the broker cannot be reached
    #[instrument(
        skip(self, document, options),
        fields(
            consumer = %document.consumer_name(),
            provider = %document.provider_name(),
            version = %options.consumer_version
        )
    )]
    pub async fn publish(
        &self,
        document: &ContractDocument,
        options: &PublishOptions,
    ) -> Result<()> {
        self.publish_contract(document, &options.consumer_version).await?;

        let consumer = document.consumer_name();
        if let Some(branch) = &options.branch {
            self.record_branch(consumer, branch, &options.consumer_version)
                .await?;
        }
        for tag in &options.tags {
            self.tag_version(consumer, &options.consumer_version, tag)
                .await?;
        }
        Ok(())
    }

    /// `PUT` the serialized document under its coordinate.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub async fn publish_contract(
        &self,
        document: &ContractDocument,
        consumer_version: &str,
    ) -> Result<()> {
        check_publishable(document)?;
        let body = format::serialize(document)?;

        let url = self.url(&[
            "pacts",
            "provider",
            document.provider_name(),
            "consumer",
            document.consumer_name(),
            "version",
            consumer_version,
        ])?;
        let request = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, Call::Write).await?;

        info!(
            consumer = %document.consumer_name(),
            provider = %document.provider_name(),
            version = consumer_version,
            interactions = document.interactions.len(),
            "Published contract"
        );
        Ok(())
    }

    /// Record that `version` of `consumer` was built from `branch`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-2xx answer.
    pub async fn record_branch(&self, consumer: &str, branch: &str, version: &str) -> Result<()> {
        let url = self.url(&["pacticipants", consumer, "branches", branch, "versions", version])?;
        self.send(self.request(Method::PUT, url).json(&json!({})), Call::Write)
            .await?;
        debug!(consumer, branch, version, "Recorded branch");
        Ok(())
    }

    /// Apply `tag` to `version` of `consumer`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-2xx answer.
    pub async fn tag_version(&self, consumer: &str, version: &str, tag: &str) -> Result<()> {
        let url = self.url(&["pacticipants", consumer, "versions", version, "tags", tag])?;
        self.send(self.request(Method::PUT, url).json(&json!({})), Call::Write)
            .await?;
        debug!(consumer, version, tag, "Tagged version");
        Ok(())
    }

    /// Publish every `*.json` document in `dir`, in file-name order.
    ///
    /// Every file is decoded and checked before anything is uploaded, so a
    /// corrupt or empty document fails the call without a partial publish.
    /// With [`PublishOptions::consumer`] set, documents from other consumers
    /// are skipped. Returns the published paths.
    ///
    /// # Errors
    ///
    /// - [`ContractError::Configuration`] when `dir` holds no documents to
    ///   publish or one of them has no interactions
    /// - [`ContractError::Format`] for a file that does not decode
    /// - anything [`publish`](Self::publish) returns
    #[instrument(skip(self, dir, options), fields(dir = %dir.as_ref().display()))]
    pub async fn publish_directory(
        &self,
        dir: impl AsRef<Path>,
        options: &PublishOptions,
    ) -> Result<Vec<PathBuf>> {
        let paths = contract_files(dir.as_ref())?;
        if paths.is_empty() {
            return Err(ContractError::configuration(format!(
                "no contract files found in {}",
                dir.as_ref().display()
            )));
        }

        let mut selected = Vec::with_capacity(paths.len());
        for path in paths {
            let document = ContractDocument::load(&path)?;
            if let Some(consumer) = &options.consumer {
                if document.consumer_name() != consumer {
                    debug!(
                        path = %path.display(),
                        %consumer,
                        "Skipping contract of another consumer"
                    );
                    continue;
                }
            }
            check_publishable(&document)?;
            selected.push((path, document));
        }
        if selected.is_empty() {
            return Err(ContractError::configuration(format!(
                "no contracts for consumer '{}' in {}",
                options.consumer.as_deref().unwrap_or_default(),
                dir.as_ref().display()
            )));
        }

        for (_, document) in &selected {
            self.publish(document, options).await?;
        }
        Ok(selected.into_iter().map(|(path, _)| path).collect())
    }

    /// Ask the broker which contracts `provider` must verify and download
    /// each of them.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, a non-2xx answer, an answer without the
    /// expected links, or a document that does not decode.
    #[instrument(skip(self, selectors), fields(selectors = selectors.len()))]
    pub async fn fetch_for_verification(
        &self,
        provider: &str,
        selectors: &[ConsumerVersionSelector],
        provider_branch: Option<&str>,
    ) -> Result<Vec<FetchedContract>> {
        let url = self.url(&["pacts", "provider", provider, "for-verification"])?;
        let mut body = json!({ "consumerVersionSelectors": selectors });
        if let Some(branch) = provider_branch {
            body["providerVersionBranch"] = json!(branch);
        }

        let response = self
            .send(self.request(Method::POST, url).json(&body), Call::Read)
            .await?;
        let listing: Value = response.json().await?;
        let hrefs = listing
            .pointer("/_embedded/pacts")
            .and_then(Value::as_array)
            .ok_or_else(|| FormatError::invalid("broker listing has no _embedded.pacts list"))?
            .iter()
            .map(|pact| {
                pact.pointer("/_links/self/href")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FormatError::invalid("broker listing entry has no self link"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut contracts = Vec::with_capacity(hrefs.len());
        for href in hrefs {
            contracts.push(self.fetch_contract(href).await?);
        }
        info!(provider, count = contracts.len(), "Fetched contracts for verification");
        Ok(contracts)
    }

    async fn fetch_contract(&self, href: &str) -> Result<FetchedContract> {
        let url = self.resolve(href)?;
        let response = self
            .send(self.request(Method::GET, url.clone()), Call::Read)
            .await?;
        let bytes = response.bytes().await?;

        let results_url = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| {
                v.pointer("/_links/pb:publish-verification-results/href")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .and_then(|href| self.resolve(&href).ok());

        let document = format::deserialize(&bytes)?;
        debug!(%url, consumer = %document.consumer_name(), "Fetched contract");
        Ok(FetchedContract {
            document,
            url,
            results_url,
        })
    }

    /// Report `report` for the contract published under
    /// (provider, consumer, consumer version).
    ///
    /// Publishing is separate from the verification outcome: a failure here
    /// says nothing about whether the provider passed.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or a non-2xx answer.
    #[instrument(skip(self, report, options), fields(passed = report.passed()))]
    pub async fn publish_verification_results(
        &self,
        consumer: &str,
        provider: &str,
        consumer_version: &str,
        report: &VerificationReport,
        options: &ResultOptions,
    ) -> Result<()> {
        let url = self.url(&[
            "pacts",
            "provider",
            provider,
            "consumer",
            consumer,
            "version",
            consumer_version,
            "verification-results",
        ])?;
        self.post_results(url, report, options).await
    }

    /// Report `report` for a contract obtained from
    /// [`fetch_for_verification`](Self::fetch_for_verification).
    ///
    /// # Errors
    ///
    /// [`ContractError::Configuration`] if the broker gave no results link
    /// for the contract; otherwise as
    /// [`publish_verification_results`](Self::publish_verification_results).
    pub async fn publish_results_for(
        &self,
        contract: &FetchedContract,
        report: &VerificationReport,
        options: &ResultOptions,
    ) -> Result<()> {
        let url = contract.results_url.clone().ok_or_else(|| {
            ContractError::configuration(format!(
                "broker gave no verification results link for {}",
                contract.url
            ))
        })?;
        self.post_results(url, report, options).await
    }

    async fn post_results(
        &self,
        url: Url,
        report: &VerificationReport,
        options: &ResultOptions,
    ) -> Result<()> {
        let payload = VerificationResultsPayload::new(report, options);
        self.send(self.request(Method::POST, url.clone()).json(&payload), Call::Write)
            .await?;
        info!(%url, success = payload.success, "Published verification results");
        Ok(())
    }

    /// Base URL extended with escaped path segments.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ContractError::configuration("broker base URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn resolve(&self, href: &str) -> Result<Url> {
        self.base_url
            .join(href)
            .map_err(|e| ContractError::configuration(format!("invalid broker link '{href}': {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, call: Call) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        warn!(%url, status = status.as_u16(), ?call, "Broker rejected request");
        let status = status.as_u16();
        Err(match call {
            Call::Write => ContractError::Publish { status, body },
            Call::Read => ContractError::Fetch { status, body },
        })
    }
}

/// Reject documents the broker must never receive.
fn check_publishable(document: &ContractDocument) -> Result<()> {
    if document.is_empty() {
        return Err(ContractError::configuration(format!(
            "refusing to publish {} with no interactions",
            document.file_name()
        )));
    }
    document.validate()?;
    Ok(())
}

/// `*.json` files directly inside `dir`, sorted by file name.
fn contract_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_escapes_segments() {
        let client = BrokerClient::new("http://broker:9292/base/").unwrap();
        let url = client
            .url(&["pacts", "provider", "posts api", "version", "1.0/rc"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://broker:9292/base/pacts/provider/posts%20api/version/1.0%2Frc"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            BrokerClient::new("broker"),
            Err(ContractError::Configuration(_))
        ));
    }

    #[test]
    fn test_selectors_serialize_sparse_camel_case() {
        let selectors = vec![
            ConsumerVersionSelector::main_branch(),
            ConsumerVersionSelector::deployed_or_released(),
            ConsumerVersionSelector::latest_tag("prod"),
        ];
        assert_eq!(
            serde_json::to_value(&selectors).unwrap(),
            json!([
                {"mainBranch": true},
                {"deployedOrReleased": true},
                {"latest": true, "tag": "prod"}
            ])
        );
    }

    #[test]
    fn test_results_payload() {
        let report: VerificationReport = serde_json::from_value(json!({
            "totalCount": 1,
            "passedCount": 1,
            "results": [{"interactionDescription": "get post 1", "passed": true}]
        }))
        .unwrap();
        let options = ResultOptions::new("1.0.0").with_branch("main");
        let payload = VerificationResultsPayload::new(&report, &options);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["success"], json!(true));
        assert_eq!(value["providerApplicationVersion"], json!("1.0.0"));
        assert_eq!(value["providerVersionBranch"], json!("main"));
        assert!(value["verifiedAt"].is_string());
        assert_eq!(value["testResults"][0]["interactionDescription"], json!("get post 1"));
    }

    #[test]
    fn test_contract_files_are_sorted_json_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b-api.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a-api.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let names: Vec<_> = contract_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a-api.json", "b-api.json"]);
    }

    #[tokio::test]
    async fn test_empty_directory_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = BrokerClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .publish_directory(dir.path(), &PublishOptions::new("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Configuration(_)));
    }
}
