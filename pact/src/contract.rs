//! Contract document and interaction model.

use crate::error::{ContractError, FormatError};
use crate::format;
use crate::matchers::{JsonType, MatchSpec};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Newest document format version this engine reads and writes.
pub const FORMAT_VERSION: &str = "4.0";

/// Full agreement between one consumer and one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractDocument {
    /// Consumer participant
    pub consumer: Participant,
    /// Provider participant
    pub provider: Participant,
    /// Interactions in registration order
    pub interactions: Vec<Interaction>,
    /// Format metadata
    #[serde(default)]
    pub metadata: ContractMetadata,
}

/// A participant in a contract (consumer or provider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// Participant name
    pub name: String,
}

impl Participant {
    /// Create a new participant.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One expected request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    /// Human-readable identifier
    pub description: String,
    /// Provider state required before replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_state: Option<String>,
    /// Expected request
    pub request: RequestSpec,
    /// Expected response
    pub response: ResponseSpec,
}

/// Request side of an interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestSpec {
    /// HTTP method, compared case-insensitively
    pub method: String,
    /// Path spec, matched against the request path without query string
    pub path: MatchSpec,
    /// Header specs keyed by header name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, MatchSpec>,
    /// Body spec
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub body: Option<MatchSpec>,
}

/// Response side of an interaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSpec {
    /// Status spec; its example must be an integer in 100..=999
    pub status: MatchSpec,
    /// Header specs keyed by header name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, MatchSpec>,
    /// Body spec
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub body: Option<MatchSpec>,
}

/// Keeps an explicit JSON `null` body distinct from an absent one.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<MatchSpec>, D::Error> {
    MatchSpec::deserialize(deserializer).map(Some)
}

/// Contract metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractMetadata {
    /// Document format version
    #[serde(rename = "pactSpecification")]
    pub pact_specification: PactSpecification,
}

/// Document format version tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PactSpecification {
    /// Version string
    pub version: String,
}

impl Default for ContractMetadata {
    fn default() -> Self {
        Self {
            pact_specification: PactSpecification {
                version: FORMAT_VERSION.to_string(),
            },
        }
    }
}

impl RequestSpec {
    /// Request with the given method and path spec.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<MatchSpec>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// `GET` request for `path`.
    #[must_use]
    pub fn get(path: impl Into<MatchSpec>) -> Self {
        Self::new("GET", path)
    }

    /// `POST` request for `path`.
    #[must_use]
    pub fn post(path: impl Into<MatchSpec>) -> Self {
        Self::new("POST", path)
    }

    /// Add a header spec.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, spec: impl Into<MatchSpec>) -> Self {
        self.headers.insert(name.into(), spec.into());
        self
    }

    /// Set the body spec.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<MatchSpec>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl ResponseSpec {
    /// Response with the given status spec.
    #[must_use]
    pub fn new(status: impl Into<MatchSpec>) -> Self {
        Self {
            status: status.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Add a header spec.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, spec: impl Into<MatchSpec>) -> Self {
        self.headers.insert(name.into(), spec.into());
        self
    }

    /// Set the body spec.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<MatchSpec>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Concrete status code the spec stands for.
    #[must_use]
    pub fn status_example(&self) -> Option<u16> {
        self.status
            .example()
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .filter(|s| (100..=999).contains(s))
    }
}

impl Interaction {
    /// Check the invariants every interaction must hold.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Invalid`] naming the interaction and the
    /// broken rule.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.description.trim().is_empty() {
            return Err(FormatError::invalid("interaction description must not be empty"));
        }
        if self.provider_state.as_deref().is_some_and(str::is_empty) {
            return Err(FormatError::invalid(format!(
                "interaction '{}' has an empty provider state",
                self.description
            )));
        }
        if self.request.method.trim().is_empty() {
            return Err(FormatError::invalid(format!(
                "interaction '{}' has an empty request method",
                self.description
            )));
        }
        if self.request.path.json_type() != JsonType::String {
            return Err(FormatError::invalid(format!(
                "interaction '{}' has a non-string path spec",
                self.description
            )));
        }
        if self.response.status_example().is_none() {
            return Err(FormatError::invalid(format!(
                "interaction '{}' has status {} outside 100..=999",
                self.description,
                self.response.status.example()
            )));
        }
        Ok(())
    }
}

impl ContractDocument {
    /// Empty document between `consumer` and `provider`.
    #[must_use]
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            consumer: Participant::new(consumer),
            provider: Participant::new(provider),
            interactions: Vec::new(),
            metadata: ContractMetadata::default(),
        }
    }

    /// Append an interaction.
    #[must_use]
    pub fn with_interaction(mut self, interaction: Interaction) -> Self {
        self.interactions.push(interaction);
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn consumer_name(&self) -> &str {
        &self.consumer.name
    }

    /// Provider name.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        &self.provider.name
    }

    /// Whether the document has no interactions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Conventional file name, `<consumer>-<provider>.json`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.consumer.name, self.provider.name)
    }

    /// Check names and every interaction.
    ///
    /// Names become part of [`file_name`](Self::file_name), so they may not
    /// contain path separators or `..`. An empty interaction list is valid
    /// here; publishing rejects it.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Invalid`] on the first broken rule.
    pub fn validate(&self) -> Result<(), FormatError> {
        check_participant_name("consumer", &self.consumer.name)?;
        check_participant_name("provider", &self.provider.name)?;
        self.interactions.iter().try_for_each(Interaction::validate)
    }

    /// Read and decode a document from `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not decode.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let document = format::deserialize(&bytes)?;
        debug!(
            path = %path.display(),
            interactions = document.interactions.len(),
            "Loaded contract"
        );
        Ok(document)
    }

    /// Write the document into `dir` under [`file_name`](Self::file_name),
    /// creating the directory if needed. Returns the written path.
    ///
    /// # Errors
    ///
    /// Fails if the document does not encode or the file cannot be written.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ContractError> {
        let dir = dir.as_ref();
        self.validate()?;
        let bytes = format::serialize(self)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, bytes)?;
        debug!(path = %path.display(), "Wrote contract");
        Ok(path)
    }
}

fn check_participant_name(role: &str, name: &str) -> Result<(), FormatError> {
    if name.trim().is_empty() {
        return Err(FormatError::invalid(format!("{role} name must not be empty")));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(FormatError::invalid(format!(
            "{role} name '{name}' must not contain path separators or '..'"
        )));
    }
    Ok(())
}

/// Fluent construction of an [`Interaction`].
///
/// ```
/// use pact_engine::{InteractionBuilder, RequestSpec, ResponseSpec, like};
/// use serde_json::json;
///
/// let interaction = InteractionBuilder::new()
///     .given("post 1 exists")
///     .upon_receiving("get post 1")
///     .with_request(RequestSpec::get("/posts/1"))
///     .will_respond_with(ResponseSpec::new(200).with_body(like(json!({"id": 1}))))
///     .build()
///     .unwrap();
/// assert_eq!(interaction.provider_state.as_deref(), Some("post 1 exists"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InteractionBuilder {
    description: String,
    provider_state: Option<String>,
    request: Option<RequestSpec>,
    response: Option<ResponseSpec>,
}

impl InteractionBuilder {
    /// Start a new interaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider state the interaction requires.
    #[must_use]
    pub fn given(mut self, state: impl Into<String>) -> Self {
        self.provider_state = Some(state.into());
        self
    }

    /// Description of the interaction.
    #[must_use]
    pub fn upon_receiving(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Expected request.
    #[must_use]
    pub fn with_request(mut self, request: RequestSpec) -> Self {
        self.request = Some(request);
        self
    }

    /// Response to serve and to verify.
    #[must_use]
    pub fn will_respond_with(mut self, response: ResponseSpec) -> Self {
        self.response = Some(response);
        self
    }

    /// Finish and validate the interaction.
    ///
    /// # Errors
    ///
    /// Fails if the request or response is missing or the result breaks an
    /// interaction invariant.
    pub fn build(self) -> Result<Interaction, FormatError> {
        let request = self.request.ok_or_else(|| {
            FormatError::invalid(format!("interaction '{}' has no request", self.description))
        })?;
        let response = self.response.ok_or_else(|| {
            FormatError::invalid(format!("interaction '{}' has no response", self.description))
        })?;
        let interaction = Interaction {
            description: self.description,
            provider_state: self.provider_state,
            request,
            response,
        };
        interaction.validate()?;
        Ok(interaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{each_like, like};
    use serde_json::json;

    fn get_post() -> Interaction {
        InteractionBuilder::new()
            .given("posts exist")
            .upon_receiving("get post 1")
            .with_request(RequestSpec::get("/posts/1"))
            .will_respond_with(
                ResponseSpec::new(200)
                    .with_header("Content-Type", "application/json")
                    .with_body(like(json!({"id": 1, "title": "x"}))),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_contract_serialization() {
        let contract = ContractDocument::new("posts-web", "posts-api").with_interaction(get_post());

        let json = serde_json::to_string(&contract).unwrap();
        let restored: ContractDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(contract, restored);
    }

    #[test]
    fn test_wire_field_names() {
        let contract = ContractDocument::new("c", "p").with_interaction(get_post());
        let value = serde_json::to_value(&contract).unwrap();

        assert_eq!(value["interactions"][0]["providerState"], json!("posts exist"));
        assert_eq!(value["interactions"][0]["response"]["status"], json!(200));
        assert_eq!(value["metadata"]["pactSpecification"]["version"], json!("4.0"));
        assert!(value["interactions"][0]["request"].get("headers").is_none());
    }

    #[test]
    fn test_null_body_survives_round_trip() {
        let mut interaction = get_post();
        interaction.response.body = Some(MatchSpec::literal(serde_json::Value::Null));
        let contract = ContractDocument::new("c", "p").with_interaction(interaction);

        let json = serde_json::to_string(&contract).unwrap();
        let restored: ContractDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(contract, restored);
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        assert!(ContractDocument::new("", "p").validate().is_err());
        assert!(ContractDocument::new("c", " ").validate().is_err());
        assert!(ContractDocument::new("c", "p").validate().is_ok());
    }

    #[test]
    fn test_names_cannot_leave_the_output_directory() {
        for name in ["../x", "a/b", "a\\b", ".."] {
            let err = ContractDocument::new(name, "api").validate().unwrap_err();
            assert!(err.to_string().contains("path separators"), "{name}: {err}");
        }
        assert!(ContractDocument::new("web-app.v2", "api").validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let outside = ContractDocument::new("../escape", "api").write_to(dir.path().join("pacts"));
        assert!(matches!(outside, Err(ContractError::Format(FormatError::Invalid(_)))));
        assert!(!dir.path().join("escape-api.json").exists());
    }

    #[test]
    fn test_builder_requires_description_and_parts() {
        let missing_description = InteractionBuilder::new()
            .with_request(RequestSpec::get("/"))
            .will_respond_with(ResponseSpec::new(200))
            .build();
        assert!(missing_description.is_err());

        let missing_response = InteractionBuilder::new()
            .upon_receiving("x")
            .with_request(RequestSpec::get("/"))
            .build();
        assert!(missing_response.is_err());
    }

    #[test]
    fn test_status_bounds() {
        assert_eq!(ResponseSpec::new(204).status_example(), Some(204));
        assert_eq!(ResponseSpec::new(like(201)).status_example(), Some(201));
        assert_eq!(ResponseSpec::new(42).status_example(), None);
        assert_eq!(ResponseSpec::new("ok").status_example(), None);
    }

    #[test]
    fn test_path_must_be_string() {
        let result = InteractionBuilder::new()
            .upon_receiving("numeric path")
            .with_request(RequestSpec::new("GET", 5))
            .will_respond_with(ResponseSpec::new(200))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_file_name() {
        let contract = ContractDocument::new("web", "api");
        assert_eq!(contract.file_name(), "web-api.json");
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let contract = ContractDocument::new("web", "api").with_interaction(
            InteractionBuilder::new()
                .upon_receiving("list posts")
                .with_request(RequestSpec::get("/posts"))
                .will_respond_with(
                    ResponseSpec::new(200).with_body(each_like(like(json!({"id": 1})))),
                )
                .build()
                .unwrap(),
        );

        let path = contract.write_to(dir.path().join("pacts")).unwrap();
        assert!(path.ends_with("web-api.json"));
        assert_eq!(ContractDocument::load(&path).unwrap(), contract);
    }
}
