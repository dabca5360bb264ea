//! Consumer-side test session.
//!
//! A [`ConsumerPact`] collects the interactions a consumer expects, serves
//! them from a mock provider while the consumer's code runs, and writes the
//! resulting contract document when the run is clean.

use crate::config::MockServerConfig;
use crate::contract::{ContractDocument, Interaction, InteractionBuilder};
use crate::error::Result;
use crate::mock_server::{MockServer, MockServerHandle, RunSummary};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default directory contract files are written to.
pub const DEFAULT_OUTPUT_DIR: &str = "./pacts";

/// Result of finishing a mock run.
#[derive(Debug, Clone)]
pub struct SessionOutcome<T = ()> {
    /// Value returned by the test body
    pub value: T,
    /// Final run summary
    pub summary: RunSummary,
    /// Written contract file, absent when the run had unmatched requests
    pub written: Option<PathBuf>,
}

/// Consumer test session for one consumer/provider pair.
#[derive(Debug, Clone)]
pub struct ConsumerPact {
    consumer: String,
    provider: String,
    interactions: Vec<Interaction>,
    output_dir: PathBuf,
    mock_config: MockServerConfig,
}

impl ConsumerPact {
    /// Session between `consumer` and `provider`, writing to `./pacts`.
    #[must_use]
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            provider: provider.into(),
            interactions: Vec::new(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            mock_config: MockServerConfig::default(),
        }
    }

    /// Write contracts into `dir` instead.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Mock server settings for runs of this session.
    #[must_use]
    pub fn with_mock_config(mut self, config: MockServerConfig) -> Self {
        self.mock_config = config;
        self
    }

    /// Register a built interaction.
    pub fn add_interaction(&mut self, interaction: Interaction) -> &mut Self {
        self.interactions.push(interaction);
        self
    }

    /// Build and register an interaction.
    ///
    /// # Errors
    ///
    /// Fails if the builder does not produce a valid interaction.
    pub fn interaction(&mut self, builder: InteractionBuilder) -> Result<&mut Self> {
        let interaction = builder.build()?;
        Ok(self.add_interaction(interaction))
    }

    /// Interactions registered so far.
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Document holding every registered interaction.
    #[must_use]
    pub fn document(&self) -> ContractDocument {
        self.interactions.iter().cloned().fold(
            ContractDocument::new(&self.consumer, &self.provider),
            ContractDocument::with_interaction,
        )
    }

    /// Start a mock provider serving the registered interactions.
    ///
    /// # Errors
    ///
    /// Fails if the mock cannot bind its address.
    pub async fn start_mock(&self) -> Result<MockServerHandle> {
        MockServer::new(self.interactions.clone())
            .with_config(self.mock_config.clone())
            .start()
            .await
    }

    /// Stop `handle` and write the contract if no request went unmatched.
    ///
    /// Unexercised interactions only produce a warning; the caller decides
    /// whether an incomplete run is fatal.
    ///
    /// # Errors
    ///
    /// Fails if the contract cannot be written.
    pub async fn finish(&self, handle: MockServerHandle) -> Result<SessionOutcome> {
        let summary = handle.stop().await;
        let written = self.write_if_clean(&summary)?;
        Ok(SessionOutcome {
            value: (),
            summary,
            written,
        })
    }

    /// Run `test` against a fresh mock, passing it the mock's base URL,
    /// then finish the run.
    ///
    /// # Errors
    ///
    /// Fails if the mock cannot start or the contract cannot be written.
    pub async fn run<F, Fut, T>(&self, test: F) -> Result<SessionOutcome<T>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.start_mock().await?;
        let value = test(handle.url()).await;
        let summary = handle.stop().await;
        let written = self.write_if_clean(&summary)?;
        Ok(SessionOutcome {
            value,
            summary,
            written,
        })
    }

    fn write_if_clean(&self, summary: &RunSummary) -> Result<Option<PathBuf>> {
        if !summary.unmatched.is_empty() {
            warn!(
                consumer = %self.consumer,
                provider = %self.provider,
                unmatched = summary.unmatched.len(),
                "Not writing contract: run had unmatched requests"
            );
            return Ok(None);
        }
        if summary.incomplete {
            warn!(unexercised = ?summary.unexercised, "Writing contract for an incomplete run");
        }

        let path = self.document().write_to(&self.output_dir)?;
        info!(path = %path.display(), "Contract written");
        Ok(Some(path))
    }
}
