//! Consumer-driven contract testing engine.
//!
//! Consumers record the HTTP interactions they expect from a provider into a
//! [`ContractDocument`], serving them from a [`MockServer`] while their own
//! tests run. Documents are published to a broker with [`BrokerClient`] and
//! later replayed against the real provider by the [`Verifier`].
//!
//! # Modules
//!
//! - [`matchers`] - literal, type-like and each-like matching
//! - [`contract`] - interaction and document model
//! - [`format`] - versioned on-disk encoding
//! - [`mock_server`] - mock provider for consumer tests
//! - [`verifier`] - provider verification runner
//! - [`broker`] - broker HTTP client
//! - [`consumer`] - consumer test session
//! - [`config`] - environment-driven settings

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod config;
pub mod consumer;
pub mod contract;
pub mod error;
pub mod format;
pub mod matchers;
pub mod mock_server;
pub mod verifier;

pub use broker::{
    BrokerClient, ConsumerVersionSelector, FetchedContract, PublishOptions, ResultOptions,
    VerificationResultsPayload,
};
pub use config::{BrokerConfig, MockServerConfig, VerifierConfig};
pub use consumer::{ConsumerPact, SessionOutcome};
pub use contract::{
    ContractDocument, FORMAT_VERSION, Interaction, InteractionBuilder, Participant, RequestSpec,
    ResponseSpec,
};
pub use error::{ContractError, FormatError, Result};
pub use matchers::{MatchOutcome, MatchSpec, Mismatch, each_like, like, matches};
pub use mock_server::{MockServer, MockServerHandle, RunSummary, ServerState, UnmatchedRequest};
pub use verifier::{
    FailureCategory, FailureDetail, StateHandlers, StopSignal, VerificationReport,
    VerificationResult, Verifier,
};
