//! Error types for the contract engine.
//!
//! [`FormatError`] covers everything that can go wrong turning bytes into a
//! [`ContractDocument`](crate::ContractDocument). [`ContractError`] is the
//! crate-wide error returned by the mock server, verifier and broker client.

use rust_common::PlatformError;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = ContractError> = std::result::Result<T, E>;

/// Failure to parse, validate or encode a contract document.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FormatError {
    /// Not valid JSON, JSON that does not fit the document model, or a
    /// malformed matcher encoding
    #[error("malformed contract document: {0}")]
    Json(#[from] serde_json::Error),

    /// `metadata.pactSpecification.version` is absent
    #[error("contract document has no format version")]
    MissingVersion,

    /// Version string is not of the form `major[.minor[.patch]]`
    #[error("contract document has invalid format version '{0}'")]
    InvalidVersion(String),

    /// Version is newer than this engine understands
    #[error("unsupported format version {found}: this engine reads up to {supported}")]
    UnsupportedVersion {
        /// Version found in the document
        found: String,
        /// Newest version supported
        supported: String,
    },

    /// Structurally valid but semantically broken document
    #[error("invalid contract document: {0}")]
    Invalid(String),
}

impl FormatError {
    /// Create an invalid document error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Crate-wide error type.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ContractError {
    /// Caller supplied unusable settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Contract document could not be read or written
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Remote side unreachable or did not answer in time
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker answered with a non-success status
    #[error("publish rejected with status {status}: {body}")]
    Publish {
        /// HTTP status returned by the broker
        status: u16,
        /// Response body returned by the broker
        body: String,
    },

    /// Broker answered a read with a non-success status
    #[error("broker fetch failed with status {status}: {body}")]
    Fetch {
        /// HTTP status returned by the broker
        status: u16,
        /// Response body returned by the broker
        body: String,
    },

    /// Filesystem or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared platform failure
    #[error(transparent)]
    Platform(PlatformError),
}

impl ContractError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this error came from the transport layer.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Platform(err) => err.is_transport(),
            _ => false,
        }
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Transport failures and broker-side 5xx answers are retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Publish { status, .. } | Self::Fetch { status, .. } => *status >= 500,
            other => other.is_transport(),
        }
    }
}

impl From<PlatformError> for ContractError {
    fn from(err: PlatformError) -> Self {
        if err.is_transport() {
            Self::Transport(err.to_string())
        } else {
            Self::Platform(err)
        }
    }
}

impl From<reqwest::Error> for ContractError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::from_request(err).into()
    }
}
