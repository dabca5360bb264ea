//! On-disk contract document format.
//!
//! Documents are pretty-printed JSON. Decoding checks the format version
//! before anything else so a document from a newer writer fails with a
//! clear message instead of a confusing field error.

use crate::contract::{ContractDocument, FORMAT_VERSION};
use crate::error::FormatError;
use serde_json::Value;

/// Encode a document.
///
/// # Errors
///
/// Fails if a literal object in the document uses the reserved matcher key.
pub fn serialize(document: &ContractDocument) -> Result<Vec<u8>, FormatError> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode and validate a document.
///
/// # Errors
///
/// - [`FormatError::MissingVersion`] / [`FormatError::InvalidVersion`] when
///   the version tag is absent or unreadable
/// - [`FormatError::UnsupportedVersion`] when it is newer than
///   [`FORMAT_VERSION`]
/// - [`FormatError::Json`] for malformed JSON or matcher encodings
/// - [`FormatError::Invalid`] when the decoded document breaks an invariant
pub fn deserialize(bytes: &[u8]) -> Result<ContractDocument, FormatError> {
    let value: Value = serde_json::from_slice(bytes)?;
    check_version(&value)?;
    let document: ContractDocument = serde_json::from_value(value)?;
    document.validate()?;
    Ok(document)
}

fn check_version(value: &Value) -> Result<(), FormatError> {
    let raw = value
        .pointer("/metadata/pactSpecification/version")
        .ok_or(FormatError::MissingVersion)?;
    let found = raw
        .as_str()
        .ok_or_else(|| FormatError::InvalidVersion(raw.to_string()))?;

    let supported = parse_version(FORMAT_VERSION)?;
    if parse_version(found)? > supported {
        return Err(FormatError::UnsupportedVersion {
            found: found.to_string(),
            supported: FORMAT_VERSION.to_string(),
        });
    }
    Ok(())
}

/// Parse `major[.minor[.patch]]` into a comparable `(major, minor)` pair.
/// Patch levels never change the format.
fn parse_version(raw: &str) -> Result<(u32, u32), FormatError> {
    let invalid = || FormatError::InvalidVersion(raw.to_string());
    let mut parts = raw.trim().split('.');
    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor = match parts.next() {
        Some(p) => p.parse().map_err(|_| invalid())?,
        None => 0,
    };
    if let Some(patch) = parts.next() {
        patch.parse::<u32>().map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok((major, minor))
}
