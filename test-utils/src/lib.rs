//! Shared test utilities for the contract engine crates.
//!
//! This crate provides:
//! - Proptest generators for JSON values and match specs
//! - A recording state-handler registry for provider verification tests
//! - Fixture contracts with sample data

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
