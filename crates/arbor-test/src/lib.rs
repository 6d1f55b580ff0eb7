//! # arbor-test
//!
//! Integration tests for arbor.
//!
//! This crate contains:
//! - Map semantics and concurrency tests
//! - Failure injection for the retry and reset paths
//! - Property tests against `std::collections::BTreeMap`

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Failure injection
pub mod chaos;

/// Workload generators
pub mod workload;
