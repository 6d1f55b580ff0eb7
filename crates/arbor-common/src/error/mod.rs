//! Error handling for arbor.
//!
//! This module provides a unified error type and result alias used
//! across the store and its collaborators.

mod store;

pub use store::{ErrorCode, StoreError};

/// Result type alias for arbor operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
