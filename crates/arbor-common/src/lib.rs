//! # arbor-common
//!
//! Common types, errors, and settings for the arbor page-tree engine.
//!
//! This crate provides the foundational pieces shared by the store and its
//! collaborators:
//!
//! - **Types**: the [`Value`] domain for keys, values and folds, zone and
//!   stem identifiers, and [`Timestamp`]
//! - **Errors**: unified error handling with [`StoreError`]
//! - **Config**: [`StoreSettings`] for thresholds, retries and commit policy
//! - **Text**: the byte-exact textual codec primitives used by page encodings
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::{StoreResult, Value};
//!
//! fn example() -> StoreResult<()> {
//!     let key = Value::from("hello");
//!     let parsed = Value::parse(&key.to_string())?;
//!     assert_eq!(parsed, key);
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod text;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{ResetPolicy, StoreSettings};
pub use constants::*;
pub use error::{ErrorCode, StoreError, StoreResult};
pub use types::{Stem, Timestamp, Value, Version, ZoneId};
