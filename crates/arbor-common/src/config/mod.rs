//! Configuration for arbor.
//!
//! This module provides the settings consumed by page contexts, tree
//! clients and stores.

mod store;

pub use store::{ResetPolicy, StoreSettings};
