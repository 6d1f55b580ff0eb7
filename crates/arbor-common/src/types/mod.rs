//! Type definitions for arbor.
//!
//! This module contains the core value and identifier types shared by the
//! store and its collaborators.

mod ids;
mod timestamps;
mod value;

pub use ids::{Stem, Version, ZoneId};
pub use timestamps::Timestamp;
pub use value::Value;
