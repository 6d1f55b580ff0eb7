//! Identifier types for arbor.
//!
//! Zones, stems and versions are plain integers on the wire; these aliases
//! name their role at API boundaries.

/// Zone identifier: an on-disk append-only log segment.
///
/// Zone `0` means "no zone" (uncommitted). A page's *post* is also a zone
/// id: the oldest zone its subtree still depends on.
pub type ZoneId = u32;

/// Stem: a nonce separating trees that share the same storage.
pub type Stem = u64;

/// Logical write version. Monotonic per trunk; bumped by every commit.
pub type Version = u64;
