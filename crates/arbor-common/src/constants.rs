//! System-wide constants for arbor.
//!
//! These are the defaults behind [`StoreSettings`](crate::StoreSettings) and
//! the fixed limits of the textual page encoding.

// =============================================================================
// Page Constants
// =============================================================================

/// Default page split size in bytes (4 KB).
///
/// A page whose encoded size exceeds this is split; a page smaller than half
/// of it is merged with a sibling.
pub const DEFAULT_PAGE_SPLIT_SIZE: usize = 4 * 1024;

/// Minimum configurable page split size in bytes.
///
/// Below this a single header plus one slot already overflows the page.
pub const MIN_PAGE_SPLIT_SIZE: usize = 64;

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of retries after a store error before failing.
pub const DEFAULT_MAX_RETRIES: usize = 2;

// =============================================================================
// Commit Constants
// =============================================================================

/// Default size of pending diff bytes that triggers an automatic commit (1 MB).
pub const DEFAULT_AUTO_COMMIT_SIZE: usize = 1024 * 1024;

/// Default interval between automatic commits, in milliseconds.
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 10_000;

/// Default maximum zone size before a commit shifts to a new zone (64 MB).
pub const DEFAULT_MAX_ZONE_SIZE: usize = 64 * 1024 * 1024;

/// Default interval between background soften passes, in milliseconds.
pub const DEFAULT_SOFTEN_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// Identity Constants
// =============================================================================

/// Zone id meaning "no zone": the page has not been committed.
pub const NO_ZONE: u32 = 0;

/// The first zone id handed out by a fresh store.
pub const FIRST_ZONE: u32 = 1;
