//! Store collaborators.
//!
//! [`MemoryStore`] keeps zones as in-memory text buffers. It implements the
//! full commit protocol (zone shifting, automatic commits, zone deletion)
//! so trees can be committed, reloaded, softened and evacuated without any
//! file I/O.

mod memory;

pub use memory::{MemoryStore, MemoryZones};

/// Page cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Pages served from memory.
    pub hits: u64,
    /// Pages loaded from a zone.
    pub loads: u64,
    /// Loads that failed.
    pub load_failures: u64,
}

impl CacheStats {
    /// Returns the cache hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let requests = self.hits + self.loads;
        if requests == 0 {
            0.0
        } else {
            self.hits as f64 / requests as f64
        }
    }
}
