//! In-memory zone store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arbor_common::{StoreError, StoreResult, StoreSettings, ZoneId, FIRST_ZONE};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::CacheStats;
use crate::context::{Commit, PageContext, PageLoader, StoreContext};
use crate::page::{Page, PageRef};
use crate::tree::TreeView;

type ZoneTable = Arc<RwLock<BTreeMap<ZoneId, String>>>;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
}

// =============================================================================
// Zones
// =============================================================================

/// Zone buffers and the page context reading from them.
pub struct MemoryZones {
    page_split_size: usize,
    zones: ZoneTable,
    active: AtomicU32,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
}

impl MemoryZones {
    fn new(page_split_size: usize) -> Self {
        let mut zones = BTreeMap::new();
        zones.insert(FIRST_ZONE, String::new());
        Self {
            page_split_size,
            zones: Arc::new(RwLock::new(zones)),
            active: AtomicU32::new(FIRST_ZONE),
            counters: Arc::new(Counters::default()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the zone new diffs are appended to.
    pub fn active_zone(&self) -> ZoneId {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the ids of every retained zone, oldest first.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.read().keys().copied().collect()
    }

    /// Returns the byte length of `zone`.
    pub fn zone_len(&self, zone: ZoneId) -> Option<usize> {
        self.zones.read().get(&zone).map(String::len)
    }

    /// Returns a copy of the text of `zone`.
    pub fn zone_text(&self, zone: ZoneId) -> Option<String> {
        self.zones.read().get(&zone).cloned()
    }

    /// Returns the cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
        }
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Starts a fresh active zone; returns its id.
    fn shift(&self, zones: &mut BTreeMap<ZoneId, String>) -> ZoneId {
        let zone = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        zones.insert(zone, String::new());
        info!(zone, "shifted to new zone");
        zone
    }
}

impl fmt::Debug for MemoryZones {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryZones")
            .field("active", &self.active_zone())
            .field("zones", &self.zone_ids())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PageContext for MemoryZones {
    fn page_split_size(&self) -> usize {
        self.page_split_size
    }

    fn open_page_loader(&self, _is_resident: bool) -> StoreResult<Box<dyn PageLoader>> {
        self.check_open()?;
        Ok(Box::new(MemoryLoader {
            zones: Arc::clone(&self.zones),
            counters: Arc::clone(&self.counters),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn hit_page(&self, _page: &Page) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reads pages out of zone buffers.
struct MemoryLoader {
    zones: ZoneTable,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
}

impl MemoryLoader {
    fn read(&self, page_ref: &PageRef) -> StoreResult<Page> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let (zone, base) = (page_ref.zone(), page_ref.base());
        let text = {
            let zones = self.zones.read();
            let text = zones.get(&zone).ok_or(StoreError::ZoneNotFound { zone })?;
            let end = usize::try_from(base).map_err(|_| StoreError::PageNotFound { zone, base })?;
            let start = end
                .checked_sub(page_ref.page_size())
                .ok_or(StoreError::PageNotFound { zone, base })?;
            text.get(start..end)
                .ok_or(StoreError::PageNotFound { zone, base })?
                .to_owned()
        };
        Page::parse(&text, page_ref.context())
    }
}

impl PageLoader for MemoryLoader {
    fn load_page(&mut self, page_ref: &PageRef) -> StoreResult<Page> {
        let result = self.read(page_ref);
        match &result {
            Ok(_) => self.counters.loads.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.load_failures.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

// =============================================================================
// Store
// =============================================================================

/// A store whose zones live in memory.
///
/// # Example
///
/// ```rust
/// use arbor_common::{StoreSettings, Value};
/// use arbor_store::btree::BTree;
/// use arbor_store::context::{Commit, StoreContext};
/// use arbor_store::map::BTreeMap;
/// use arbor_store::store::MemoryStore;
/// use arbor_store::tree::Tree;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new(StoreSettings::default()));
/// let tree = BTree::empty(store.page_context(), 1);
/// let map = BTreeMap::new(tree, store.clone());
///
/// map.put(Value::from("k"), Value::from(1i64)).unwrap();
/// assert!(map.commit(Commit::new()).unwrap());
/// assert!(store.zones().zone_len(1).unwrap() > 0);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    settings: StoreSettings,
    zones: Arc<MemoryZones>,
    last_commit: Mutex<Instant>,
}

impl MemoryStore {
    /// Creates an empty store with one active zone.
    pub fn new(settings: StoreSettings) -> Self {
        let zones = Arc::new(MemoryZones::new(settings.page_split_size));
        Self {
            settings,
            zones,
            last_commit: Mutex::new(Instant::now()),
        }
    }

    /// Returns the zone buffers.
    pub fn zones(&self) -> &Arc<MemoryZones> {
        &self.zones
    }

    /// Returns the cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.zones.stats()
    }

    /// Starts a fresh active zone; returns its id.
    pub fn shift_zone(&self) -> ZoneId {
        self.zones.shift(&mut self.zones.zones.write())
    }

    /// Deletes a retained zone. The active zone is never deleted.
    pub fn delete_zone(&self, zone: ZoneId) -> bool {
        if zone == self.zones.active_zone() {
            return false;
        }
        let removed = self.zones.zones.write().remove(&zone);
        if let Some(text) = &removed {
            info!(zone, bytes = text.len(), "deleted zone");
        }
        removed.is_some()
    }

    /// Returns the oldest retained zone.
    pub fn oldest_zone(&self) -> ZoneId {
        self.zones.zone_ids().first().copied().unwrap_or(FIRST_ZONE)
    }

    /// Rejects every further load and commit.
    pub fn close(&self) {
        self.zones.closed.store(true, Ordering::Release);
        info!("closed memory store");
    }
}

impl StoreContext for MemoryStore {
    fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn page_context(&self) -> Arc<dyn PageContext> {
        self.zones.clone()
    }

    fn tree_did_change(&self, new_tree: &dyn TreeView, _old_tree: &dyn TreeView) -> Option<Commit> {
        if new_tree.is_transient() {
            return None;
        }
        let pending = new_tree.pending_size();
        let pending = usize::try_from(pending).unwrap_or(usize::MAX);
        if pending >= self.settings.auto_commit_size
            || self.last_commit.lock().elapsed() >= self.settings.auto_commit_interval
        {
            return Some(Commit::new());
        }
        None
    }

    fn database_will_commit(&self, commit: Commit) -> StoreResult<Commit> {
        self.zones.check_open()?;
        let active = self.zones.active_zone();
        let size = self.zones.zone_len(active).unwrap_or(0);
        if size >= self.settings.max_zone_size {
            debug!(zone = active, size, "zone full, shifting");
            return Ok(commit.with_shifted(true));
        }
        Ok(commit)
    }

    fn write_zone(
        &self,
        commit: Commit,
        build: &mut dyn FnMut(ZoneId, u64) -> StoreResult<String>,
    ) -> StoreResult<ZoneId> {
        self.zones.check_open()?;
        let mut zones = self.zones.zones.write();
        let zone = if commit.shifted {
            self.zones.shift(&mut zones)
        } else {
            self.zones.active_zone()
        };
        let text = zones.entry(zone).or_default();
        let diff = build(zone, text.len() as u64)?;
        debug!(zone, offset = text.len(), bytes = diff.len(), "appending diff");
        text.push_str(&diff);
        Ok(zone)
    }

    fn database_did_commit(&self, commit: Commit) {
        *self.last_commit.lock() = Instant::now();
        if commit.closed {
            self.close();
        }
    }
}
