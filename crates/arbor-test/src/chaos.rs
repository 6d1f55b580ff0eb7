//! Failure injection.
//!
//! [`FlakyStore`] wraps a [`MemoryStore`] and hands out a page context whose
//! loaders fail on demand. Injected failures are ordinary, non-fatal store
//! errors, so they exercise the retry and reset paths of the map clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arbor_common::{StoreError, StoreResult, StoreSettings, ZoneId};
use arbor_store::{Commit, MemoryStore, Page, PageContext, PageLoader, PageRef, StoreContext, TreeView};
use tracing::debug;

#[derive(Debug, Default)]
struct Failures {
    pending: AtomicUsize,
    injected: AtomicUsize,
}

impl Failures {
    /// Consumes one pending failure, if any.
    fn take(&self) -> bool {
        let taken = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            self.injected.fetch_add(1, Ordering::Relaxed);
        }
        taken
    }
}

/// A page context whose loads fail on demand.
#[derive(Debug)]
pub struct FlakyContext {
    inner: Arc<dyn PageContext>,
    failures: Arc<Failures>,
}

impl FlakyContext {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn PageContext>) -> Self {
        Self {
            inner,
            failures: Arc::new(Failures::default()),
        }
    }

    /// Makes the next `count` page loads fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.pending.store(count, Ordering::Release);
    }

    /// Returns the number of failures injected so far.
    pub fn injected(&self) -> usize {
        self.failures.injected.load(Ordering::Relaxed)
    }

    /// Returns the number of failures still pending.
    pub fn pending(&self) -> usize {
        self.failures.pending.load(Ordering::Acquire)
    }
}

impl PageContext for FlakyContext {
    fn page_split_size(&self) -> usize {
        self.inner.page_split_size()
    }

    fn open_page_loader(&self, is_resident: bool) -> StoreResult<Box<dyn PageLoader>> {
        Ok(Box::new(FlakyLoader {
            inner: self.inner.open_page_loader(is_resident)?,
            failures: Arc::clone(&self.failures),
        }))
    }

    fn hit_page(&self, page: &Page) {
        self.inner.hit_page(page);
    }
}

struct FlakyLoader {
    inner: Box<dyn PageLoader>,
    failures: Arc<Failures>,
}

impl PageLoader for FlakyLoader {
    fn load_page(&mut self, page_ref: &PageRef) -> StoreResult<Page> {
        if self.failures.take() {
            debug!(zone = page_ref.zone(), base = page_ref.base(), "injecting load failure");
            return Err(StoreError::PageNotFound {
                zone: page_ref.zone(),
                base: page_ref.base(),
            });
        }
        self.inner.load_page(page_ref)
    }

    fn close(&mut self) -> StoreResult<()> {
        self.inner.close()
    }
}

/// A memory store whose page loads fail on demand.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    context: Arc<FlakyContext>,
}

impl FlakyStore {
    /// Creates a flaky store with `settings`.
    pub fn new(settings: StoreSettings) -> Self {
        let inner = MemoryStore::new(settings);
        let context = Arc::new(FlakyContext::new(inner.page_context()));
        Self { inner, context }
    }

    /// Returns the failure-injecting context.
    pub fn flaky(&self) -> &Arc<FlakyContext> {
        &self.context
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl StoreContext for FlakyStore {
    fn settings(&self) -> &StoreSettings {
        self.inner.settings()
    }

    fn page_context(&self) -> Arc<dyn PageContext> {
        self.context.clone()
    }

    fn tree_did_change(&self, new_tree: &dyn TreeView, old_tree: &dyn TreeView) -> Option<Commit> {
        self.inner.tree_did_change(new_tree, old_tree)
    }

    fn database_will_commit(&self, commit: Commit) -> StoreResult<Commit> {
        self.inner.database_will_commit(commit)
    }

    fn write_zone(
        &self,
        commit: Commit,
        build: &mut dyn FnMut(ZoneId, u64) -> StoreResult<String>,
    ) -> StoreResult<ZoneId> {
        self.inner.write_zone(commit, build)
    }

    fn database_did_commit(&self, commit: Commit) {
        self.inner.database_did_commit(commit);
    }
}
