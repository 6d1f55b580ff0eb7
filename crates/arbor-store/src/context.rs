//! Collaborator interfaces.
//!
//! Trees never perform I/O themselves. Page loading, split/merge policy and
//! commit triggers are supplied by the store through these traits:
//!
//! ```text
//! ┌──────────────┐  open_page_loader   ┌──────────────┐
//! │   PageRef    │ ──────────────────▶ │ PageContext  │
//! │  (unloaded)  │ ◀── load_page ───── │ + PageLoader │
//! └──────────────┘                     └──────────────┘
//!        │ mutation                           ▲
//!        ▼                                    │ page_context
//! ┌──────────────┐  tree_did_change    ┌──────────────┐
//! │  map client  │ ──────────────────▶ │ StoreContext │
//! │  (Committer) │ ◀── Option<Commit>  │  write_zone  │
//! └──────────────┘                     └──────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use arbor_common::{StoreResult, StoreSettings, Value, ZoneId};
use tracing::warn;

use crate::page::{Page, PageRef};
use crate::tree::TreeView;

// =============================================================================
// Page Loading
// =============================================================================

/// Supplies page loaders, cache admission and the split/merge policy.
pub trait PageContext: Send + Sync + fmt::Debug {
    /// Encoded page size above which pages split.
    fn page_split_size(&self) -> usize;

    /// Opens a loader for a batch of page reads.
    ///
    /// `is_resident` is true when the loaded pages will be held for the
    /// lifetime of the tree.
    fn open_page_loader(&self, is_resident: bool) -> StoreResult<Box<dyn PageLoader>>;

    /// Called when a page is served from a page reference's cache slot.
    fn hit_page(&self, _page: &Page) {}

    /// Returns true if a page of `page_size` encoded bytes should split.
    fn page_should_split(&self, page: &Page, page_size: usize) -> bool {
        page_size > self.page_split_size() && page.arity() > 1
    }

    /// Returns true if a page of `page_size` encoded bytes should merge with
    /// a sibling.
    fn page_should_merge(&self, _page: &Page, page_size: usize) -> bool {
        page_size < self.page_split_size() / 2
    }
}

/// Materializes committed pages from storage.
pub trait PageLoader: Send {
    /// Loads the page a committed reference points at.
    fn load_page(&mut self, page_ref: &PageRef) -> StoreResult<Page>;

    /// Releases the loader's resources.
    fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Scoped page loader.
///
/// The wrapped loader is closed exactly once: explicitly through
/// [`LoaderGuard::close`], or when the guard is dropped on any other exit
/// path.
pub struct LoaderGuard {
    loader: Option<Box<dyn PageLoader>>,
}

impl LoaderGuard {
    /// Opens a loader from `context`.
    pub fn open(context: &dyn PageContext, is_resident: bool) -> StoreResult<Self> {
        Ok(Self {
            loader: Some(context.open_page_loader(is_resident)?),
        })
    }

    /// Loads one page.
    pub fn load_page(&mut self, page_ref: &PageRef) -> StoreResult<Page> {
        match self.loader.as_mut() {
            Some(loader) => loader.load_page(page_ref),
            None => Err(arbor_common::StoreError::Closed),
        }
    }

    /// Closes the loader, reporting any close failure.
    pub fn close(mut self) -> StoreResult<()> {
        match self.loader.take() {
            Some(mut loader) => loader.close(),
            None => Ok(()),
        }
    }
}

impl Drop for LoaderGuard {
    fn drop(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            if let Err(e) = loader.close() {
                warn!(error = %e, "failed to close page loader");
            }
        }
    }
}

impl fmt::Debug for LoaderGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderGuard")
            .field("open", &self.loader.is_some())
            .finish()
    }
}

// =============================================================================
// Commits
// =============================================================================

/// A commit request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Commit {
    /// The store is closing; this is the final commit.
    pub closed: bool,
    /// Commit even when no diff is pending.
    pub forced: bool,
    /// Start a fresh zone before writing.
    pub shifted: bool,
}

impl Commit {
    /// A plain commit.
    pub const fn new() -> Self {
        Self {
            closed: false,
            forced: false,
            shifted: false,
        }
    }

    /// A forced commit.
    pub const fn forced() -> Self {
        Self {
            closed: false,
            forced: true,
            shifted: false,
        }
    }

    /// Marks the commit as closing the store.
    #[must_use]
    pub const fn with_closed(mut self, closed: bool) -> Self {
        self.closed = closed;
        self
    }

    /// Marks the commit as forced.
    #[must_use]
    pub const fn with_forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Marks the commit as shifting to a fresh zone.
    #[must_use]
    pub const fn with_shifted(mut self, shifted: bool) -> Self {
        self.shifted = shifted;
        self
    }

    /// Combines two commit requests.
    #[must_use]
    pub const fn merged(self, other: Self) -> Self {
        Self {
            closed: self.closed || other.closed,
            forced: self.forced || other.forced,
            shifted: self.shifted || other.shifted,
        }
    }
}

/// The store a tree client commits into.
pub trait StoreContext: Send + Sync {
    /// Settings shared by the store's trees.
    fn settings(&self) -> &StoreSettings;

    /// Context handed to every page reference the store's trees create.
    fn page_context(&self) -> Arc<dyn PageContext>;

    /// Called after a client swapped in a new tree. Returning a commit
    /// requests that the client commit now.
    fn tree_did_change(&self, _new_tree: &dyn TreeView, _old_tree: &dyn TreeView) -> Option<Commit> {
        None
    }

    /// Called before a commit writes its diff. The store may adjust the
    /// request, for example to shift into a fresh zone.
    fn database_will_commit(&self, commit: Commit) -> StoreResult<Commit> {
        Ok(commit)
    }

    /// Appends a diff to the active zone.
    ///
    /// `build` receives the zone id and the offset the diff will start at,
    /// and returns the diff text. Returns the zone that was written.
    fn write_zone(
        &self,
        commit: Commit,
        build: &mut dyn FnMut(ZoneId, u64) -> StoreResult<String>,
    ) -> StoreResult<ZoneId>;

    /// Called after a committed tree has been installed.
    fn database_did_commit(&self, _commit: Commit) {}
}

// =============================================================================
// Delegates
// =============================================================================

/// Observer of tree changes made through a map client.
pub trait TreeDelegate: Send + Sync {
    /// A new tree replaced `old_tree`.
    fn tree_did_change(&self, _new_tree: &dyn TreeView, _old_tree: &dyn TreeView) {}

    /// The tree was cleared, explicitly or by failure recovery.
    fn tree_did_clear(&self) {}
}

/// Observer of ordered-map changes.
pub trait BTreeDelegate: TreeDelegate {
    /// `key` was set to `new_value`; it previously held `old_value`.
    fn btree_did_update(&self, _key: &Value, _new_value: &Value, _old_value: &Value) {}

    /// `key` was removed; it held `old_value`.
    fn btree_did_remove(&self, _key: &Value, _old_value: &Value) {}

    /// The first `lower` entries were dropped.
    fn btree_did_drop(&self, _lower: u64) {}

    /// All but the first `upper` entries were dropped.
    fn btree_did_take(&self, _upper: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingLoader {
        closes: Arc<AtomicUsize>,
    }

    impl PageLoader for CountingLoader {
        fn load_page(&mut self, _page_ref: &PageRef) -> StoreResult<Page> {
            Err(arbor_common::StoreError::fatal("not used"))
        }

        fn close(&mut self) -> StoreResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct CountingContext {
        closes: Arc<AtomicUsize>,
    }

    impl PageContext for CountingContext {
        fn page_split_size(&self) -> usize {
            128
        }

        fn open_page_loader(&self, _is_resident: bool) -> StoreResult<Box<dyn PageLoader>> {
            Ok(Box::new(CountingLoader {
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    #[test]
    fn test_loader_guard_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let context = CountingContext {
            closes: Arc::clone(&closes),
        };
        {
            let _guard = LoaderGuard::open(&context, false).unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let guard = LoaderGuard::open(&context, true).unwrap();
        guard.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_commit_flags() {
        let commit = Commit::new().with_shifted(true).merged(Commit::forced());
        assert!(commit.shifted);
        assert!(commit.forced);
        assert!(!commit.closed);
        assert_eq!(Commit::default(), Commit::new());
    }
}
