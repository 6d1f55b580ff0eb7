//! Map clients.
//!
//! A map client owns a [`Trunk`] and turns pure tree operations into
//! optimistic updates of it:
//!
//! ```text
//!   snapshot ──▶ op(tree, version, post) ──▶ same tree? ──▶ done
//!      ▲                  │                       │ no
//!      │            StoreError                    ▼
//!      │                  ▼                  update_tree ──ok──▶ notify
//!      │        retry (bounded, did_fail)         │ lost race
//!      └──────────────────┴───────────────────────┘
//! ```
//!
//! Losing the compare-and-swap is not an error and is retried without
//! limit. Store errors are retried at most `max_retries` times; on the last
//! retry the client gives up on its contents and, if the failure policy
//! allows, resets itself to the empty tree.

mod btree_map;
mod cursor;
mod qtree_map;
mod utree_value;

pub use btree_map::BTreeMap;
pub use cursor::{MapBackward, MapCursor, MapForward};
pub use qtree_map::QTreeMap;
pub use utree_value::UTreeValue;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arbor_common::{StoreError, StoreResult, Version, ZoneId};
use tokio::task::{self, JoinHandle};
use tracing::{error, trace, warn};

use crate::context::{Commit, StoreContext, TreeDelegate};
use crate::tree::Tree;
use crate::trunk::{Trunk, TrunkSnapshot};

/// The optimistic update engine shared by every map client.
pub struct Committer<T, D: ?Sized = dyn TreeDelegate> {
    trunk: Arc<Trunk<T>>,
    store: Arc<dyn StoreContext>,
    delegate: Option<Arc<D>>,
}

impl<T: Tree, D: TreeDelegate + ?Sized> Committer<T, D> {
    /// Creates a committer over a fresh trunk holding `tree`.
    pub fn new(tree: T, store: Arc<dyn StoreContext>) -> Self {
        Self::with_trunk(Arc::new(Trunk::new(tree)), store)
    }

    /// Creates a committer over an existing trunk.
    pub fn with_trunk(trunk: Arc<Trunk<T>>, store: Arc<dyn StoreContext>) -> Self {
        Self {
            trunk,
            store,
            delegate: None,
        }
    }

    /// Sets the delegate notified of changes.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<D>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Returns the trunk.
    pub fn trunk(&self) -> &Arc<Trunk<T>> {
        &self.trunk
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn StoreContext> {
        &self.store
    }

    /// Returns the current tree.
    pub fn tree(&self) -> T {
        self.trunk.tree()
    }

    /// Runs `op` against the current tree and installs the tree it returns.
    ///
    /// `notify` runs once, after a changed tree was installed. If `op`
    /// returns the tree it was given, nothing is installed and no one is
    /// notified.
    pub fn update<R>(
        &self,
        mut op: impl FnMut(&T, Version, ZoneId) -> StoreResult<(T, R)>,
        notify: impl FnOnce(&D, &R),
    ) -> StoreResult<R> {
        let mut retries = 0;
        loop {
            let TrunkSnapshot { tree, version, post } = self.trunk.snapshot();
            match op(&tree, version, post) {
                Ok((new_tree, result)) => {
                    if new_tree.same_as(&tree) {
                        return Ok(result);
                    }
                    if self.trunk.update_tree(&tree, new_tree.clone(), version) {
                        if let Some(delegate) = &self.delegate {
                            notify(delegate, &result);
                        }
                        self.did_change(&new_tree, &tree);
                        return Ok(result);
                    }
                    trace!(tree = %T::TREE_TYPE, version, "trunk moved, recomputing");
                }
                Err(e) => self.recover(e, &mut retries)?,
            }
        }
    }

    /// Runs `op` against the current tree, re-reading the tree on store
    /// errors.
    pub fn read<R>(&self, mut op: impl FnMut(&T) -> StoreResult<R>) -> StoreResult<R> {
        let mut retries = 0;
        loop {
            match op(&self.trunk.tree()) {
                Ok(result) => return Ok(result),
                Err(e) => self.recover(e, &mut retries)?,
            }
        }
    }

    /// Decides whether a failed attempt is retried.
    fn recover(&self, error: StoreError, retries: &mut usize) -> StoreResult<()> {
        let max_retries = self.store.settings().max_retries;
        if error.is_fatal() || *retries >= max_retries {
            return Err(error);
        }
        *retries += 1;
        warn!(
            tree = %T::TREE_TYPE,
            error = %error,
            attempt = *retries,
            max_retries,
            "store error, retrying"
        );
        if *retries == max_retries {
            self.did_fail(&error);
        }
        Ok(())
    }

    /// Gives up on the tree's contents after repeated store errors.
    fn did_fail(&self, failure: &StoreError) {
        let tree = self.trunk.tree();
        let policy = self.store.settings().failure_policy;
        let reset = policy.allows_reset(tree.is_transient());
        error!(
            tree = %T::TREE_TYPE,
            stem = tree.seed().stem,
            error = %failure,
            ?policy,
            reset,
            "store retries exhausted"
        );
        if reset {
            self.clear();
        }
    }

    /// Replaces the tree with the empty tree. Returns false if it was
    /// already empty.
    pub fn clear(&self) -> bool {
        loop {
            let TrunkSnapshot { tree, version, .. } = self.trunk.snapshot();
            let cleared = tree.cleared(version);
            if cleared.same_as(&tree) {
                return false;
            }
            if self.trunk.update_tree(&tree, cleared.clone(), version) {
                if let Some(delegate) = &self.delegate {
                    delegate.tree_did_clear();
                }
                self.did_change(&cleared, &tree);
                return true;
            }
        }
    }

    fn did_change(&self, new_tree: &T, old_tree: &T) {
        if let Some(delegate) = &self.delegate {
            delegate.tree_did_change(new_tree, old_tree);
        }
        let Some(commit) = self.store.tree_did_change(new_tree, old_tree) else {
            return;
        };
        if let Err(e) = self.commit(commit) {
            warn!(tree = %T::TREE_TYPE, error = %e, "automatic commit failed");
        }
    }

    /// Commits the pending diff. Returns false if nothing was written.
    pub fn commit(&self, commit: Commit) -> StoreResult<bool> {
        self.trunk.commit(self.store.as_ref(), commit)
    }

    /// Commits the pending diff on the blocking thread pool.
    pub async fn commit_async(&self, commit: Commit) -> StoreResult<bool> {
        let trunk = Arc::clone(&self.trunk);
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || trunk.commit(store.as_ref(), commit))
            .await
            .map_err(|e| StoreError::fatal(format!("commit task failed: {e}")))?
    }

    /// Raises the post to `post` and rewrites every page that still
    /// depends on an older zone.
    pub fn evacuate(&self, post: ZoneId) -> StoreResult<()> {
        self.trunk.set_post(post);
        self.update(
            |tree, version, post| Ok((tree.evacuated(post, version)?, ())),
            |_, _| {},
        )
    }

    /// Demotes committed pages to the weak cache tier.
    pub fn soften(&self) {
        self.trunk.soften();
    }

    /// Spawns a task softening the tree at the store's soften interval.
    pub fn spawn_softener(&self) -> JoinHandle<()> {
        let interval: Duration = self.store.settings().soften_interval;
        Trunk::spawn_softener(&self.trunk, interval)
    }
}

impl<T: Tree, D: ?Sized> fmt::Debug for Committer<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Committer")
            .field("trunk", &self.trunk)
            .field("delegate", &self.delegate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tree::TreeView;
    use crate::utree::UTree;
    use arbor_common::{ResetPolicy, StoreSettings, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn committer(settings: StoreSettings) -> Committer<UTree> {
        let store = Arc::new(MemoryStore::new(settings));
        let tree = UTree::empty(store.page_context(), 1);
        Committer::new(tree, store)
    }

    fn set(committer: &Committer<UTree>, value: i64) {
        committer
            .update(
                |tree, version, post| Ok((tree.updated(Value::from(value), version, post)?, ())),
                |_, _| {},
            )
            .unwrap();
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let committer = committer(StoreSettings::for_testing());
        let attempts = AtomicUsize::new(0);
        let err = committer
            .read(|_| -> StoreResult<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::fatal("disk gone"))
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retries_then_resets() {
        let committer = committer(StoreSettings::for_testing());
        set(&committer, 7);
        let attempts = AtomicUsize::new(0);
        let value = committer
            .read(|tree| {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(StoreError::ZoneNotFound { zone: 9 });
                }
                tree.get()
            })
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(value, Value::Absent);
    }

    #[test]
    fn test_exhausted_retries_propagate() {
        let committer = committer(StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never));
        set(&committer, 7);
        let attempts = AtomicUsize::new(0);
        let err = committer
            .read(|_| -> StoreResult<()> {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::ZoneNotFound { zone: 9 })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::ZoneNotFound { zone: 9 }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(committer.tree().get().unwrap(), Value::from(7i64));
    }

    #[test]
    fn test_unchanged_tree_is_not_installed() {
        let committer = committer(StoreSettings::for_testing());
        set(&committer, 1);
        let before = committer.tree();
        set(&committer, 1);
        assert!(committer.tree().same_as(&before));
    }

    #[test]
    fn test_clear() {
        let committer = committer(StoreSettings::for_testing());
        assert!(!committer.clear());
        set(&committer, 3);
        assert!(committer.clear());
        assert_eq!(committer.tree().span(), 0);
    }
}
