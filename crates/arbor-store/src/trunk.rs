//! The shared mutable root of a tree.
//!
//! A [`Trunk`] holds the current tree together with the write version and
//! the post watermark. It is the only point where concurrent writers meet:
//! writers compute new trees without holding anything, then swap them in
//! with [`Trunk::update_tree`], which succeeds only if neither the tree nor
//! the version moved in the meantime.
//!
//! The state lock is held for the pointer exchange only, never while a tree
//! is computed, so a writer never waits on another writer's work.
//!
//! ## Versions
//!
//! Writers stamp new pages with the trunk's current version. A commit
//! writes every page up to that version, installs the committed tree and
//! bumps the version, so pages written afterwards belong to the next diff.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arbor_common::{StoreError, StoreResult, Version, ZoneId};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::context::{Commit, StoreContext};
use crate::page::CommitPairs;
use crate::tree::Tree;

/// A consistent view of a trunk's state.
#[derive(Debug, Clone)]
pub struct TrunkSnapshot<T> {
    /// The current tree.
    pub tree: T,
    /// The version new pages are written at.
    pub version: Version,
    /// The evacuation watermark.
    pub post: ZoneId,
}

/// The shared mutable root of a tree.
#[derive(Debug)]
pub struct Trunk<T> {
    state: Mutex<TrunkSnapshot<T>>,
    /// Serializes commits; writers never take it.
    commit_lock: Mutex<()>,
}

impl<T: Tree> Trunk<T> {
    /// Creates a trunk at version 1.
    pub fn new(tree: T) -> Self {
        Self::with_version(tree, 1)
    }

    /// Creates a trunk at `version`.
    pub fn with_version(tree: T, version: Version) -> Self {
        Self {
            state: Mutex::new(TrunkSnapshot {
                tree,
                version,
                post: 0,
            }),
            commit_lock: Mutex::new(()),
        }
    }

    /// Returns the tree, version and post read together.
    pub fn snapshot(&self) -> TrunkSnapshot<T> {
        self.state.lock().clone()
    }

    /// Returns the current tree.
    pub fn tree(&self) -> T {
        self.state.lock().tree.clone()
    }

    /// Returns the current write version.
    pub fn version(&self) -> Version {
        self.state.lock().version
    }

    /// Returns the evacuation watermark.
    pub fn post(&self) -> ZoneId {
        self.state.lock().post
    }

    /// Raises the evacuation watermark; it never moves backwards.
    pub fn set_post(&self, post: ZoneId) {
        let mut state = self.state.lock();
        state.post = state.post.max(post);
    }

    /// Replaces `old_tree` with `new_tree` if `old_tree` is still current and
    /// the version is still `version`.
    pub fn update_tree(&self, old_tree: &T, new_tree: T, version: Version) -> bool {
        let mut state = self.state.lock();
        if state.version != version || !state.tree.same_as(old_tree) {
            return false;
        }
        state.tree = new_tree;
        true
    }

    /// Installs a committed tree and opens the next version.
    fn install_commit(&self, old_tree: &T, committed: T, version: Version) -> bool {
        let mut state = self.state.lock();
        if state.version != version || !state.tree.same_as(old_tree) {
            return false;
        }
        state.tree = committed;
        state.version = version + 1;
        true
    }

    /// Writes the pending diff to `store` and installs the committed tree.
    ///
    /// Returns false when nothing was written: the tree is transient, or no
    /// diff is pending and the commit is not forced.
    ///
    /// The diff is written once. If a writer swaps in a new tree while it is
    /// being written, the new tree is rebased onto the committed pages it
    /// shares with the written one, and only the install is retried.
    pub fn commit(&self, store: &dyn StoreContext, commit: Commit) -> StoreResult<bool> {
        let _guard = self.commit_lock.lock();
        let TrunkSnapshot { tree, version, .. } = self.snapshot();
        if tree.is_transient() || (tree.pending_size() == 0 && !commit.forced) {
            return Ok(false);
        }
        let commit = store.database_will_commit(commit)?;
        let mut committed = None;
        let zone = store.write_zone(commit, &mut |zone: ZoneId, base: u64| {
            let (diff, tree) = tree.build_diff(zone, base, version)?;
            committed = Some(tree);
            Ok(diff)
        })?;
        let committed = committed.ok_or_else(|| StoreError::fatal("store wrote no diff"))?;

        let mut installed = self.install_commit(&tree, committed.clone(), version);
        if !installed {
            let mut pairs = CommitPairs::default();
            tree.root().pair_committed(committed.root(), &mut pairs);
            while !installed {
                // commits are serialized, so only writers can have moved the trunk
                let current = self.tree();
                trace!(version, pages = pairs.len(), "tree changed during commit, rebasing");
                let rebased = current.with_root(current.root().rebased(&pairs)?);
                installed = self.install_commit(&current, rebased, version);
            }
        }
        debug!(
            tree = %T::TREE_TYPE,
            stem = tree.seed().stem,
            zone,
            version,
            "committed tree"
        );
        store.database_did_commit(commit);
        Ok(true)
    }

    /// Demotes committed pages to the weak cache tier.
    pub fn soften(&self) {
        let TrunkSnapshot { tree, version, .. } = self.snapshot();
        trace!(version, "softening tree");
        tree.soften(version);
    }

    /// Spawns a task that softens the tree every `interval`. The task ends
    /// once the trunk is dropped.
    pub fn spawn_softener(trunk: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let trunk: Weak<Self> = Arc::downgrade(trunk);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(trunk) = trunk.upgrade() else {
                    break;
                };
                trunk.soften();
            }
        })
    }
}
