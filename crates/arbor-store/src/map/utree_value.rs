//! Single value client.

use std::sync::Arc;

use arbor_common::{StoreResult, Value};

use super::Committer;
use crate::context::{Commit, StoreContext, TreeDelegate};
use crate::trunk::Trunk;
use crate::utree::UTree;

/// A concurrent register over a [`UTree`].
#[derive(Debug)]
pub struct UTreeValue {
    committer: Committer<UTree>,
}

impl UTreeValue {
    /// Creates a register over a fresh trunk holding `tree`.
    pub fn new(tree: UTree, store: Arc<dyn StoreContext>) -> Self {
        Self {
            committer: Committer::new(tree, store),
        }
    }

    /// Sets the delegate notified of every change.
    #[must_use]
    pub fn with_delegate(self, delegate: Arc<dyn TreeDelegate>) -> Self {
        Self {
            committer: self.committer.with_delegate(delegate),
        }
    }

    /// Returns the current tree.
    pub fn tree(&self) -> UTree {
        self.committer.tree()
    }

    /// Returns the trunk.
    pub fn trunk(&self) -> &Arc<Trunk<UTree>> {
        self.committer.trunk()
    }

    /// Returns the value; `Absent` when unset.
    pub fn get(&self) -> StoreResult<Value> {
        self.committer.read(UTree::get)
    }

    /// Replaces the value, returning the previous one.
    pub fn set(&self, value: Value) -> StoreResult<Value> {
        self.committer.update(
            |tree, version, post| {
                let old = tree.get()?;
                Ok((tree.updated(value.clone(), version, post)?, old))
            },
            |_, _| {},
        )
    }

    /// Unsets the value. Returns false if it was already unset.
    pub fn clear(&self) -> bool {
        self.committer.clear()
    }

    /// Commits the pending diff. Returns false if nothing was written.
    pub fn commit(&self, commit: Commit) -> StoreResult<bool> {
        self.committer.commit(commit)
    }
}
