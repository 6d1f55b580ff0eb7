//! Spatial map client.

use std::sync::Arc;

use arbor_common::{StoreResult, Value};

use super::{Committer, MapCursor};
use crate::context::{Commit, StoreContext, TreeDelegate};
use crate::qtree::{BitInterval, QTree, QTreeEntry, Tiles};
use crate::tree::{Tree, TreeView};
use crate::trunk::Trunk;

/// A concurrent spatial map over a [`QTree`].
#[derive(Debug)]
pub struct QTreeMap {
    committer: Committer<QTree>,
}

impl QTreeMap {
    /// Creates a map over a fresh trunk holding `tree`.
    pub fn new(tree: QTree, store: Arc<dyn StoreContext>) -> Self {
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
    pub fn tree(&self) -> QTree {
        self.committer.tree()
    }

    /// Returns the trunk.
    pub fn trunk(&self) -> &Arc<Trunk<QTree>> {
        self.committer.trunk()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> u64 {
        self.tree().span()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value stored under `key` at `(x, y)`.
    pub fn get(&self, key: &Value, x: u64, y: u64) -> StoreResult<Option<Value>> {
        self.committer.read(|tree| tree.get(key, x, y))
    }

    /// Returns the entry stored under `key` wherever it lies.
    pub fn locate(&self, key: &Value) -> StoreResult<Option<QTreeEntry>> {
        self.committer.read(|tree| tree.locate(key))
    }

    /// Stores `value` under `key` at `(x, y)`, returning the previous value.
    /// A key stored at another point is moved to `(x, y)`.
    pub fn put(&self, key: Value, x: u64, y: u64, value: Value) -> StoreResult<Option<Value>> {
        self.committer.update(
            |tree, version, post| {
                let old = match tree.get(&key, x, y)? {
                    Some(old) => Some(old),
                    None => tree.locate(&key)?.map(|entry| entry.value),
                };
                Ok((tree.updated(key.clone(), x, y, value.clone(), version, post)?, old))
            },
            |_, _| {},
        )
    }

    /// Removes `key` from `(x, y)`, returning its value.
    pub fn remove(&self, key: &Value, x: u64, y: u64) -> StoreResult<Option<Value>> {
        self.committer.update(
            |tree, version, post| {
                let old = tree.get(key, x, y)?;
                Ok((tree.removed(key, x, y, version, post)?, old))
            },
            |_, _| {},
        )
    }

    /// Moves `key` from `from` to `to`, storing `value` there.
    pub fn move_entry(&self, key: Value, from: (u64, u64), to: (u64, u64), value: Value) -> StoreResult<()> {
        self.committer.update(
            |tree, version, post| {
                let moved = tree.moved(key.clone(), from.0, from.1, to.0, to.1, value.clone(), version, post)?;
                Ok((moved, ()))
            },
            |_, _| {},
        )
    }

    /// Removes every entry. Returns false if the map was already empty.
    pub fn clear(&self) -> bool {
        self.committer.clear()
    }

    /// Returns a cursor over every entry of the current tree.
    pub fn cursor(&self) -> MapCursor<'_, QTree, Tiles> {
        MapCursor::new(&self.committer, self.tree().cursor())
    }

    /// Returns every entry.
    pub fn entries(&self) -> StoreResult<Vec<QTreeEntry>> {
        self.committer.read(|tree| tree.cursor().into_iter().collect())
    }

    /// Returns the entries within the `x` and `y` tiles.
    pub fn region(&self, x: BitInterval, y: BitInterval) -> StoreResult<Vec<QTreeEntry>> {
        self.committer.read(|tree| tree.cursor_in(x, y).into_iter().collect())
    }

    /// Folds every value with memoization. See [`BTreeMap::reduced`].
    ///
    /// [`BTreeMap::reduced`]: super::BTreeMap::reduced
    pub fn reduced<C, M>(&self, identity: &Value, combine: C, merge: M) -> StoreResult<Value>
    where
        C: Fn(&Value, &Value) -> Value,
        M: Fn(&Value, &Value) -> Value,
    {
        self.committer.update(
            |tree, version, _| {
                let reduced = tree.reduced(identity, &combine, &merge, version)?;
                let fold = reduced.fold().clone();
                Ok((reduced, fold))
            },
            |_, _| {},
        )
    }

    /// Commits the pending diff. Returns false if nothing was written.
    pub fn commit(&self, commit: Commit) -> StoreResult<bool> {
        self.committer.commit(commit)
    }
}
