//! Ordered map trees.
//!
//! A [`BTree`] maps [`Value`] keys to values in key order. Mutators follow
//! one pipeline:
//!
//! ```text
//! root.<op>(args, version) -> balanced(version) -> evacuated(post, version)
//! ```
//!
//! and return the same tree, by root identity, when nothing changed.

mod node;

use std::cmp::Ordering;

use arbor_common::{StoreResult, Value, Version, ZoneId};

use crate::cursor::{Cursor, Delta, DepthLimited, Entries};
use crate::page::{PageRef, TreeType};
use crate::tree::{Tree, TreeCore, TreeView};

/// Cursor over every entry of a B-tree.
pub type BTreeCursor = Cursor<Entries>;

/// Cursor that summarizes folded subtrees below a depth.
pub type BTreeDepthCursor = Cursor<DepthLimited>;

/// Cursor over the entries of pages changed after a version.
pub type BTreeDeltaCursor = Cursor<Delta<Entries>>;

/// An immutable ordered map.
#[derive(Debug, Clone)]
pub struct BTree {
    core: TreeCore,
}

impl TreeView for BTree {
    fn core(&self) -> &TreeCore {
        &self.core
    }
}

impl Tree for BTree {
    const TREE_TYPE: TreeType = TreeType::BTree;

    fn from_core(core: TreeCore) -> Self {
        Self { core }
    }
}

impl BTree {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &Value) -> StoreResult<Option<Value>> {
        node::get(self.root(), key)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &Value) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns the position of `key` in key order.
    pub fn index_of(&self, key: &Value) -> StoreResult<Option<u64>> {
        node::index_of(self.root(), key)
    }

    /// Returns the entry at position `index`.
    pub fn get_entry(&self, index: u64) -> StoreResult<Option<(Value, Value)>> {
        node::get_entry(self.root(), index)
    }

    /// Returns the entry with the least key.
    pub fn first(&self) -> StoreResult<Option<(Value, Value)>> {
        node::edge(self.root(), Ordering::Less)
    }

    /// Returns the entry with the greatest key.
    pub fn last(&self) -> StoreResult<Option<(Value, Value)>> {
        node::edge(self.root(), Ordering::Greater)
    }

    /// Returns the entry with the least key greater than `key`.
    pub fn next(&self, key: &Value) -> StoreResult<Option<(Value, Value)>> {
        node::next(self.root(), key)
    }

    /// Returns the entry with the greatest key less than `key`.
    pub fn previous(&self, key: &Value) -> StoreResult<Option<(Value, Value)>> {
        node::previous(self.root(), key)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Runs the balance and evacuation steps on a rewritten root.
    fn rewritten(&self, root: StoreResult<PageRef>, version: Version, post: ZoneId) -> StoreResult<Self> {
        let root = root?;
        if root.ptr_eq(self.root()) {
            return Ok(self.clone());
        }
        let root = node::balanced(&root, version)?.evacuated(post, version)?;
        Ok(self.with_root(root))
    }

    /// Stores `value` under `key`. An absent value removes the key.
    pub fn updated(&self, key: Value, value: Value, version: Version, post: ZoneId) -> StoreResult<Self> {
        self.rewritten(node::updated(self.root(), &key, &value, version), version, post)
    }

    /// Removes `key`.
    pub fn removed(&self, key: &Value, version: Version, post: ZoneId) -> StoreResult<Self> {
        self.rewritten(node::updated(self.root(), key, &Value::Absent, version), version, post)
    }

    /// Removes the first `lower` entries.
    pub fn drop(&self, lower: u64, version: Version, post: ZoneId) -> StoreResult<Self> {
        self.rewritten(node::dropped(self.root(), lower, version), version, post)
    }

    /// Keeps only the first `upper` entries.
    pub fn take(&self, upper: u64, version: Version, post: ZoneId) -> StoreResult<Self> {
        self.rewritten(node::taken(self.root(), upper, version), version, post)
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Returns a cursor before the first entry.
    pub fn cursor(&self) -> BTreeCursor {
        Cursor::new(self.root().clone(), Entries)
    }

    /// Returns a cursor before the entry at `index`.
    pub fn cursor_from(&self, index: u64) -> StoreResult<BTreeCursor> {
        let mut cursor = self.cursor();
        cursor.skip(index)?;
        Ok(cursor)
    }

    /// Returns a cursor that yields one `(first key, fold)` entry per folded
    /// subtree at depth `max_depth` or deeper.
    pub fn depth_cursor(&self, max_depth: usize) -> BTreeDepthCursor {
        Cursor::new(self.root().clone(), DepthLimited::new(max_depth))
    }

    /// Returns a cursor over the entries of pages written after `since`.
    pub fn delta_cursor(&self, since: Version) -> BTreeDeltaCursor {
        Cursor::new(self.root().clone(), Delta::new(since, Entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PageContext, StoreContext};
    use crate::store::MemoryStore;
    use arbor_common::StoreSettings;
    use std::sync::Arc;

    fn context() -> Arc<dyn PageContext> {
        MemoryStore::new(StoreSettings::for_testing()).page_context()
    }

    fn filled(count: i64) -> BTree {
        let mut tree = BTree::empty(context(), 1);
        for i in 0..count {
            tree = tree.updated(Value::from(i), Value::from(i * 2), 1, 0).unwrap();
        }
        tree
    }

    #[test]
    fn test_update_and_get() {
        let tree = filled(64);
        assert_eq!(tree.span(), 64);
        assert_eq!(tree.get(&Value::from(10i64)).unwrap(), Some(Value::from(20i64)));
        assert!(tree.contains_key(&Value::from(63i64)).unwrap());
        assert!(!tree.contains_key(&Value::from(64i64)).unwrap());

        let replaced = tree.updated(Value::from(10i64), Value::from("ten"), 2, 0).unwrap();
        assert_eq!(replaced.span(), 64);
        assert_eq!(replaced.get(&Value::from(10i64)).unwrap(), Some(Value::from("ten")));
        assert_eq!(tree.get(&Value::from(10i64)).unwrap(), Some(Value::from(20i64)));
    }

    #[test]
    fn test_no_op_returns_same_tree() {
        let tree = filled(20);
        let same = tree.updated(Value::from(3i64), Value::from(6i64), 2, 0).unwrap();
        assert!(same.same_as(&tree));
        assert!(tree.removed(&Value::from(99i64), 2, 0).unwrap().same_as(&tree));
        assert!(tree.drop(0, 2, 0).unwrap().same_as(&tree));
        assert!(tree.take(20, 2, 0).unwrap().same_as(&tree));
    }

    #[test]
    fn test_removed() {
        let tree = filled(80);
        let removed = tree.removed(&Value::from(40i64), 2, 0).unwrap();
        assert_eq!(removed.span(), 79);
        assert_eq!(removed.get(&Value::from(40i64)).unwrap(), None);
        assert_eq!(removed.next(&Value::from(39i64)).unwrap().unwrap().0, Value::from(41i64));

        let absent = tree.updated(Value::from(41i64), Value::Absent, 2, 0).unwrap();
        assert_eq!(absent.span(), 79);
    }

    #[test]
    fn test_drop_take_preserve_order() {
        let tree = filled(100);
        let dropped = tree.drop(30, 2, 0).unwrap();
        assert_eq!(dropped.span(), 70);
        assert_eq!(dropped.first().unwrap().unwrap().0, Value::from(30i64));
        assert_eq!(dropped.get_entry(0).unwrap().unwrap().0, Value::from(30i64));

        let taken = tree.take(30, 2, 0).unwrap();
        assert_eq!(taken.span(), 30);
        assert_eq!(taken.last().unwrap().unwrap().0, Value::from(29i64));
        assert_eq!(taken.index_of(&Value::from(29i64)).unwrap(), Some(29));
    }

    #[test]
    fn test_cursor_from() {
        let tree = filled(100);
        let mut cursor = tree.cursor_from(42).unwrap();
        assert_eq!(cursor.next().unwrap().unwrap().0, Value::from(42i64));
    }

    #[test]
    fn test_cleared() {
        let tree = filled(100);
        let cleared = tree.cleared(2);
        assert_eq!(cleared.span(), 0);
        assert!(cleared.first().unwrap().is_none());
        assert_eq!(cleared.seed(), tree.seed());
    }

    #[test]
    fn test_commit_and_reload() {
        let store = MemoryStore::new(StoreSettings::for_testing());
        let mut tree = BTree::empty(store.page_context(), 9);
        for i in 0..50i64 {
            tree = tree.updated(Value::from(i), Value::from(-i), 1, 0).unwrap();
        }
        assert!(tree.diff_size(1) > 0);
        assert_eq!(tree.diff_size(2), 0);

        let (diff, committed) = tree.build_diff(1, 1, 1).unwrap();
        assert_eq!(diff.len() as u64, committed.tree_size());
        assert_eq!(committed.pending_size(), 0);
        assert!(committed.root().is_committed());
        assert!(committed.seed().updated >= tree.seed().updated);

        let counted = tree.committed(1, 1, 1).unwrap();
        assert_eq!(counted.root().header(), committed.root().header());

        let demoted = committed.uncommitted(1).unwrap();
        assert!(!demoted.root().is_committed());
        assert_eq!(demoted.span(), 50);
    }
}
