//! Ordered map client.

use std::sync::Arc;

use arbor_common::{StoreResult, Value, ZoneId};
use tokio::task::JoinHandle;

use super::{Committer, MapCursor};
use crate::btree::BTree;
use crate::context::{BTreeDelegate, Commit, StoreContext};
use crate::cursor::Entries;
use crate::tree::{Tree, TreeView};
use crate::trunk::Trunk;

/// A concurrent ordered map over a [`BTree`].
///
/// Every method may be called from any number of threads. Writers never
/// block one another; see the [module documentation](super) for the retry
/// rules.
///
/// # Example
///
/// ```rust
/// use arbor_common::{StoreSettings, Value};
/// use arbor_store::btree::BTree;
/// use arbor_store::context::StoreContext;
/// use arbor_store::map::BTreeMap;
/// use arbor_store::store::MemoryStore;
/// use arbor_store::tree::Tree;
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new(StoreSettings::for_testing()));
/// let map = BTreeMap::new(BTree::empty(store.page_context(), 1), store);
///
/// assert_eq!(map.put(Value::from(1i64), Value::from("a")).unwrap(), None);
/// assert_eq!(map.put(Value::from(1i64), Value::from("b")).unwrap(), Some(Value::from("a")));
/// assert_eq!(map.get(&Value::from(1i64)).unwrap(), Some(Value::from("b")));
/// assert_eq!(map.len(), 1);
/// ```
#[derive(Debug)]
pub struct BTreeMap {
    committer: Committer<BTree, dyn BTreeDelegate>,
}

impl BTreeMap {
    /// Creates a map over a fresh trunk holding `tree`.
    pub fn new(tree: BTree, store: Arc<dyn StoreContext>) -> Self {
        Self {
            committer: Committer::new(tree, store),
        }
    }

    /// Creates a map over a shared trunk.
    pub fn with_trunk(trunk: Arc<Trunk<BTree>>, store: Arc<dyn StoreContext>) -> Self {
        Self {
            committer: Committer::with_trunk(trunk, store),
        }
    }

    /// Sets the delegate notified of every change.
    #[must_use]
    pub fn with_delegate(self, delegate: Arc<dyn BTreeDelegate>) -> Self {
        Self {
            committer: self.committer.with_delegate(delegate),
        }
    }

    /// Returns the current tree.
    pub fn tree(&self) -> BTree {
        self.committer.tree()
    }

    /// Returns the trunk.
    pub fn trunk(&self) -> &Arc<Trunk<BTree>> {
        self.committer.trunk()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &Value) -> StoreResult<Option<Value>> {
        self.committer.read(|tree| tree.get(key))
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &Value) -> StoreResult<bool> {
        self.committer.read(|tree| tree.contains_key(key))
    }

    /// Returns the number of entries.
    pub fn len(&self) -> u64 {
        self.tree().span()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entry with the least key.
    pub fn first(&self) -> StoreResult<Option<(Value, Value)>> {
        self.committer.read(BTree::first)
    }

    /// Returns the entry with the greatest key.
    pub fn last(&self) -> StoreResult<Option<(Value, Value)>> {
        self.committer.read(BTree::last)
    }

    /// Returns the entry with the least key greater than `key`.
    pub fn next(&self, key: &Value) -> StoreResult<Option<(Value, Value)>> {
        self.committer.read(|tree| tree.next(key))
    }

    /// Returns the entry with the greatest key less than `key`.
    pub fn previous(&self, key: &Value) -> StoreResult<Option<(Value, Value)>> {
        self.committer.read(|tree| tree.previous(key))
    }

    /// Returns the position of `key` in key order.
    pub fn index_of(&self, key: &Value) -> StoreResult<Option<u64>> {
        self.committer.read(|tree| tree.index_of(key))
    }

    /// Returns the entry at position `index`.
    pub fn get_entry(&self, index: u64) -> StoreResult<Option<(Value, Value)>> {
        self.committer.read(|tree| tree.get_entry(index))
    }

    /// Returns a cursor over the current tree. The cursor sees the tree as
    /// it is now until a store error makes it reopen over the latest tree.
    pub fn cursor(&self) -> MapCursor<'_, BTree, Entries, dyn BTreeDelegate> {
        MapCursor::new(&self.committer, self.tree().cursor())
    }

    /// Returns every entry in key order.
    pub fn entries(&self) -> StoreResult<Vec<(Value, Value)>> {
        self.committer.read(|tree| tree.cursor().into_iter().collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Stores `value` under `key`, returning the previous value. An absent
    /// value removes the key.
    pub fn put(&self, key: Value, value: Value) -> StoreResult<Option<Value>> {
        if !value.is_defined() {
            return self.remove(&key);
        }
        self.committer.update(
            |tree, version, post| {
                let old = tree.get(&key)?;
                Ok((tree.updated(key.clone(), value.clone(), version, post)?, old))
            },
            |delegate, old| {
                delegate.btree_did_update(&key, &value, old.as_ref().unwrap_or(&Value::Absent));
            },
        )
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &Value) -> StoreResult<Option<Value>> {
        self.committer.update(
            |tree, version, post| {
                let old = tree.get(key)?;
                Ok((tree.removed(key, version, post)?, old))
            },
            |delegate, old| {
                if let Some(old) = old {
                    delegate.btree_did_remove(key, old);
                }
            },
        )
    }

    /// Removes the first `lower` entries.
    pub fn drop(&self, lower: u64) -> StoreResult<()> {
        self.committer.update(
            |tree, version, post| Ok((tree.drop(lower, version, post)?, ())),
            |delegate, _| delegate.btree_did_drop(lower),
        )
    }

    /// Keeps only the first `upper` entries.
    pub fn take(&self, upper: u64) -> StoreResult<()> {
        self.committer.update(
            |tree, version, post| Ok((tree.take(upper, version, post)?, ())),
            |delegate, _| delegate.btree_did_take(upper),
        )
    }

    /// Removes every entry. Returns false if the map was already empty.
    pub fn clear(&self) -> bool {
        self.committer.clear()
    }

    /// Folds the map with memoization, returning the fold of all entries.
    ///
    /// `combine` folds an accumulator with a value; `merge` joins two
    /// accumulators. Folds of unchanged subtrees are reused on later calls.
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

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Commits the pending diff. Returns false if nothing was written.
    pub fn commit(&self, commit: Commit) -> StoreResult<bool> {
        self.committer.commit(commit)
    }

    /// Commits the pending diff on the blocking thread pool.
    pub async fn commit_async(&self, commit: Commit) -> StoreResult<bool> {
        self.committer.commit_async(commit).await
    }

    /// Rewrites every page that still depends on a zone older than `post`.
    pub fn evacuate(&self, post: ZoneId) -> StoreResult<()> {
        self.committer.evacuate(post)
    }

    /// Demotes committed pages to the weak cache tier.
    pub fn soften(&self) {
        self.committer.soften();
    }

    /// Spawns a task softening the map at the store's soften interval.
    pub fn spawn_softener(&self) -> JoinHandle<()> {
        self.committer.spawn_softener()
    }
}
