//! # arbor-store
//!
//! Copy-on-write page trees for arbor.
//!
//! Trees are immutable: every mutation returns a new tree that shares all
//! unchanged pages with the old one. Pages are reached through lazily
//! resolved [`PageRef`]s that cache the page strongly, weakly, or not at
//! all, and that memoize encoded sizes and subtree folds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            BTreeMap  /  UTreeValue  /  QTreeMap              │
//! │          (optimistic updates, bounded store retries)         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                            Trunk                             │
//! │           (current tree, version, post; commits)             │
//! ├────────────────────┬──────────────────┬──────────────────────┤
//! │       BTree        │      UTree       │        QTree         │
//! ├────────────────────┴──────────────────┴──────────────────────┤
//! │        Page / PageRef (strong, weak, unloaded) + Cursor      │
//! ├──────────────────────────────────────────────────────────────┤
//! │   PageContext / PageLoader / StoreContext (e.g. MemoryStore) │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use arbor_common::{StoreSettings, Value};
//! use arbor_store::{BTree, BTreeMap, Commit, MemoryStore, StoreContext, Tree, TreeView};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new(StoreSettings::for_testing()));
//! let map = BTreeMap::new(BTree::empty(store.page_context(), 1), store.clone());
//! for i in 0..100i64 {
//!     map.put(Value::from(i), Value::from(i * i)).unwrap();
//! }
//! map.commit(Commit::new()).unwrap();
//!
//! let seed = map.tree().to_seed_string();
//! let reopened = BTree::from_seed(&seed, store.page_context()).unwrap();
//! assert_eq!(reopened.get(&Value::from(9i64)).unwrap(), Some(Value::from(81i64)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Ordered map trees
pub mod btree;

/// Store collaborator interfaces
pub mod context;

/// Tree cursors
pub mod cursor;

/// Concurrent map clients
pub mod map;

/// Pages, page references and their encoding
pub mod page;

/// Spatial trees
pub mod qtree;

/// In-memory store
pub mod store;

/// Tree roots, seeds and the shared tree operations
pub mod tree;

/// Shared mutable tree roots
pub mod trunk;

/// Single value trees
pub mod utree;

pub use btree::BTree;
pub use context::{BTreeDelegate, Commit, PageContext, PageLoader, StoreContext, TreeDelegate};
pub use cursor::{Cursor, CursorPolicy};
pub use map::{BTreeMap, Committer, MapCursor, QTreeMap, UTreeValue};
pub use page::{CacheState, Page, PageRef, TreeType};
pub use qtree::{BitInterval, QTree};
pub use store::{CacheStats, MemoryStore};
pub use tree::{Seed, Tree, TreeView};
pub use trunk::Trunk;
pub use utree::UTree;
