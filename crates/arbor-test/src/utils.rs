//! Shared setup for integration tests.

use std::sync::{Arc, Once};

use arbor_common::StoreSettings;
use arbor_store::{BTree, BTreeMap, MemoryStore, StoreContext, Tree};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Creates a memory store with test settings.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(StoreSettings::for_testing()))
}

/// Creates an empty map committing into `store`.
pub fn btree_map(store: Arc<dyn StoreContext>) -> BTreeMap {
    let tree = BTree::empty(store.page_context(), 1);
    BTreeMap::new(tree, store)
}
