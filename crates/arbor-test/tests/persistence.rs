//! Commit, reload, soften and evacuation against the memory store.

use std::sync::Arc;
use std::time::Duration;

use arbor_common::{StoreSettings, Value};
use arbor_store::{BTree, CacheState, Commit, MemoryStore, StoreContext, Tree, TreeView};
use arbor_test::utils::{btree_map, init_tracing, memory_store};
use arbor_test::workload::random_entries;

#[test]
fn test_reload_matches_committed_map() {
    init_tracing();
    let store = memory_store();
    let map = btree_map(store.clone());
    let entries = random_entries(500, 21);
    for (key, value) in &entries {
        map.put(key.clone(), value.clone()).unwrap();
    }
    assert!(map.commit(Commit::new()).unwrap());

    let seed = map.tree().to_seed_string();
    assert!(seed.starts_with("@seed(tree:btree,stem:1,"));
    let reopened = BTree::from_seed(&seed, store.page_context()).unwrap();
    assert_eq!(reopened.span(), 500);
    assert_eq!(reopened.tree_size(), map.tree().tree_size());
    for (key, value) in &entries {
        assert_eq!(reopened.get(key).unwrap().as_ref(), Some(value));
    }
}

#[test]
fn test_incremental_commits_append_diffs() {
    init_tracing();
    let store = memory_store();
    let map = btree_map(store.clone());
    for i in 0..300i64 {
        map.put(Value::from(i), Value::from(i)).unwrap();
    }
    assert!(map.commit(Commit::new()).unwrap());
    let first = store.zones().zone_len(1).unwrap();

    map.put(Value::from(7i64), Value::from("seven")).unwrap();
    assert!(map.tree().pending_size() > 0);
    assert!(map.commit(Commit::new()).unwrap());
    let second = store.zones().zone_len(1).unwrap();
    // only the changed path was rewritten
    assert!(second > first);
    assert!(second - first < first);

    let reopened = BTree::from_seed(&map.tree().to_seed_string(), store.page_context()).unwrap();
    assert_eq!(reopened.get(&Value::from(7i64)).unwrap(), Some(Value::from("seven")));
    assert_eq!(reopened.get(&Value::from(8i64)).unwrap(), Some(Value::from(8i64)));
}

#[test]
fn test_soften_is_transparent() {
    init_tracing();
    let store = memory_store();
    let map = btree_map(store.clone());
    for i in 0..300i64 {
        map.put(Value::from(i), Value::from(i * 3)).unwrap();
    }
    map.commit(Commit::new()).unwrap();
    let before = map.entries().unwrap();

    for round in 0..3i64 {
        map.soften();
        assert_eq!(map.tree().root().cache_state(), CacheState::Weak);
        assert_eq!(map.entries().unwrap(), before);
        assert_eq!(map.get(&Value::from(100 + round)).unwrap(), Some(Value::from((100 + round) * 3)));
    }
    assert!(store.stats().loads > 0);
}

#[test]
fn test_uncommitted_pages_are_never_softened() {
    init_tracing();
    let map = btree_map(memory_store());
    for i in 0..100i64 {
        map.put(Value::from(i), Value::from(i)).unwrap();
    }
    map.soften();
    assert_eq!(map.tree().root().cache_state(), CacheState::Strong);
}

#[test]
fn test_shifted_zones_and_evacuation() {
    init_tracing();
    let store = Arc::new(MemoryStore::new(StoreSettings::for_testing().with_max_zone_size(1024)));
    let map = btree_map(store.clone());
    for round in 0..6i64 {
        for i in 0..60i64 {
            map.put(Value::from(round * 100 + i), Value::from(round)).unwrap();
        }
        map.commit(Commit::new()).unwrap();
    }
    let zones = store.zones().zone_ids();
    assert!(zones.len() > 1, "expected zone shifts, got {zones:?}");

    let active = store.zones().active_zone();
    map.evacuate(active).unwrap();
    map.commit(Commit::new()).unwrap();
    assert!(map.tree().root().post() >= active);

    for zone in zones.into_iter().filter(|&zone| zone < active) {
        assert!(store.delete_zone(zone));
    }
    let reopened = BTree::from_seed(&map.tree().to_seed_string(), store.page_context()).unwrap();
    assert_eq!(reopened.span(), 360);
    let entries: Vec<_> = reopened.cursor().into_iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries, map.entries().unwrap());
}

#[test]
fn test_loaded_tree_stays_resident() {
    init_tracing();
    let store = memory_store();
    let map = btree_map(store.clone());
    for i in 0..200i64 {
        map.put(Value::from(i), Value::from(i)).unwrap();
    }
    map.commit(Commit::new()).unwrap();

    let loaded = BTree::from_seed(&map.tree().to_seed_string(), store.page_context())
        .unwrap()
        .loaded()
        .unwrap();
    let loads = store.stats().loads;
    loaded.soften(u64::MAX);
    assert_eq!(loaded.root().cache_state(), CacheState::Strong);
    for i in 0..200i64 {
        assert_eq!(loaded.get(&Value::from(i)).unwrap(), Some(Value::from(i)));
    }
    assert_eq!(store.stats().loads, loads);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_commit_and_background_softening() {
    init_tracing();
    let store = memory_store();
    let map = btree_map(store.clone());
    for i in 0..150i64 {
        map.put(Value::from(i), Value::from(i)).unwrap();
    }
    assert!(map.commit_async(Commit::new()).await.unwrap());
    assert!(!map.commit_async(Commit::new()).await.unwrap());
    assert_eq!(map.trunk().version(), 2);

    let softener = map.spawn_softener();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(map.tree().root().cache_state(), CacheState::Weak);
    assert_eq!(map.get(&Value::from(42i64)).unwrap(), Some(Value::from(42i64)));
    softener.abort();
}
