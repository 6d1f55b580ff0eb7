//! Store failures during map operations.

use std::sync::Arc;

use arbor_common::{ResetPolicy, StoreError, StoreSettings, Value};
use arbor_store::{BTree, BTreeDelegate, BTreeMap, CacheState, Commit, StoreContext, Tree, TreeDelegate, TreeView};
use arbor_test::chaos::FlakyStore;
use arbor_test::utils::init_tracing;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct ClearRecorder {
    clears: Mutex<usize>,
}

impl TreeDelegate for ClearRecorder {
    fn tree_did_clear(&self) {
        *self.clears.lock() += 1;
    }
}

impl BTreeDelegate for ClearRecorder {}

/// Builds a committed, softened map whose next reads must load pages.
fn softened_map(settings: StoreSettings) -> (Arc<FlakyStore>, BTreeMap) {
    let store = Arc::new(FlakyStore::new(settings));
    let tree = BTree::empty(store.page_context(), 1);
    let map = BTreeMap::new(tree, store.clone());
    for i in 0..100i64 {
        map.put(Value::from(i), Value::from(i)).unwrap();
    }
    assert!(map.commit(Commit::new()).unwrap());
    map.soften();
    assert_eq!(map.tree().root().cache_state(), CacheState::Weak);
    assert!(map.tree().root().soft_page().is_none());
    (store, map)
}

#[test]
fn test_exhausted_read_resets_to_empty() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Always);
    let max_retries = settings.max_retries;
    let (store, map) = softened_map(settings);
    let recorder = Arc::new(ClearRecorder::default());
    let map = map.with_delegate(recorder.clone());

    store.flaky().fail_next(max_retries + 1);
    assert_eq!(map.get(&Value::from(5i64)).unwrap(), None);
    assert_eq!(store.flaky().injected(), max_retries);
    assert!(map.is_empty());
    assert_eq!(*recorder.clears.lock(), 1);
}

#[test]
fn test_exhausted_read_propagates_without_reset() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never);
    let max_retries = settings.max_retries;
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(max_retries + 1);
    let err = map.get(&Value::from(5i64)).unwrap_err();
    assert!(matches!(err, StoreError::PageLoad { .. }));
    assert!(!err.is_fatal());
    assert_eq!(store.flaky().injected(), max_retries + 1);

    // the contents survive and the next read succeeds
    assert_eq!(map.len(), 100);
    assert_eq!(map.get(&Value::from(5i64)).unwrap(), Some(Value::from(5i64)));
}

#[test]
fn test_default_policy_keeps_durable_trees() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::default());
    let max_retries = settings.max_retries;
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(max_retries + 1);
    assert!(map.put(Value::from(500i64), Value::from(1i64)).is_err());
    assert_eq!(map.len(), 100);
    assert_eq!(map.put(Value::from(500i64), Value::from(1i64)).unwrap(), None);
    assert_eq!(map.len(), 101);
}

#[test]
fn test_single_failure_is_retried() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never);
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(1);
    assert_eq!(map.get(&Value::from(7i64)).unwrap(), Some(Value::from(7i64)));
    assert_eq!(store.flaky().injected(), 1);
    assert_eq!(map.len(), 100);
}

#[test]
fn test_zero_retries_fail_fast() {
    init_tracing();
    let settings = StoreSettings::for_testing()
        .with_failure_policy(ResetPolicy::Always)
        .with_max_retries(0);
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(1);
    assert!(map.get(&Value::from(1i64)).is_err());
    assert_eq!(map.len(), 100);
}

#[test]
fn test_cursor_retries_failed_loads() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never);
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(1);
    let keys: Vec<Value> = map.cursor().into_iter().map(|entry| entry.unwrap().0).collect();
    assert_eq!(store.flaky().injected(), 1);
    assert_eq!(keys, (0..100i64).map(Value::from).collect::<Vec<_>>());
}

#[test]
fn test_cursor_resumes_after_failure_mid_scan() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never);
    let (store, map) = softened_map(settings);

    let mut cursor = map.cursor();
    for i in 0..40i64 {
        assert_eq!(cursor.next().unwrap().unwrap().0, Value::from(i));
    }
    map.soften();
    store.flaky().fail_next(1);
    for i in 40..100i64 {
        assert_eq!(cursor.next().unwrap().unwrap().0, Value::from(i));
    }
    assert!(cursor.next().unwrap().is_none());
    assert_eq!(cursor.next_index(), 100);
    assert_eq!(store.flaky().injected(), 1);
}

#[test]
fn test_exhausted_cursor_propagates_without_reset() {
    init_tracing();
    let settings = StoreSettings::for_testing().with_failure_policy(ResetPolicy::Never);
    let max_retries = settings.max_retries;
    let (store, map) = softened_map(settings);

    store.flaky().fail_next(max_retries + 1);
    let err = map.cursor().next().unwrap_err();
    assert!(matches!(err, StoreError::PageLoad { .. }));
    assert_eq!(store.flaky().injected(), max_retries + 1);
    assert_eq!(map.entries().unwrap().len(), 100);
}
