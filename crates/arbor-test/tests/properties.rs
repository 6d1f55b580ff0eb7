//! Property tests.

use std::collections::BTreeMap as StdBTreeMap;
use std::sync::Arc;

use arbor_common::{StoreSettings, Value};
use arbor_store::page::PageHeader;
use arbor_store::{BTree, MemoryStore, PageContext, PageRef, StoreContext, Tree, TreeType, TreeView};
use proptest::prelude::*;

fn context(page_split_size: usize) -> Arc<dyn PageContext> {
    MemoryStore::new(StoreSettings::for_testing().with_page_split_size(page_split_size)).page_context()
}

#[derive(Debug, Clone)]
enum Op {
    Put(i64, i64),
    Remove(i64),
    Drop(u64),
    Take(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0..500i64, any::<i64>()).prop_map(|(k, v)| Op::Put(k, v)),
        4 => (0..500i64).prop_map(Op::Remove),
        1 => (0..20u64).prop_map(Op::Drop),
        1 => (100..400u64).prop_map(Op::Take),
    ]
}

fn fold_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Absent),
        any::<i64>().prop_map(Value::from),
        "[a-z\"\\\\ ,(){}]{0,12}".prop_map(Value::from),
        proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::from),
    ]
}

fn concat(acc: &Value, value: &Value) -> Value {
    Value::from(format!("{}{},", acc.as_text().unwrap_or(""), value))
}

fn join(left: &Value, right: &Value) -> Value {
    Value::from(format!("{}{}", left.as_text().unwrap_or(""), right.as_text().unwrap_or("")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_btree_matches_std_map(ops in proptest::collection::vec(op(), 1..300)) {
        let mut tree = BTree::empty(context(256), 1);
        let mut oracle = StdBTreeMap::new();
        for (version, op) in ops.into_iter().enumerate() {
            let version = version as u64 + 1;
            match op {
                Op::Put(k, v) => {
                    tree = tree.updated(Value::from(k), Value::from(v), version, 0).unwrap();
                    oracle.insert(k, v);
                    prop_assert_eq!(tree.get(&Value::from(k)).unwrap(), Some(Value::from(v)));
                }
                Op::Remove(k) => {
                    let before = tree.clone();
                    tree = tree.removed(&Value::from(k), version, 0).unwrap();
                    if oracle.remove(&k).is_some() {
                        prop_assert_eq!(tree.span() + 1, before.span());
                    } else {
                        prop_assert!(tree.same_as(&before));
                    }
                }
                Op::Drop(n) => {
                    let span = tree.span();
                    tree = tree.drop(n, version, 0).unwrap();
                    prop_assert_eq!(tree.span(), span.saturating_sub(n));
                    let keep: Vec<i64> = oracle.keys().copied().skip(n as usize).collect();
                    oracle.retain(|k, _| keep.binary_search(k).is_ok());
                }
                Op::Take(n) => {
                    let span = tree.span();
                    tree = tree.take(n, version, 0).unwrap();
                    prop_assert_eq!(tree.span(), span.min(n));
                    let keep: Vec<i64> = oracle.keys().copied().take(n as usize).collect();
                    oracle.retain(|k, _| keep.binary_search(k).is_ok());
                }
            }
        }
        let entries: Vec<(Value, Value)> = tree.cursor().into_iter().collect::<Result<_, _>>().unwrap();
        let expected: Vec<(Value, Value)> = oracle
            .iter()
            .map(|(&k, &v)| (Value::from(k), Value::from(v)))
            .collect();
        prop_assert_eq!(tree.span(), expected.len() as u64);
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn test_reduction_ignores_page_layout(keys in proptest::collection::btree_set(0..10_000i64, 0..400)) {
        let flat = keys
            .iter()
            .fold(Value::from(""), |acc, &k| concat(&acc, &Value::from(k)));
        for split in [64usize, 256, 4096] {
            let mut tree = BTree::empty(context(split), 1);
            for &k in keys.iter().rev() {
                tree = tree.updated(Value::from(k), Value::from(k), 1, 0).unwrap();
            }
            let reduced = tree.reduced(&Value::from(""), concat, join, 1).unwrap();
            prop_assert_eq!(reduced.fold(), &flat);
        }
    }

    #[test]
    fn test_header_round_trip(
        post in 0..1000u32,
        zone in 0..1000u32,
        base in any::<u32>(),
        size in any::<u32>(),
        area in any::<u32>(),
        span in any::<u32>(),
        x in any::<u64>(),
        y in any::<u64>(),
        fold in fold_value(),
        tiled in any::<bool>(),
    ) {
        let header = PageHeader {
            post,
            zone,
            base: u64::from(base),
            size: size as usize,
            area: u64::from(area),
            span: u64::from(span),
            x: if tiled { x } else { 0 },
            y: if tiled { y } else { 0 },
            fold,
        };
        let tree_type = if tiled { TreeType::QTree } else { TreeType::BTree };
        let page_ref = PageRef::from_header(context(256), tree_type, 1, header.clone());

        let mut text = String::new();
        page_ref.write_page_ref(&mut text).unwrap();
        prop_assert_eq!(text.len(), page_ref.page_ref_size());

        let parsed = PageRef::parse(&text, context(256), tree_type, 1).unwrap();
        prop_assert_eq!(parsed.header(), &header);
    }
}

#[test]
fn test_negative_header_fields_are_rejected() {
    for input in [
        "@page(zone:1,base:-5,size:3,area:4,span:1)",
        "@page(zone:1,base:5,size:-3,area:4,span:1)",
        "@page(zone:1,base:5,size:3,area:-4,span:1)",
        "@page(zone:1,base:5,size:3,area:4,span:-1)",
    ] {
        let err = PageHeader::parse(input).unwrap_err();
        assert!(err.to_string().contains(input), "{err}");
    }
}

#[test]
fn test_evacuation_of_fresh_tree_is_identity() {
    let mut tree = BTree::empty(context(256), 1);
    for i in 0..100i64 {
        tree = tree.updated(Value::from(i), Value::from(i), 1, 0).unwrap();
    }
    assert_eq!(tree.root().post(), 0);
    assert!(tree.evacuated(5, 2).unwrap().same_as(&tree));
}
