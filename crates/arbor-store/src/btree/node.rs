//! B-tree page algorithms.
//!
//! Every function here is a pure rewrite: it takes page references and
//! returns new ones, sharing untouched subtrees. A function that changes
//! nothing returns a reference equal (by identity) to its input.
//!
//! Node entries are keyed by the first key of their child, and all leaves
//! sit at the same depth: splits and merges only ever combine siblings.

use std::cmp::Ordering;
use std::sync::Arc;

use arbor_common::{Stem, StoreResult, Value, Version};
use tracing::debug;

use crate::context::PageContext;
use crate::page::{Page, PageBody, PageRef, TreeType};

type Slots = Vec<(Value, Value)>;
type Entries = Vec<(Value, PageRef)>;

/// Index of the child whose key range holds `key`.
fn child_index(entries: &[(Value, PageRef)], key: &Value) -> usize {
    entries
        .partition_point(|(first, _)| first <= key)
        .saturating_sub(1)
}

fn first_key(page: &Page) -> Value {
    match page.body() {
        PageBody::BTreeLeaf(slots) => slots.first().map(|(key, _)| key.clone()),
        PageBody::BTreeNode(entries) => entries.first().map(|(key, _)| key.clone()),
        _ => None,
    }
    .unwrap_or_default()
}

fn leaf_ref(context: &Arc<dyn PageContext>, stem: Stem, version: Version, slots: Slots) -> PageRef {
    PageRef::from_page(
        Arc::clone(context),
        Page::new(version, stem, PageBody::BTreeLeaf(slots)),
        Value::Absent,
    )
}

fn node_ref(context: &Arc<dyn PageContext>, stem: Stem, version: Version, entries: Entries) -> PageRef {
    PageRef::from_page(
        Arc::clone(context),
        Page::new(version, stem, PageBody::BTreeNode(entries)),
        Value::Absent,
    )
}

/// Returns the canonical empty leaf.
pub(crate) fn empty(page_ref: &PageRef, version: Version) -> PageRef {
    PageRef::from_page(
        Arc::clone(page_ref.context()),
        Page::empty(TreeType::BTree, page_ref.stem(), version),
        Value::Absent,
    )
}

// =============================================================================
// Reads
// =============================================================================

/// Looks up the value stored under `key`.
pub(crate) fn get(root: &PageRef, key: &Value) -> StoreResult<Option<Value>> {
    let mut page = root.page()?;
    loop {
        let child = match page.body() {
            PageBody::BTreeLeaf(slots) => {
                return Ok(slots
                    .binary_search_by(|(k, _)| k.cmp(key))
                    .ok()
                    .map(|i| slots[i].1.clone()));
            }
            PageBody::BTreeNode(entries) if !entries.is_empty() => {
                entries[child_index(entries, key)].1.page()?
            }
            _ => return Ok(None),
        };
        page = child;
    }
}

/// Returns the absolute index of `key`.
pub(crate) fn index_of(root: &PageRef, key: &Value) -> StoreResult<Option<u64>> {
    let mut page = root.page()?;
    let mut offset = 0;
    loop {
        let child = match page.body() {
            PageBody::BTreeLeaf(slots) => {
                return Ok(slots
                    .binary_search_by(|(k, _)| k.cmp(key))
                    .ok()
                    .map(|i| offset + i as u64));
            }
            PageBody::BTreeNode(entries) if !entries.is_empty() => {
                let i = child_index(entries, key);
                offset += entries[..i].iter().map(|(_, c)| c.span()).sum::<u64>();
                entries[i].1.page()?
            }
            _ => return Ok(None),
        };
        page = child;
    }
}

/// Returns the entry at absolute `index`.
pub(crate) fn get_entry(root: &PageRef, index: u64) -> StoreResult<Option<(Value, Value)>> {
    if index >= root.span() {
        return Ok(None);
    }
    let mut page = root.page()?;
    let mut index = index;
    loop {
        let child = match page.body() {
            PageBody::BTreeLeaf(slots) => {
                return Ok(usize::try_from(index).ok().and_then(|i| slots.get(i)).cloned());
            }
            PageBody::BTreeNode(entries) => {
                let mut found = None;
                for (_, child) in entries {
                    if index < child.span() {
                        found = Some(child);
                        break;
                    }
                    index -= child.span();
                }
                match found {
                    Some(child) => child.page()?,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        page = child;
    }
}

/// Returns the first (`Ordering::Less`) or last entry.
pub(crate) fn edge(root: &PageRef, side: Ordering) -> StoreResult<Option<(Value, Value)>> {
    let mut page = root.page()?;
    loop {
        let child = match page.body() {
            PageBody::BTreeLeaf(slots) => {
                let slot = if side == Ordering::Less { slots.first() } else { slots.last() };
                return Ok(slot.cloned());
            }
            PageBody::BTreeNode(entries) => {
                let entry = if side == Ordering::Less { entries.first() } else { entries.last() };
                match entry {
                    Some((_, child)) => child.page()?,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        page = child;
    }
}

/// Returns the first entry with a key greater than `key`.
pub(crate) fn next(page_ref: &PageRef, key: &Value) -> StoreResult<Option<(Value, Value)>> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let i = slots.partition_point(|(k, _)| k <= key);
            Ok(slots.get(i).cloned())
        }
        PageBody::BTreeNode(entries) => {
            for (_, child) in entries.iter().skip(child_index(entries, key)) {
                if let Some(entry) = next(child, key)? {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Returns the last entry with a key less than `key`.
pub(crate) fn previous(page_ref: &PageRef, key: &Value) -> StoreResult<Option<(Value, Value)>> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let i = slots.partition_point(|(k, _)| k < key);
            Ok(i.checked_sub(1).map(|i| slots[i].clone()))
        }
        PageBody::BTreeNode(entries) => {
            let end = entries.partition_point(|(first, _)| first < key);
            for (_, child) in entries[..end].iter().rev() {
                if let Some(entry) = previous(child, key)? {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

// =============================================================================
// Writes
// =============================================================================

/// Stores `value` under `key`, or removes `key` when `value` is absent.
/// The result may need [`balanced`].
pub(crate) fn updated(
    page_ref: &PageRef,
    key: &Value,
    value: &Value,
    version: Version,
) -> StoreResult<PageRef> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let mut slots = slots.clone();
            match slots.binary_search_by(|(k, _)| k.cmp(key)) {
                Ok(i) if !value.is_defined() => {
                    slots.remove(i);
                }
                Ok(i) if &slots[i].1 == value => return Ok(page_ref.clone()),
                Ok(i) => slots[i].1 = value.clone(),
                Err(_) if !value.is_defined() => return Ok(page_ref.clone()),
                Err(i) => slots.insert(i, (key.clone(), value.clone())),
            }
            Ok(leaf_ref(page_ref.context(), page.stem(), version, slots))
        }
        PageBody::BTreeNode(entries) if !entries.is_empty() => {
            let i = child_index(entries, key);
            let child = updated(&entries[i].1, key, value, version)?;
            if child.ptr_eq(&entries[i].1) {
                return Ok(page_ref.clone());
            }
            let mut entries = entries.clone();
            rebalance_child(page_ref.context(), &mut entries, i, child, version)?;
            Ok(node_ref(page_ref.context(), page.stem(), version, entries))
        }
        _ if !value.is_defined() => Ok(page_ref.clone()),
        _ => Ok(leaf_ref(
            page_ref.context(),
            page.stem(),
            version,
            vec![(key.clone(), value.clone())],
        )),
    }
}

/// Removes the first `lower` entries.
pub(crate) fn dropped(page_ref: &PageRef, lower: u64, version: Version) -> StoreResult<PageRef> {
    if lower == 0 {
        return Ok(page_ref.clone());
    }
    if lower >= page_ref.span() {
        return Ok(empty(page_ref, version));
    }
    let page = page_ref.page()?;
    match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let start = usize::try_from(lower).unwrap_or(slots.len()).min(slots.len());
            Ok(leaf_ref(page_ref.context(), page.stem(), version, slots[start..].to_vec()))
        }
        PageBody::BTreeNode(entries) => {
            let mut remaining = lower;
            let mut first = 0;
            while first < entries.len() && entries[first].1.span() <= remaining {
                remaining -= entries[first].1.span();
                first += 1;
            }
            let mut entries = entries[first..].to_vec();
            if remaining > 0 && !entries.is_empty() {
                let child = dropped(&entries[0].1, remaining, version)?;
                rebalance_child(page_ref.context(), &mut entries, 0, child, version)?;
            }
            Ok(node_ref(page_ref.context(), page.stem(), version, entries))
        }
        _ => Ok(page_ref.clone()),
    }
}

/// Keeps only the first `upper` entries.
pub(crate) fn taken(page_ref: &PageRef, upper: u64, version: Version) -> StoreResult<PageRef> {
    if upper >= page_ref.span() {
        return Ok(page_ref.clone());
    }
    if upper == 0 {
        return Ok(empty(page_ref, version));
    }
    let page = page_ref.page()?;
    match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let end = usize::try_from(upper).unwrap_or(slots.len()).min(slots.len());
            Ok(leaf_ref(page_ref.context(), page.stem(), version, slots[..end].to_vec()))
        }
        PageBody::BTreeNode(entries) => {
            let mut remaining = upper;
            let mut kept = 0;
            while kept < entries.len() && entries[kept].1.span() <= remaining {
                remaining -= entries[kept].1.span();
                kept += 1;
            }
            let partial = remaining > 0 && kept < entries.len();
            let mut entries = entries[..kept + usize::from(partial)].to_vec();
            if partial {
                let child = taken(&entries[kept].1, remaining, version)?;
                rebalance_child(page_ref.context(), &mut entries, kept, child, version)?;
            }
            Ok(node_ref(page_ref.context(), page.stem(), version, entries))
        }
        _ => Ok(page_ref.clone()),
    }
}

// =============================================================================
// Balancing
// =============================================================================

/// Installs `child` at `index`, removing it when empty, merging it with a
/// sibling when undersized, and splitting it when oversized.
fn rebalance_child(
    context: &Arc<dyn PageContext>,
    entries: &mut Entries,
    index: usize,
    child: PageRef,
    version: Version,
) -> StoreResult<()> {
    if child.span() == 0 {
        entries.remove(index);
        return Ok(());
    }
    let page = child.page()?;
    if entries.len() > 1 && context.page_should_merge(&page, child.page_size()) {
        let (lo, hi) = if index + 1 < entries.len() {
            (index, index + 1)
        } else {
            (index - 1, index)
        };
        let (left, right) = if lo == index {
            (page, entries[hi].1.page()?)
        } else {
            (entries[lo].1.page()?, page)
        };
        let merged = merge_pages(&left, &right, version);
        let parts = split(context, merged, version);
        entries.splice(lo..=hi, parts);
        return Ok(());
    }
    if context.page_should_split(&page, child.page_size()) {
        let parts = split(context, page.as_ref().clone(), version);
        entries.splice(index..=index, parts);
        return Ok(());
    }
    entries[index] = (first_key(&page), child);
    Ok(())
}

/// Concatenates two sibling pages.
fn merge_pages(left: &Page, right: &Page, version: Version) -> Page {
    let body = match (left.body(), right.body()) {
        (PageBody::BTreeNode(a), PageBody::BTreeNode(b)) => {
            PageBody::BTreeNode(a.iter().chain(b).cloned().collect())
        }
        (PageBody::BTreeLeaf(a), PageBody::BTreeLeaf(b)) => {
            PageBody::BTreeLeaf(a.iter().chain(b).cloned().collect())
        }
        (body, _) => body.clone(),
    };
    Page::new(version, left.stem(), body)
}

/// Halves `page` until no part should split. Returns keyed references.
/// Nodes split only into halves of at least two children, so growing a
/// level always shrinks the root.
const MIN_NODE_SPLIT_ARITY: usize = 4;

fn split(context: &Arc<dyn PageContext>, page: Page, version: Version) -> Vec<(Value, PageRef)> {
    let page_ref = PageRef::from_page(Arc::clone(context), page, Value::Absent);
    let Some(page) = page_ref.hard_page() else {
        return Vec::new();
    };
    if !context.page_should_split(&page, page_ref.page_size()) {
        return vec![(first_key(&page), page_ref)];
    }
    let (left, right) = match page.body() {
        PageBody::BTreeLeaf(slots) => {
            let (a, b) = slots.split_at(slots.len() / 2);
            (PageBody::BTreeLeaf(a.to_vec()), PageBody::BTreeLeaf(b.to_vec()))
        }
        PageBody::BTreeNode(entries) if entries.len() >= MIN_NODE_SPLIT_ARITY => {
            let (a, b) = entries.split_at(entries.len() / 2);
            (PageBody::BTreeNode(a.to_vec()), PageBody::BTreeNode(b.to_vec()))
        }
        _ => return vec![(first_key(&page), page_ref)],
    };
    debug!(
        stem = page.stem(),
        size = page_ref.page_size(),
        arity = page.arity(),
        "splitting page"
    );
    let mut parts = split(context, Page::new(version, page.stem(), left), version);
    parts.extend(split(context, Page::new(version, page.stem(), right), version));
    parts
}

/// Restores the root: grows a level while the root splits, and collapses
/// nodes with a single child.
pub(crate) fn balanced(root: &PageRef, version: Version) -> StoreResult<PageRef> {
    let context = root.context();
    let mut root = root.clone();
    let page = root.page()?;
    if context.page_should_split(&page, root.page_size()) {
        let mut parts = split(context, page.as_ref().clone(), version);
        while parts.len() > 1 {
            let node = Page::new(version, root.stem(), PageBody::BTreeNode(parts));
            parts = split(context, node, version);
        }
        if let Some((_, part)) = parts.pop() {
            root = part;
        }
    }
    loop {
        let page = root.page()?;
        match page.body() {
            PageBody::BTreeNode(entries) if entries.len() == 1 => root = entries[0].1.clone(),
            PageBody::BTreeNode(entries) if entries.is_empty() => return Ok(empty(&root, version)),
            _ => return Ok(root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StoreContext;
    use crate::store::MemoryStore;
    use arbor_common::StoreSettings;

    fn root(count: i64) -> PageRef {
        let context = MemoryStore::new(StoreSettings::for_testing()).page_context();
        let mut root = PageRef::from_page(context, Page::empty(TreeType::BTree, 1, 0), Value::Absent);
        for i in 0..count {
            let next = updated(&root, &Value::from(i), &Value::from(i), 1).unwrap();
            root = balanced(&next, 1).unwrap();
        }
        root
    }

    fn depth(page_ref: &PageRef) -> usize {
        let page = page_ref.page().unwrap();
        let depths: Vec<usize> = page.children().map(depth).collect();
        if let Some(first) = depths.first() {
            assert!(depths.iter().all(|d| d == first), "leaves at uneven depth");
            first + 1
        } else {
            0
        }
    }

    fn check_keys(page_ref: &PageRef) {
        let page = page_ref.page().unwrap();
        if let PageBody::BTreeNode(entries) = page.body() {
            for (key, child) in entries {
                assert_eq!(key, &first_key(&child.page().unwrap()));
                check_keys(child);
            }
        }
    }

    #[test]
    fn test_growth_keeps_structure() {
        let root = root(300);
        assert_eq!(root.span(), 300);
        assert!(depth(&root) >= 2);
        check_keys(&root);
        for i in [0i64, 17, 150, 299] {
            assert_eq!(get(&root, &Value::from(i)).unwrap(), Some(Value::from(i)));
            assert_eq!(index_of(&root, &Value::from(i)).unwrap(), Some(i as u64));
            assert_eq!(
                get_entry(&root, i as u64).unwrap(),
                Some((Value::from(i), Value::from(i)))
            );
        }
        assert_eq!(get(&root, &Value::from(300i64)).unwrap(), None);
        assert_eq!(index_of(&root, &Value::from(-1i64)).unwrap(), None);
    }

    #[test]
    fn test_neighbors() {
        let root = root(100);
        assert_eq!(edge(&root, Ordering::Less).unwrap().unwrap().0, Value::from(0i64));
        assert_eq!(edge(&root, Ordering::Greater).unwrap().unwrap().0, Value::from(99i64));
        assert_eq!(next(&root, &Value::from(41i64)).unwrap().unwrap().0, Value::from(42i64));
        assert_eq!(previous(&root, &Value::from(41i64)).unwrap().unwrap().0, Value::from(40i64));
        assert!(next(&root, &Value::from(99i64)).unwrap().is_none());
        assert!(previous(&root, &Value::from(0i64)).unwrap().is_none());
    }

    #[test]
    fn test_remove_everything_collapses() {
        let mut root = root(120);
        for i in 0..120i64 {
            let next = updated(&root, &Value::from(i), &Value::Absent, 2).unwrap();
            root = balanced(&next, 2).unwrap();
            assert_eq!(root.span(), (119 - i) as u64);
            check_keys(&root);
            depth(&root);
        }
        assert!(!root.page().unwrap().is_node());
    }

    #[test]
    fn test_drop_and_take() {
        let root = root(150);
        let tail = balanced(&dropped(&root, 40, 2).unwrap(), 2).unwrap();
        assert_eq!(tail.span(), 110);
        assert_eq!(edge(&tail, Ordering::Less).unwrap().unwrap().0, Value::from(40i64));
        check_keys(&tail);
        depth(&tail);

        let head = balanced(&taken(&root, 40, 2).unwrap(), 2).unwrap();
        assert_eq!(head.span(), 40);
        assert_eq!(edge(&head, Ordering::Greater).unwrap().unwrap().0, Value::from(39i64));
        check_keys(&head);
        depth(&head);

        assert!(taken(&root, 500, 2).unwrap().ptr_eq(&root));
        assert!(dropped(&root, 0, 2).unwrap().ptr_eq(&root));
        assert_eq!(dropped(&root, 500, 2).unwrap().span(), 0);
    }

    #[test]
    fn test_unchanged_update_is_identity() {
        let root = root(50);
        assert!(updated(&root, &Value::from(7i64), &Value::from(7i64), 2)
            .unwrap()
            .ptr_eq(&root));
        assert!(updated(&root, &Value::from(1000i64), &Value::Absent, 2)
            .unwrap()
            .ptr_eq(&root));
    }
}
