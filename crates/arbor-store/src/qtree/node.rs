//! Q-tree page algorithms.
//!
//! Leaves hold slots sorted by key; nodes hold children whose references
//! carry bounding tiles. Lookups only enter children whose tiles contain the
//! searched point. Oversized pages split into the quadrants around the
//! midpoints of their bounding tiles.

use std::sync::Arc;

use arbor_common::{Stem, StoreError, StoreResult, Value, Version};
use tracing::debug;

use super::{BitInterval, MAX_COORDINATE};
use crate::context::PageContext;
use crate::page::{Page, PageBody, PageRef, QTreeSlot, TreeType};

/// A point as a pair of rank-0 tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Point {
    pub(crate) x: BitInterval,
    pub(crate) y: BitInterval,
}

impl Point {
    /// Rejects coordinates a tile cannot hold.
    pub(crate) fn new(x: u64, y: u64) -> StoreResult<Self> {
        if x > MAX_COORDINATE || y > MAX_COORDINATE {
            return Err(StoreError::invalid_argument(format!(
                "point ({x}, {y}) exceeds the maximum coordinate {MAX_COORDINATE}"
            )));
        }
        Ok(Self {
            x: BitInterval::point(x),
            y: BitInterval::point(y),
        })
    }

    pub(crate) fn of(slot: &QTreeSlot) -> Self {
        Self {
            x: BitInterval::from_bits(slot.x),
            y: BitInterval::from_bits(slot.y),
        }
    }

    fn at(self, slot: &QTreeSlot) -> bool {
        slot.x == self.x.bits() && slot.y == self.y.bits()
    }

    fn within(self, page_ref: &PageRef) -> bool {
        BitInterval::from_bits(page_ref.x()).contains(self.x)
            && BitInterval::from_bits(page_ref.y()).contains(self.y)
    }

    /// How much `page_ref`'s tiles would grow to cover this point.
    fn growth(self, page_ref: &PageRef) -> u32 {
        let x = BitInterval::from_bits(page_ref.x());
        let y = BitInterval::from_bits(page_ref.y());
        (x.union(self.x).rank() - x.rank()) + (y.union(self.y).rank() - y.rank())
    }
}

fn new_ref(context: &Arc<dyn PageContext>, stem: Stem, version: Version, body: PageBody) -> PageRef {
    PageRef::from_page(Arc::clone(context), Page::new(version, stem, body), Value::Absent)
}

/// Returns the canonical empty leaf.
pub(crate) fn empty(page_ref: &PageRef, version: Version) -> PageRef {
    PageRef::from_page(
        Arc::clone(page_ref.context()),
        Page::empty(TreeType::QTree, page_ref.stem(), version),
        Value::Absent,
    )
}

/// Looks up the slot stored under `key` at `point`.
pub(crate) fn get(page_ref: &PageRef, key: &Value, point: Point) -> StoreResult<Option<QTreeSlot>> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::QTreeLeaf(slots) => Ok(slots
            .binary_search_by(|slot| slot.key.cmp(key))
            .ok()
            .map(|i| &slots[i])
            .filter(|slot| point.at(slot))
            .cloned()),
        PageBody::QTreeNode(children) => {
            for child in children.iter().filter(|child| point.within(child)) {
                if let Some(slot) = get(child, key, point)? {
                    return Ok(Some(slot));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Finds the slot stored under `key` wherever it lies. Visits every page
/// until the key is found.
pub(crate) fn locate(page_ref: &PageRef, key: &Value) -> StoreResult<Option<QTreeSlot>> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::QTreeLeaf(slots) => Ok(slots
            .binary_search_by(|slot| slot.key.cmp(key))
            .ok()
            .map(|i| slots[i].clone())),
        PageBody::QTreeNode(children) => {
            for child in children {
                if let Some(slot) = locate(child, key)? {
                    return Ok(Some(slot));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Stores `value` under `key` at `point`, or removes `key` from `point` when
/// `value` is absent. `key` must be stored at `point` or nowhere in the
/// tree. The result may need [`balanced`].
pub(crate) fn updated(
    page_ref: &PageRef,
    key: &Value,
    point: Point,
    value: &Value,
    version: Version,
) -> StoreResult<PageRef> {
    let page = page_ref.page()?;
    match page.body() {
        PageBody::QTreeLeaf(slots) => {
            let slot = QTreeSlot {
                key: key.clone(),
                x: point.x.bits(),
                y: point.y.bits(),
                value: value.clone(),
            };
            let mut slots = slots.clone();
            match slots.binary_search_by(|s| s.key.cmp(key)) {
                Ok(i) if !value.is_defined() => {
                    if !point.at(&slots[i]) {
                        return Ok(page_ref.clone());
                    }
                    slots.remove(i);
                }
                Ok(i) if slots[i] == slot => return Ok(page_ref.clone()),
                Ok(i) => slots[i] = slot,
                Err(_) if !value.is_defined() => return Ok(page_ref.clone()),
                Err(i) => slots.insert(i, slot),
            }
            Ok(new_ref(page_ref.context(), page.stem(), version, PageBody::QTreeLeaf(slots)))
        }
        PageBody::QTreeNode(children) if !children.is_empty() => {
            let Some(index) = target_child(children, key, point, value.is_defined())? else {
                return Ok(page_ref.clone());
            };
            let child = updated(&children[index], key, point, value, version)?;
            if child.ptr_eq(&children[index]) {
                return Ok(page_ref.clone());
            }
            let mut children = children.clone();
            rebalance_child(page_ref.context(), &mut children, index, child, version)?;
            Ok(new_ref(page_ref.context(), page.stem(), version, PageBody::QTreeNode(children)))
        }
        _ if !value.is_defined() => Ok(page_ref.clone()),
        _ => {
            let slot = QTreeSlot {
                key: key.clone(),
                x: point.x.bits(),
                y: point.y.bits(),
                value: value.clone(),
            };
            Ok(new_ref(page_ref.context(), page.stem(), version, PageBody::QTreeLeaf(vec![slot])))
        }
    }
}

/// Picks the child to update: the one already holding `key`, else for
/// inserts the first child covering `point`, else the child whose tiles grow
/// least.
fn target_child(children: &[PageRef], key: &Value, point: Point, insert: bool) -> StoreResult<Option<usize>> {
    for (i, child) in children.iter().enumerate() {
        if point.within(child) && get(child, key, point)?.is_some() {
            return Ok(Some(i));
        }
    }
    if !insert {
        return Ok(None);
    }
    if let Some(i) = children.iter().position(|child| point.within(child)) {
        return Ok(Some(i));
    }
    Ok(children
        .iter()
        .enumerate()
        .min_by_key(|(_, child)| (point.growth(child), child.span()))
        .map(|(i, _)| i))
}

// =============================================================================
// Balancing
// =============================================================================

fn rebalance_child(
    context: &Arc<dyn PageContext>,
    children: &mut Vec<PageRef>,
    index: usize,
    child: PageRef,
    version: Version,
) -> StoreResult<()> {
    if child.span() == 0 {
        children.remove(index);
        return Ok(());
    }
    let page = child.page()?;
    if children.len() > 1 && context.page_should_merge(&page, child.page_size()) {
        let sibling = if index + 1 < children.len() { index + 1 } else { index - 1 };
        let sibling_page = children[sibling].page()?;
        let merged = merge_pages(&page, &sibling_page, version);
        let (lo, hi) = (index.min(sibling), index.max(sibling));
        children.splice(lo..=hi, split(context, merged, version));
        return Ok(());
    }
    if context.page_should_split(&page, child.page_size()) {
        children.splice(index..=index, split(context, page.as_ref().clone(), version));
        return Ok(());
    }
    children[index] = child;
    Ok(())
}

fn merge_pages(a: &Page, b: &Page, version: Version) -> Page {
    let body = match (a.body(), b.body()) {
        (PageBody::QTreeLeaf(a), PageBody::QTreeLeaf(b)) => {
            let mut slots: Vec<QTreeSlot> = a.iter().chain(b).cloned().collect();
            slots.sort_by(|l, r| l.key.cmp(&r.key));
            PageBody::QTreeLeaf(slots)
        }
        (PageBody::QTreeNode(a), PageBody::QTreeNode(b)) => {
            PageBody::QTreeNode(a.iter().chain(b).cloned().collect())
        }
        (body, _) => body.clone(),
    };
    Page::new(version, a.stem(), body)
}

/// Splits items into the quadrants around `(x_split, y_split)`, falling back
/// to halves when every item lands in one quadrant.
fn quadrants<T: Clone>(
    items: &[T],
    tile: impl Fn(&T) -> (u64, u64),
    x_split: u64,
    y_split: u64,
) -> Vec<Vec<T>> {
    let mut parts: [Vec<T>; 4] = Default::default();
    for item in items {
        let (x, y) = tile(item);
        let east = BitInterval::from_bits(x).base() >= x_split;
        let north = BitInterval::from_bits(y).base() >= y_split;
        parts[usize::from(east) | usize::from(north) << 1].push(item.clone());
    }
    let parts: Vec<Vec<T>> = parts.into_iter().filter(|part| !part.is_empty()).collect();
    if parts.len() > 1 {
        return parts;
    }
    let (a, b) = items.split_at(items.len() / 2);
    vec![a.to_vec(), b.to_vec()]
}

/// Nodes split only into parts of at least two children, so growing a
/// level always shrinks the root.
const MIN_NODE_SPLIT_ARITY: usize = 4;

fn split(context: &Arc<dyn PageContext>, page: Page, version: Version) -> Vec<PageRef> {
    let page_ref = PageRef::from_page(Arc::clone(context), page, Value::Absent);
    let Some(page) = page_ref.hard_page() else {
        return Vec::new();
    };
    if !context.page_should_split(&page, page_ref.page_size()) {
        return vec![page_ref];
    }
    let x_split = page_ref.x_split();
    let y_split = page_ref.y_split();
    let bodies: Vec<PageBody> = match page.body() {
        PageBody::QTreeLeaf(slots) => quadrants(slots, |s| (s.x, s.y), x_split, y_split)
            .into_iter()
            .map(PageBody::QTreeLeaf)
            .collect(),
        PageBody::QTreeNode(children) if children.len() >= MIN_NODE_SPLIT_ARITY => {
            let mut parts = quadrants(children, |c| (c.x(), c.y()), x_split, y_split);
            if parts.iter().any(|part| part.len() < 2) {
                let (a, b) = children.split_at(children.len() / 2);
                parts = vec![a.to_vec(), b.to_vec()];
            }
            parts.into_iter().map(PageBody::QTreeNode).collect()
        }
        _ => return vec![page_ref],
    };
    debug!(
        stem = page.stem(),
        size = page_ref.page_size(),
        parts = bodies.len(),
        "splitting tile"
    );
    bodies
        .into_iter()
        .flat_map(|body| split(context, Page::new(version, page.stem(), body), version))
        .collect()
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
            let node = Page::new(version, root.stem(), PageBody::QTreeNode(parts));
            parts = split(context, node, version);
        }
        if let Some(part) = parts.pop() {
            root = part;
        }
    }
    loop {
        let page = root.page()?;
        match page.body() {
            PageBody::QTreeNode(children) if children.len() == 1 => root = children[0].clone(),
            PageBody::QTreeNode(children) if children.is_empty() => return Ok(empty(&root, version)),
            _ => return Ok(root),
        }
    }
}
