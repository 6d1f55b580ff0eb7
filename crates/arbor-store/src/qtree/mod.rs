//! Spatial quadrant trees.
//!
//! A [`QTree`] stores keyed values at 2D points. Page references carry the
//! bounding [`BitInterval`] tiles of their subtree, so region queries skip
//! every subtree whose tiles miss the region.

mod bit_interval;
mod node;

use arbor_common::{StoreResult, Value, Version, ZoneId};

pub use bit_interval::{BitInterval, BASE_MASK, MAX_COORDINATE, MAX_RANK, RANK_SHIFT};

use crate::cursor::{Cursor, CursorPolicy, Visit};
use crate::page::{Page, PageBody, PageRef, QTreeSlot, TreeType};
use crate::tree::{Tree, TreeCore, TreeView};
use node::Point;

/// An entry of a spatial tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QTreeEntry {
    /// Entry key.
    pub key: Value,
    /// Horizontal coordinate.
    pub x: u64,
    /// Vertical coordinate.
    pub y: u64,
    /// Entry value.
    pub value: Value,
}

impl From<&QTreeSlot> for QTreeEntry {
    fn from(slot: &QTreeSlot) -> Self {
        Self {
            key: slot.key.clone(),
            x: BitInterval::from_bits(slot.x).base(),
            y: BitInterval::from_bits(slot.y).base(),
            value: slot.value.clone(),
        }
    }
}

// =============================================================================
// Cursor Policies
// =============================================================================

/// Yields every entry of a spatial tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tiles;

impl CursorPolicy for Tiles {
    type Item = QTreeEntry;

    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item> {
        match page.body() {
            PageBody::QTreeLeaf(slots) => slots.get(index).map(QTreeEntry::from),
            _ => None,
        }
    }
}

/// Yields the entries within a region, skipping subtrees outside it.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    x: BitInterval,
    y: BitInterval,
}

impl Region {
    /// Creates a region from horizontal and vertical tiles.
    pub fn new(x: BitInterval, y: BitInterval) -> Self {
        Self { x, y }
    }

    fn intersects(&self, x: u64, y: u64) -> bool {
        self.x.intersects(BitInterval::from_bits(x)) && self.y.intersects(BitInterval::from_bits(y))
    }
}

impl CursorPolicy for Region {
    type Item = QTreeEntry;

    fn visit(
        &self,
        _parent: Option<&Page>,
        _index: usize,
        child: &PageRef,
        _depth: usize,
    ) -> StoreResult<Visit<Self::Item>> {
        if child.span() > 0 && self.intersects(child.x(), child.y()) {
            Ok(Visit::Descend)
        } else {
            Ok(Visit::Skip)
        }
    }

    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item> {
        match page.body() {
            PageBody::QTreeLeaf(slots) => slots
                .get(index)
                .filter(|slot| self.intersects(slot.x, slot.y))
                .map(QTreeEntry::from),
            _ => None,
        }
    }
}

/// Cursor over every entry of a spatial tree.
pub type QTreeCursor = Cursor<Tiles>;

/// Cursor over the entries within a region.
pub type QTreeRegionCursor = Cursor<Region>;

// =============================================================================
// QTree
// =============================================================================

/// An immutable spatial map.
#[derive(Debug, Clone)]
pub struct QTree {
    core: TreeCore,
}

impl TreeView for QTree {
    fn core(&self) -> &TreeCore {
        &self.core
    }
}

impl Tree for QTree {
    const TREE_TYPE: TreeType = TreeType::QTree;

    fn from_core(core: TreeCore) -> Self {
        Self { core }
    }
}

impl QTree {
    /// Returns the value stored under `key` at `(x, y)`. A key stored at
    /// another point is not found.
    pub fn get(&self, key: &Value, x: u64, y: u64) -> StoreResult<Option<Value>> {
        Ok(node::get(self.root(), key, Point::new(x, y)?)?.map(|slot| slot.value))
    }

    /// Returns the entry stored under `key` wherever it lies. Scans the tree.
    pub fn locate(&self, key: &Value) -> StoreResult<Option<QTreeEntry>> {
        Ok(node::locate(self.root(), key)?.as_ref().map(QTreeEntry::from))
    }

    fn rewritten(&self, root: PageRef, version: Version, post: ZoneId) -> StoreResult<Self> {
        if root.ptr_eq(self.root()) {
            return Ok(self.clone());
        }
        let root = node::balanced(&root, version)?.evacuated(post, version)?;
        Ok(self.with_root(root))
    }

    /// Stores `value` under `key` at `(x, y)`. A key stored at another point
    /// is relocated; finding it there scans the tree, so callers that know
    /// the old point should use [`QTree::moved`]. An absent value removes
    /// the key from `(x, y)`.
    pub fn updated(
        &self,
        key: Value,
        x: u64,
        y: u64,
        value: Value,
        version: Version,
        post: ZoneId,
    ) -> StoreResult<Self> {
        let point = Point::new(x, y)?;
        if value.is_defined() && node::get(self.root(), &key, point)?.is_none() {
            if let Some(slot) = node::locate(self.root(), &key)? {
                return self.relocated(&key, Point::of(&slot), point, &value, version, post);
            }
        }
        let root = node::updated(self.root(), &key, point, &value, version)?;
        self.rewritten(root, version, post)
    }

    /// Removes `key` if it is stored at `(x, y)`.
    pub fn removed(&self, key: &Value, x: u64, y: u64, version: Version, post: ZoneId) -> StoreResult<Self> {
        let root = node::updated(self.root(), key, Point::new(x, y)?, &Value::Absent, version)?;
        self.rewritten(root, version, post)
    }

    /// Moves `key` from `(old_x, old_y)` to `(new_x, new_y)`, storing
    /// `value` there.
    #[allow(clippy::too_many_arguments)]
    pub fn moved(
        &self,
        key: Value,
        old_x: u64,
        old_y: u64,
        new_x: u64,
        new_y: u64,
        value: Value,
        version: Version,
        post: ZoneId,
    ) -> StoreResult<Self> {
        let old = Point::new(old_x, old_y)?;
        let new = Point::new(new_x, new_y)?;
        if old == new || node::get(self.root(), &key, old)?.is_none() {
            return self.updated(key, new_x, new_y, value, version, post);
        }
        self.relocated(&key, old, new, &value, version, post)
    }

    fn relocated(
        &self,
        key: &Value,
        old: Point,
        new: Point,
        value: &Value,
        version: Version,
        post: ZoneId,
    ) -> StoreResult<Self> {
        let removed = node::updated(self.root(), key, old, &Value::Absent, version)?;
        let removed = if removed.ptr_eq(self.root()) {
            removed
        } else {
            node::balanced(&removed, version)?
        };
        let root = node::updated(&removed, key, new, value, version)?;
        self.rewritten(root, version, post)
    }

    /// Returns a cursor over every entry.
    pub fn cursor(&self) -> QTreeCursor {
        Cursor::new(self.root().clone(), Tiles)
    }

    /// Returns a cursor over the entries within the `x` and `y` tiles.
    pub fn cursor_in(&self, x: BitInterval, y: BitInterval) -> QTreeRegionCursor {
        Cursor::new(self.root().clone(), Region::new(x, y))
    }
}
