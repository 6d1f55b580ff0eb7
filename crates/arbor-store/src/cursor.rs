//! Position-tracked cursors over page trees.
//!
//! A [`Cursor`] walks a tree with an explicit frame stack, one frame per
//! page on the path from the root to the current leaf. What it yields, and
//! which subtrees it enters, is decided by a [`CursorPolicy`]:
//!
//! ```text
//!            ┌───────────────┐
//!            │  root frame   │  one child: the tree's root ref
//!            └───────┬───────┘
//!                    │ visit(parent, index, child, depth)
//!            ┌───────▼───────┐      Descend  -> push a frame for the child
//!            │  node frames  │      Skip     -> move past child.span() entries
//!            └───────┬───────┘      Emit(x)  -> yield x for the whole subtree
//!            ┌───────▼───────┐
//!            │  leaf frame   │  slot(page, index) -> item, or None to filter
//!            └───────────────┘
//! ```
//!
//! The cursor's position is the absolute leaf index of the gap it stands in,
//! so [`Cursor::next_index`] counts skipped and filtered entries too.
//! Cursors are read-only and never observe later versions of the tree: the
//! frames pin the pages of the snapshot they were created from.

use std::sync::Arc;

use arbor_common::{StoreResult, Value, Version};

use crate::page::{Page, PageBody, PageRef};

// =============================================================================
// Policies
// =============================================================================

/// What a cursor does with a child subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit<T> {
    /// Enter the subtree.
    Descend,
    /// Pass over the subtree without yielding.
    Skip,
    /// Yield one item standing in for the whole subtree.
    Emit(T),
}

/// Decides which subtrees a cursor enters and what it yields.
pub trait CursorPolicy: Clone + Send {
    /// Items yielded by the cursor.
    type Item;

    /// Called before entering `child`, the `index`th child of `parent`.
    /// `parent` is `None` for the tree's root, which sits at depth 0.
    fn visit(
        &self,
        _parent: Option<&Page>,
        _index: usize,
        _child: &PageRef,
        _depth: usize,
    ) -> StoreResult<Visit<Self::Item>> {
        Ok(Visit::Descend)
    }

    /// Returns the item for a leaf slot, or `None` to filter it out.
    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item>;
}

/// Yields every key-value entry of a B-tree in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Entries;

impl CursorPolicy for Entries {
    type Item = (Value, Value);

    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item> {
        match page.body() {
            PageBody::BTreeLeaf(slots) => slots.get(index).cloned(),
            _ => None,
        }
    }
}

/// Stops descending at `max_depth` where a subtree has a memoized fold, and
/// yields `(first key of the subtree, fold)` in its place.
#[derive(Debug, Clone, Copy)]
pub struct DepthLimited {
    max_depth: usize,
}

impl DepthLimited {
    /// Creates a policy summarizing subtrees at `max_depth` and below.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl CursorPolicy for DepthLimited {
    type Item = (Value, Value);

    fn visit(
        &self,
        parent: Option<&Page>,
        index: usize,
        child: &PageRef,
        depth: usize,
    ) -> StoreResult<Visit<Self::Item>> {
        if depth < self.max_depth || !child.fold().is_defined() {
            return Ok(Visit::Descend);
        }
        let key = match parent.map(Page::body) {
            Some(PageBody::BTreeNode(entries)) => entries.get(index).map(|(key, _)| key.clone()),
            _ => first_key(&*child.page()?),
        };
        Ok(Visit::Emit((key.unwrap_or_default(), child.fold().clone())))
    }

    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item> {
        Entries.slot(page, index)
    }
}

/// Node keys are the first keys of their children, so one page suffices.
fn first_key(page: &Page) -> Option<Value> {
    match page.body() {
        PageBody::BTreeLeaf(slots) => slots.first().map(|(key, _)| key.clone()),
        PageBody::BTreeNode(entries) => entries.first().map(|(key, _)| key.clone()),
        _ => None,
    }
}

/// Restricts another policy to pages written after version `since`.
///
/// Unchanged subtrees are skipped without being entered; the entries of a
/// changed leaf are all yielded. A child is only loaded to read its version
/// when its page has never been in memory.
#[derive(Debug, Clone)]
pub struct Delta<P> {
    since: Version,
    inner: P,
}

impl<P> Delta<P> {
    /// Wraps `inner`, keeping only pages with version greater than `since`.
    pub fn new(since: Version, inner: P) -> Self {
        Self { since, inner }
    }
}

impl<P: CursorPolicy> CursorPolicy for Delta<P> {
    type Item = P::Item;

    fn visit(
        &self,
        parent: Option<&Page>,
        index: usize,
        child: &PageRef,
        depth: usize,
    ) -> StoreResult<Visit<Self::Item>> {
        let version = match child.known_version() {
            Some(version) => version,
            None => child.page()?.version(),
        };
        if version <= self.since {
            return Ok(Visit::Skip);
        }
        self.inner.visit(parent, index, child, depth)
    }

    fn slot(&self, page: &Page, index: usize) -> Option<Self::Item> {
        self.inner.slot(page, index)
    }
}

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug, Clone)]
enum FrameNode {
    /// Virtual parent of the tree's root; never popped.
    Root(PageRef),
    Page(Arc<Page>),
}

#[derive(Debug, Clone)]
struct Frame {
    node: FrameNode,
    /// Gap between entries; the next forward entry is `index`.
    index: usize,
    /// Child currently entered, if any.
    descended: Option<usize>,
    child_depth: usize,
}

impl Frame {
    fn root(root: PageRef) -> Self {
        Self {
            node: FrameNode::Root(root),
            index: 0,
            descended: None,
            child_depth: 0,
        }
    }

    fn page(page: Arc<Page>, depth: usize, at_end: bool) -> Self {
        let index = if at_end { page.arity() } else { 0 };
        Self {
            node: FrameNode::Page(page),
            index,
            descended: None,
            child_depth: depth + 1,
        }
    }

    fn len(&self) -> usize {
        match &self.node {
            FrameNode::Root(_) => 1,
            FrameNode::Page(page) => page.arity(),
        }
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// A bidirectional cursor over a tree snapshot.
#[derive(Debug, Clone)]
pub struct Cursor<P> {
    policy: P,
    stack: Vec<Frame>,
    position: u64,
}

impl<P: CursorPolicy> Cursor<P> {
    /// Creates a cursor positioned before the first entry under `root`.
    pub fn new(root: PageRef, policy: P) -> Self {
        Self {
            policy,
            stack: vec![Frame::root(root)],
            position: 0,
        }
    }

    /// Moves the cursor past the last entry, for backward traversal.
    #[must_use]
    pub fn to_end(mut self) -> Self {
        self.stack.truncate(1);
        let mut span = 0;
        if let Some(frame) = self.stack.first_mut() {
            frame.index = 1;
            frame.descended = None;
            if let FrameNode::Root(root) = &frame.node {
                span = root.span();
            }
        }
        self.position = span;
        self
    }

    /// Returns a cursor with the same policy over `root`, moved to this
    /// cursor's position.
    pub fn reopened(&self, root: PageRef) -> StoreResult<Self> {
        let mut cursor = Self::new(root, self.policy.clone());
        cursor.skip(self.position)?;
        Ok(cursor)
    }

    /// Absolute index of the entry [`Cursor::next`] would return.
    pub fn next_index(&self) -> u64 {
        self.position
    }

    /// Absolute index of the entry [`Cursor::previous`] would return.
    pub fn previous_index(&self) -> Option<u64> {
        self.position.checked_sub(1)
    }

    /// Returns the next item without advancing.
    pub fn head(&self) -> StoreResult<Option<P::Item>> {
        self.clone().next()
    }

    /// Advances past the next item; returns false at the end.
    pub fn step(&mut self) -> StoreResult<bool> {
        Ok(self.next()?.is_some())
    }

    /// Returns true if a next item exists.
    pub fn has_next(&self) -> StoreResult<bool> {
        Ok(self.head()?.is_some())
    }

    /// Returns true if a previous item exists.
    pub fn has_previous(&self) -> StoreResult<bool> {
        Ok(self.clone().previous()?.is_some())
    }

    /// Pops the top frame, leaving its parent past (forward) or before
    /// (backward) the child. Returns false at the root frame.
    fn pop(&mut self, forward: bool) -> bool {
        if self.stack.len() <= 1 {
            return false;
        }
        self.stack.pop();
        if let Some(parent) = self.stack.last_mut() {
            if let Some(child) = parent.descended.take() {
                parent.index = if forward { child + 1 } else { child };
            }
        }
        true
    }

    /// Returns the next item and advances.
    pub fn next(&mut self) -> StoreResult<Option<P::Item>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            if frame.index >= frame.len() {
                if !self.pop(true) {
                    return Ok(None);
                }
                continue;
            }
            let index = frame.index;
            let (parent, child) = match &frame.node {
                FrameNode::Page(page) if !page.is_node() => {
                    frame.index += 1;
                    self.position += 1;
                    if let Some(item) = self.policy.slot(page, index) {
                        return Ok(Some(item));
                    }
                    continue;
                }
                FrameNode::Page(page) => (Some(&**page), page.child(index).cloned()),
                FrameNode::Root(root) => (None, Some(root.clone())),
            };
            let Some(child) = child else {
                frame.index += 1;
                continue;
            };
            let depth = frame.child_depth;
            match self.policy.visit(parent, index, &child, depth)? {
                Visit::Descend => {
                    let page = child.page()?;
                    frame.descended = Some(index);
                    self.stack.push(Frame::page(page, depth, false));
                }
                Visit::Skip => {
                    frame.index += 1;
                    self.position += child.span();
                }
                Visit::Emit(item) => {
                    frame.index += 1;
                    self.position += child.span();
                    return Ok(Some(item));
                }
            }
        }
    }

    /// Returns the previous item and moves back.
    pub fn previous(&mut self) -> StoreResult<Option<P::Item>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            if frame.index == 0 {
                if !self.pop(false) {
                    return Ok(None);
                }
                continue;
            }
            let index = frame.index - 1;
            let (parent, child) = match &frame.node {
                FrameNode::Page(page) if !page.is_node() => {
                    frame.index = index;
                    self.position -= 1;
                    if let Some(item) = self.policy.slot(page, index) {
                        return Ok(Some(item));
                    }
                    continue;
                }
                FrameNode::Page(page) => (Some(&**page), page.child(index).cloned()),
                FrameNode::Root(root) => (None, Some(root.clone())),
            };
            let Some(child) = child else {
                frame.index = index;
                continue;
            };
            let depth = frame.child_depth;
            match self.policy.visit(parent, index, &child, depth)? {
                Visit::Descend => {
                    let page = child.page()?;
                    frame.descended = Some(index);
                    self.stack.push(Frame::page(page, depth, true));
                }
                Visit::Skip => {
                    frame.index = index;
                    self.position -= child.span();
                }
                Visit::Emit(item) => {
                    frame.index = index;
                    self.position -= child.span();
                    return Ok(Some(item));
                }
            }
        }
    }

    /// Moves forward by up to `count` leaf positions, entering only the
    /// subtrees the target lies in. Returns the number of positions moved.
    pub fn skip(&mut self, count: u64) -> StoreResult<u64> {
        let start = self.position;
        let mut remaining = count;
        while remaining > 0 {
            let Some(frame) = self.stack.last_mut() else {
                break;
            };
            if frame.index >= frame.len() {
                if !self.pop(true) {
                    break;
                }
                continue;
            }
            let child = match &frame.node {
                FrameNode::Page(page) if !page.is_node() => {
                    let available = (page.arity() - frame.index) as u64;
                    let moved = available.min(remaining);
                    frame.index += moved as usize;
                    self.position += moved;
                    remaining -= moved;
                    continue;
                }
                FrameNode::Page(page) => page.child(frame.index).cloned(),
                FrameNode::Root(root) => Some(root.clone()),
            };
            let Some(child) = child else {
                frame.index += 1;
                continue;
            };
            if child.span() <= remaining {
                frame.index += 1;
                self.position += child.span();
                remaining -= child.span();
            } else {
                let page = child.page()?;
                let depth = frame.child_depth;
                frame.descended = Some(frame.index);
                self.stack.push(Frame::page(page, depth, false));
            }
        }
        Ok(self.position - start)
    }

    /// Iterates backward from the current position.
    pub fn rev(self) -> Backward<P> {
        Backward {
            cursor: self,
            failed: false,
        }
    }
}

// =============================================================================
// Iterator Adaptors
// =============================================================================

/// Forward iterator over a cursor. Fused after the first error.
#[derive(Debug, Clone)]
pub struct Forward<P> {
    cursor: Cursor<P>,
    failed: bool,
}

impl<P: CursorPolicy> Iterator for Forward<P> {
    type Item = StoreResult<P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.cursor.next().transpose().map(|item| {
            self.failed = item.is_err();
            item
        })
    }
}

impl<P: CursorPolicy> IntoIterator for Cursor<P> {
    type Item = StoreResult<P::Item>;
    type IntoIter = Forward<P>;

    fn into_iter(self) -> Self::IntoIter {
        Forward {
            cursor: self,
            failed: false,
        }
    }
}

/// Backward iterator over a cursor. Fused after the first error.
#[derive(Debug, Clone)]
pub struct Backward<P> {
    cursor: Cursor<P>,
    failed: bool,
}

impl<P: CursorPolicy> Iterator for Backward<P> {
    type Item = StoreResult<P::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.cursor.previous().transpose().map(|item| {
            self.failed = item.is_err();
            item
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use crate::context::StoreContext;
    use crate::store::MemoryStore;
    use crate::tree::{Tree, TreeView};
    use arbor_common::StoreSettings;

    fn tree(count: i64) -> BTree {
        let store = MemoryStore::new(StoreSettings::for_testing());
        let mut tree = BTree::empty(store.page_context(), 1);
        for i in 0..count {
            tree = tree.updated(Value::from(i), Value::from(i * 10), 1, 0).unwrap();
        }
        tree
    }

    fn keys(items: impl IntoIterator<Item = StoreResult<(Value, Value)>>) -> Vec<i64> {
        items
            .into_iter()
            .map(|item| item.unwrap().0.as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_forward_and_backward() {
        let tree = tree(100);
        assert!(tree.root().hard_page().unwrap().is_node());
        assert_eq!(keys(tree.cursor()), (0..100).collect::<Vec<_>>());
        assert_eq!(
            keys(tree.cursor().to_end().rev()),
            (0..100).rev().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_direction_change() {
        let tree = tree(50);
        let mut cursor = tree.cursor();
        for _ in 0..30 {
            cursor.next().unwrap();
        }
        assert_eq!(cursor.next_index(), 30);
        let (key, _) = cursor.previous().unwrap().unwrap();
        assert_eq!(key, Value::from(29i64));
        assert_eq!(cursor.previous_index(), Some(28));
        let (key, _) = cursor.next().unwrap().unwrap();
        assert_eq!(key, Value::from(29i64));
    }

    #[test]
    fn test_head_does_not_advance() {
        let tree = tree(3);
        let mut cursor = tree.cursor();
        assert_eq!(cursor.head().unwrap().unwrap().0, Value::from(0i64));
        assert!(cursor.step().unwrap());
        assert_eq!(cursor.head().unwrap().unwrap().0, Value::from(1i64));
        assert!(cursor.has_previous().unwrap());
        cursor.skip(5).unwrap();
        assert!(!cursor.has_next().unwrap());
        assert_eq!(cursor.next_index(), 3);
    }

    #[test]
    fn test_skip_lands_on_index() {
        let tree = tree(200);
        for target in [0u64, 1, 57, 150, 199] {
            let mut cursor = tree.cursor();
            assert_eq!(cursor.skip(target).unwrap(), target);
            assert_eq!(cursor.next_index(), target);
            let (key, _) = cursor.next().unwrap().unwrap();
            assert_eq!(key, Value::from(target as i64));
        }
        let mut cursor = tree.cursor();
        assert_eq!(cursor.skip(500).unwrap(), 200);
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_empty_tree() {
        let tree = tree(0);
        let mut cursor = tree.cursor();
        assert!(cursor.next().unwrap().is_none());
        assert!(cursor.previous().unwrap().is_none());
        assert_eq!(cursor.previous_index(), None);
    }

    #[test]
    fn test_delta_yields_changed_pages_only() {
        let base = tree(200);
        let changed = base.updated(Value::from(150i64), Value::from(-1i64), 2, 0).unwrap();
        let delta: Vec<_> = changed
            .delta_cursor(1)
            .into_iter()
            .map(|item| item.unwrap())
            .collect();
        assert!(!delta.is_empty());
        assert!(delta.len() < 200);
        assert!(delta.contains(&(Value::from(150i64), Value::from(-1i64))));
        assert!(changed.delta_cursor(2).into_iter().next().is_none());
    }

    #[test]
    fn test_reopened_keeps_position() {
        let tree = tree(200);
        let mut cursor = tree.cursor();
        cursor.skip(120).unwrap();
        let grown = tree.updated(Value::from(500i64), Value::from(0i64), 2, 0).unwrap();
        let mut reopened = cursor.reopened(grown.root().clone()).unwrap();
        assert_eq!(reopened.next_index(), 120);
        assert_eq!(reopened.next().unwrap().unwrap().0, Value::from(120i64));

        let mut end = tree.cursor().to_end().reopened(tree.root().clone()).unwrap();
        assert_eq!(end.next_index(), 200);
        assert_eq!(end.previous().unwrap().unwrap().0, Value::from(199i64));
    }

    #[test]
    fn test_depth_limited_uses_folds() {
        let tree = tree(200);
        let sum = |a: &Value, b: &Value| {
            Value::from(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0))
        };
        let reduced = tree.reduced(&Value::from(0i64), sum, sum, 1).unwrap();

        let whole: Vec<_> = reduced
            .depth_cursor(0)
            .into_iter()
            .map(|item| item.unwrap())
            .collect();
        assert_eq!(whole, vec![(Value::from(0i64), reduced.fold().clone())]);

        let summary: Vec<_> = reduced
            .depth_cursor(1)
            .into_iter()
            .map(|item| item.unwrap())
            .collect();
        assert!(summary.len() > 1 && summary.len() < 200);
        let total: i64 = summary.iter().map(|(_, fold)| fold.as_int().unwrap()).sum();
        assert_eq!(total, (0..200).map(|i| i * 10).sum::<i64>());

        // without folds the cursor falls through to the entries
        assert_eq!(keys(tree.depth_cursor(0)).len(), 200);
    }
}
