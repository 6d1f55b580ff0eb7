//! Cursors over a map client's trunk.

use arbor_common::StoreResult;

use super::Committer;
use crate::context::TreeDelegate;
use crate::cursor::{Cursor, CursorPolicy};
use crate::tree::{Tree, TreeView};

/// A cursor that survives store errors the way map reads do.
///
/// A failed step is retried up to `max_retries` times, each time on a cursor
/// reopened at the same position over the trunk's current tree. The cursor
/// therefore sees a snapshot until its first retry, and the tree current at
/// the retry afterwards.
pub struct MapCursor<'a, T, P, D: ?Sized = dyn TreeDelegate> {
    committer: &'a Committer<T, D>,
    cursor: Cursor<P>,
    stale: bool,
}

impl<'a, T: Tree, P: CursorPolicy, D: TreeDelegate + ?Sized> MapCursor<'a, T, P, D> {
    pub(crate) fn new(committer: &'a Committer<T, D>, cursor: Cursor<P>) -> Self {
        Self {
            committer,
            cursor,
            stale: false,
        }
    }

    fn retrying<R>(&mut self, mut op: impl FnMut(&mut Cursor<P>) -> StoreResult<R>) -> StoreResult<R> {
        let mut retries = 0;
        loop {
            let attempt = match self.reopen_if_stale() {
                Ok(()) => op(&mut self.cursor),
                Err(e) => Err(e),
            };
            match attempt {
                Ok(result) => return Ok(result),
                Err(e) => {
                    self.committer.recover(e, &mut retries)?;
                    self.stale = true;
                }
            }
        }
    }

    fn reopen_if_stale(&mut self) -> StoreResult<()> {
        if self.stale {
            let root = self.committer.tree().root().clone();
            self.cursor = self.cursor.reopened(root)?;
            self.stale = false;
        }
        Ok(())
    }

    /// Moves the cursor past the last entry, for backward traversal.
    #[must_use]
    pub fn to_end(mut self) -> Self {
        self.cursor = self.cursor.to_end();
        self
    }

    /// Absolute index of the entry [`MapCursor::next`] would return.
    pub fn next_index(&self) -> u64 {
        self.cursor.next_index()
    }

    /// Absolute index of the entry [`MapCursor::previous`] would return.
    pub fn previous_index(&self) -> Option<u64> {
        self.cursor.previous_index()
    }

    /// Returns the next item without advancing.
    pub fn head(&mut self) -> StoreResult<Option<P::Item>> {
        self.retrying(|cursor| cursor.head())
    }

    /// Returns true if a next item exists.
    pub fn has_next(&mut self) -> StoreResult<bool> {
        self.retrying(|cursor| cursor.has_next())
    }

    /// Returns true if a previous item exists.
    pub fn has_previous(&mut self) -> StoreResult<bool> {
        self.retrying(|cursor| cursor.has_previous())
    }

    /// Returns the next item and advances.
    pub fn next(&mut self) -> StoreResult<Option<P::Item>> {
        self.retrying(Cursor::next)
    }

    /// Returns the previous item and moves back.
    pub fn previous(&mut self) -> StoreResult<Option<P::Item>> {
        self.retrying(Cursor::previous)
    }

    /// Moves forward by up to `count` positions. Returns the number moved.
    pub fn skip(&mut self, count: u64) -> StoreResult<u64> {
        let target = self.cursor.next_index().saturating_add(count);
        let start = self.cursor.next_index();
        self.retrying(|cursor| {
            let remaining = target.saturating_sub(cursor.next_index());
            cursor.skip(remaining)
        })?;
        Ok(self.cursor.next_index().saturating_sub(start))
    }

    /// Iterates backward from the current position.
    pub fn rev(self) -> MapBackward<'a, T, P, D> {
        MapBackward {
            cursor: self,
            failed: false,
        }
    }
}

impl<'a, T: Tree, P: CursorPolicy, D: TreeDelegate + ?Sized> IntoIterator for MapCursor<'a, T, P, D> {
    type Item = StoreResult<P::Item>;
    type IntoIter = MapForward<'a, T, P, D>;

    fn into_iter(self) -> Self::IntoIter {
        MapForward {
            cursor: self,
            failed: false,
        }
    }
}

/// Forward iterator over a [`MapCursor`]. Fused after the first error.
pub struct MapForward<'a, T, P, D: ?Sized = dyn TreeDelegate> {
    cursor: MapCursor<'a, T, P, D>,
    failed: bool,
}

impl<T: Tree, P: CursorPolicy, D: TreeDelegate + ?Sized> Iterator for MapForward<'_, T, P, D> {
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

/// Backward iterator over a [`MapCursor`]. Fused after the first error.
pub struct MapBackward<'a, T, P, D: ?Sized = dyn TreeDelegate> {
    cursor: MapCursor<'a, T, P, D>,
    failed: bool,
}

impl<T: Tree, P: CursorPolicy, D: TreeDelegate + ?Sized> Iterator for MapBackward<'_, T, P, D> {
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
    use std::sync::Arc;

    use super::*;
    use crate::btree::BTree;
    use crate::context::StoreContext;
    use crate::map::BTreeMap;
    use crate::store::MemoryStore;
    use arbor_common::{StoreSettings, Value};

    #[test]
    fn test_map_cursor_walks_both_ways() {
        let store = Arc::new(MemoryStore::new(StoreSettings::for_testing()));
        let map = BTreeMap::new(BTree::empty(store.page_context(), 1), store.clone());
        for i in 0..120i64 {
            map.put(Value::from(i), Value::from(i)).unwrap();
        }
        let mut cursor = map.cursor();
        assert!(!cursor.has_previous().unwrap());
        assert_eq!(cursor.skip(100).unwrap(), 100);
        assert_eq!(cursor.next().unwrap().unwrap().0, Value::from(100i64));
        assert_eq!(cursor.previous().unwrap().unwrap().0, Value::from(100i64));
        assert_eq!(map.cursor().into_iter().count(), 120);

        let backward: Vec<_> = map.cursor().to_end().rev().map(|item| item.unwrap().0).collect();
        assert_eq!(backward.first(), Some(&Value::from(119i64)));
        assert_eq!(backward.len(), 120);
    }
}
