//! Single value trees.
//!
//! A [`UTree`] is the degenerate one-leaf tree: its root is a `@uleaf` page
//! holding one value. It shares sizing, caching, commit and evacuation with
//! the other tree kinds but never balances.

use std::sync::Arc;

use arbor_common::{StoreResult, Value, Version, ZoneId};

use crate::page::{Page, PageBody, PageRef, TreeType};
use crate::tree::{Tree, TreeCore, TreeView};

/// An immutable single value register.
#[derive(Debug, Clone)]
pub struct UTree {
    core: TreeCore,
}

impl TreeView for UTree {
    fn core(&self) -> &TreeCore {
        &self.core
    }
}

impl Tree for UTree {
    const TREE_TYPE: TreeType = TreeType::UTree;

    fn from_core(core: TreeCore) -> Self {
        Self { core }
    }
}

impl UTree {
    /// Returns the stored value; `Absent` when unset.
    pub fn get(&self) -> StoreResult<Value> {
        let page = self.root().page()?;
        match page.body() {
            PageBody::UTreeLeaf(value) => Ok(value.clone()),
            _ => Ok(Value::Absent),
        }
    }

    /// Replaces the stored value.
    pub fn updated(&self, value: Value, version: Version, post: ZoneId) -> StoreResult<Self> {
        if self.get()? == value {
            return Ok(self.clone());
        }
        let page = Page::new(version, self.seed().stem, PageBody::UTreeLeaf(value));
        let root = PageRef::from_page(Arc::clone(self.root().context()), page, Value::Absent)
            .evacuated(post, version)?;
        Ok(self.with_root(root))
    }
}
