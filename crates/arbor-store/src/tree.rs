//! Tree roots, seeds and the operations every tree kind shares.
//!
//! A tree is an immutable value: a root [`PageRef`], the [`Seed`] that
//! identifies it durably, and residency/transience flags. Mutators return a
//! new tree, or a clone sharing the same root when nothing changed, so
//! callers detect no-ops with [`Tree::same_as`].

use std::fmt::{self, Write};
use std::sync::Arc;

use arbor_common::text::TextReader;
use arbor_common::{Stem, StoreError, StoreResult, Timestamp, Value, Version, ZoneId};
use tracing::debug;

use crate::context::{LoaderGuard, PageContext};
use crate::page::{read_count, DiffWriter, Page, PageRef, TreeType};

// =============================================================================
// Seed
// =============================================================================

/// Durable identity of a tree.
///
/// Encoded together with the root header as
/// `@seed(tree:<kind>,stem:<n>,created:<ms>,updated:<ms>)@page(...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    /// Tree kind.
    pub tree_type: TreeType,
    /// Stem shared by all of the tree's pages.
    pub stem: Stem,
    /// When the tree was created.
    pub created: Timestamp,
    /// When the tree was last committed.
    pub updated: Timestamp,
}

impl Seed {
    /// Creates a seed stamped with the current time.
    pub fn new(tree_type: TreeType, stem: Stem) -> Self {
        let now = Timestamp::now();
        Self {
            tree_type,
            stem,
            created: now,
            updated: now,
        }
    }

    /// Returns a copy with `updated` refreshed; never moves backwards.
    #[must_use]
    pub fn touched(&self) -> Self {
        Self {
            updated: self.updated.max(Timestamp::now()),
            ..self.clone()
        }
    }

    /// Writes the seed followed by the root header.
    pub fn write(&self, root: &PageRef, out: &mut impl Write) -> fmt::Result {
        write!(
            out,
            "@seed(tree:{},stem:{},created:{},updated:{})",
            self.tree_type, self.stem, self.created, self.updated
        )?;
        root.write_page_ref(out)
    }

    /// Decodes a seed and its unloaded root.
    pub fn parse(input: &str, context: Arc<dyn PageContext>) -> StoreResult<(Seed, PageRef)> {
        let malformed = |e: StoreError| StoreError::malformed_seed(e.reason(), input);
        let mut reader = TextReader::new(input);
        let seed = Self::read(&mut reader).map_err(malformed)?;
        let root = PageRef::read(&mut reader, context, seed.tree_type, seed.stem).map_err(malformed)?;
        reader.finish().map_err(malformed)?;
        Ok((seed, root))
    }

    fn read(reader: &mut TextReader<'_>) -> StoreResult<Seed> {
        reader.expect_str("@seed(tree:")?;
        let name = reader.read_ident()?;
        let tree_type = TreeType::from_name(name)
            .ok_or_else(|| reader.error(format!("unknown tree type {name:?}")))?;
        reader.expect_str(",stem:")?;
        let stem = read_count(reader, "stem")?;
        reader.expect_str(",created:")?;
        let created = Timestamp::from_millis(read_count(reader, "created")?);
        reader.expect_str(",updated:")?;
        let updated = Timestamp::from_millis(read_count(reader, "updated")?);
        reader.expect(')')?;
        Ok(Seed {
            tree_type,
            stem,
            created,
            updated,
        })
    }
}

// =============================================================================
// Tree Core
// =============================================================================

/// The state every tree kind carries.
#[derive(Debug, Clone)]
pub struct TreeCore {
    root: PageRef,
    seed: Seed,
    is_resident: bool,
    is_transient: bool,
}

impl TreeCore {
    /// Creates a non-resident, durable tree state.
    pub fn new(root: PageRef, seed: Seed) -> Self {
        Self {
            root,
            seed,
            is_resident: false,
            is_transient: false,
        }
    }

    fn with_root(&self, root: PageRef) -> Self {
        Self {
            root,
            ..self.clone()
        }
    }
}

/// Read-only view of a tree, independent of its kind.
pub trait TreeView: Send + Sync + fmt::Debug {
    /// Returns the tree state.
    fn core(&self) -> &TreeCore;

    /// Returns the root reference.
    fn root(&self) -> &PageRef {
        &self.core().root
    }

    /// Returns the seed.
    fn seed(&self) -> &Seed {
        &self.core().seed
    }

    /// Returns the tree kind.
    fn tree_type(&self) -> TreeType {
        self.core().seed.tree_type
    }

    /// Returns true if every page stays strongly held.
    fn is_resident(&self) -> bool {
        self.core().is_resident
    }

    /// Returns true if the tree is never persisted.
    fn is_transient(&self) -> bool {
        self.core().is_transient
    }

    /// Number of entries.
    fn span(&self) -> u64 {
        self.root().span()
    }

    /// Encoded size of every page.
    fn tree_size(&self) -> u64 {
        self.root().tree_size()
    }

    /// Encoded size of the pending diff if the root was last written at
    /// `version`, else 0.
    fn diff_size(&self, version: Version) -> u64 {
        match self.root().soft_page() {
            Some(page) if page.version() == version => self.root().diff_size(),
            _ => 0,
        }
    }

    /// Encoded size of every uncommitted page.
    fn pending_size(&self) -> u64 {
        self.root().diff_size()
    }

    /// Encodes the seed and root header.
    fn to_seed_string(&self) -> String {
        let mut out = String::new();
        // writing to a String never fails
        let _ = self.seed().write(self.root(), &mut out);
        out
    }
}

/// Operations shared by every tree kind.
pub trait Tree: TreeView + Clone + 'static {
    /// The tree kind.
    const TREE_TYPE: TreeType;

    /// Wraps a tree state.
    fn from_core(core: TreeCore) -> Self;

    /// Creates an empty tree.
    fn empty(context: Arc<dyn PageContext>, stem: Stem) -> Self {
        let root = PageRef::from_page(context, Page::empty(Self::TREE_TYPE, stem, 0), Value::Absent);
        Self::from_core(TreeCore::new(root, Seed::new(Self::TREE_TYPE, stem)))
    }

    /// Opens a tree from its encoded seed. The root stays unloaded.
    fn from_seed(input: &str, context: Arc<dyn PageContext>) -> StoreResult<Self> {
        let (seed, root) = Seed::parse(input, context)?;
        if seed.tree_type != Self::TREE_TYPE {
            return Err(StoreError::malformed_seed(
                format!("expected a {} seed", Self::TREE_TYPE),
                input,
            ));
        }
        Ok(Self::from_core(TreeCore::new(root, seed)))
    }

    /// Returns a copy with the residency flag set.
    #[must_use]
    fn with_resident(&self, is_resident: bool) -> Self {
        Self::from_core(TreeCore {
            is_resident,
            ..self.core().clone()
        })
    }

    /// Returns a copy with the transience flag set.
    #[must_use]
    fn with_transient(&self, is_transient: bool) -> Self {
        Self::from_core(TreeCore {
            is_transient,
            ..self.core().clone()
        })
    }

    /// Returns true if both trees share the same root.
    fn same_as(&self, other: &Self) -> bool {
        self.root().ptr_eq(other.root())
    }

    /// Returns a tree with `root`, or a clone if the root is unchanged.
    #[must_use]
    fn with_root(&self, root: PageRef) -> Self {
        if root.ptr_eq(self.root()) {
            self.clone()
        } else {
            Self::from_core(self.core().with_root(root))
        }
    }

    /// Replaces the root with the canonical empty page.
    #[must_use]
    fn cleared(&self, version: Version) -> Self {
        let is_empty = self.span() == 0
            && self
                .root()
                .soft_page()
                .map_or(false, |page| !page.is_node());
        if is_empty {
            return self.clone();
        }
        let page = Page::empty(Self::TREE_TYPE, self.seed().stem, version);
        self.with_root(PageRef::from_page(
            Arc::clone(self.root().context()),
            page,
            Value::Absent,
        ))
    }

    /// Assigns zone locations as if the diff were written at `base`.
    fn committed(&self, zone: ZoneId, base: u64, version: Version) -> StoreResult<Self> {
        let root = self.root().committed(zone, base, version)?;
        Ok(self.with_committed_root(root))
    }

    /// Demotes pages written at or after `version` to uncommitted.
    fn uncommitted(&self, version: Version) -> StoreResult<Self> {
        Ok(self.with_root(self.root().uncommitted(version)?))
    }

    /// Writes the pending diff into `out` and returns the committed tree.
    fn write_diff(&self, out: &mut String, zone: ZoneId, base: u64, version: Version) -> StoreResult<Self> {
        let mut diff = DiffWriter::new(out, zone, base, version);
        let root = self.root().commit_into(&mut diff)?;
        Ok(self.with_committed_root(root))
    }

    /// Builds the pending diff and the committed tree in one pass.
    fn build_diff(&self, zone: ZoneId, base: u64, version: Version) -> StoreResult<(String, Self)> {
        let mut out = String::new();
        let tree = self.write_diff(&mut out, zone, base, version)?;
        debug!(
            tree = %Self::TREE_TYPE,
            stem = self.seed().stem,
            zone,
            base,
            bytes = out.len(),
            "built diff"
        );
        Ok((out, tree))
    }

    #[doc(hidden)]
    fn with_committed_root(&self, root: PageRef) -> Self {
        if root.ptr_eq(self.root()) {
            return self.clone();
        }
        Self::from_core(TreeCore {
            root,
            seed: self.seed().touched(),
            ..self.core().clone()
        })
    }

    /// Demotes committed pages with version `<= version` to the weak
    /// cache tier. Resident trees are left alone.
    fn soften(&self, version: Version) {
        if !self.is_resident() {
            self.root().soften(version);
        }
    }

    /// Rewrites every page whose subtree depends on a zone older than
    /// `post`.
    fn evacuated(&self, post: ZoneId, version: Version) -> StoreResult<Self> {
        Ok(self.with_root(self.root().evacuated(post, version)?))
    }

    /// Loads every page and marks the tree resident.
    fn loaded(&self) -> StoreResult<Self> {
        let mut loader = LoaderGuard::open(self.root().context().as_ref(), true)?;
        self.root().load_tree(&mut loader)?;
        loader.close()?;
        Ok(self.with_resident(true))
    }

    /// Memoizes folds throughout the tree. See [`PageRef::reduced`].
    fn reduced<C, M>(&self, identity: &Value, combine: C, merge: M, version: Version) -> StoreResult<Self>
    where
        C: Fn(&Value, &Value) -> Value,
        M: Fn(&Value, &Value) -> Value,
    {
        Ok(self.with_root(self.root().reduced(identity, &combine, &merge, version)?))
    }

    /// Returns the root fold; `Absent` until reduced.
    fn fold(&self) -> &Value {
        self.root().fold()
    }
}
