//! Lazily resolved, cache-tiered page references.
//!
//! A [`PageRef`] owns a cache slot with three tiers:
//!
//! | Tier | Meaning |
//! |------|---------|
//! | Strong | the page is held; uncommitted pages always are |
//! | Weak | the page may be collected; it is reloaded on demand |
//! | Unloaded | the page must be fetched through a [`PageLoader`] |
//!
//! Softening moves committed pages from Strong to Weak. It only changes which
//! handle refers to an immutable page, so it is safe to run concurrently
//! with readers.
//!
//! [`PageLoader`]: crate::context::PageLoader

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::{Arc, OnceLock, Weak};

use arbor_common::text::{ByteCount, TextReader};
use arbor_common::{Stem, StoreError, StoreResult, Value, Version, ZoneId};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::codec::PageHeader;
use super::{Page, PageBody, TreeType};
use crate::context::{LoaderGuard, PageContext};
use crate::qtree::BitInterval;

/// Cache slot contents.
#[derive(Debug, Clone)]
enum CacheSlot {
    Unloaded,
    Strong(Arc<Page>),
    Weak(Weak<Page>),
}

/// Observable cache tier of a page reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Not in memory.
    Unloaded,
    /// Held strongly.
    Strong,
    /// Held weakly; may have been collected.
    Weak,
}

struct Inner {
    context: Arc<dyn PageContext>,
    tree_type: TreeType,
    stem: Stem,
    header: PageHeader,
    slot: RwLock<CacheSlot>,
    /// Version of the page, once it has been in memory.
    version: OnceLock<Version>,
    diff_size: OnceLock<u64>,
    page_ref_size: OnceLock<usize>,
}

/// A shared reference to a page.
///
/// Cloning is cheap; clones share the cache slot and memoized sizes.
#[derive(Clone)]
pub struct PageRef {
    inner: Arc<Inner>,
}

impl PageRef {
    // =========================================================================
    // Construction
    // =========================================================================

    fn with_slot(
        context: Arc<dyn PageContext>,
        tree_type: TreeType,
        stem: Stem,
        header: PageHeader,
        slot: CacheSlot,
    ) -> Self {
        let version = match &slot {
            CacheSlot::Strong(page) => OnceLock::from(page.version()),
            _ => OnceLock::new(),
        };
        Self {
            inner: Arc::new(Inner {
                context,
                tree_type,
                stem,
                header,
                slot: RwLock::new(slot),
                version,
                diff_size: OnceLock::new(),
                page_ref_size: OnceLock::new(),
            }),
        }
    }

    /// Creates an unloaded reference from a decoded header.
    pub fn from_header(
        context: Arc<dyn PageContext>,
        tree_type: TreeType,
        stem: Stem,
        header: PageHeader,
    ) -> Self {
        Self::with_slot(context, tree_type, stem, header, CacheSlot::Unloaded)
    }

    /// Creates an uncommitted reference to a freshly built page.
    pub fn from_page(context: Arc<dyn PageContext>, page: Page, fold: Value) -> Self {
        let mut header = PageHeader {
            fold,
            ..PageHeader::default()
        };
        Self::memoize_size(&mut header, &page);
        header.post = page
            .children()
            .map(PageRef::post)
            .filter(|&post| post != 0)
            .min()
            .unwrap_or(0);
        Self::with_slot(
            context,
            page.tree_type(),
            page.stem(),
            header,
            CacheSlot::Strong(Arc::new(page)),
        )
    }

    /// Decodes a header into an unloaded reference.
    pub fn parse(
        input: &str,
        context: Arc<dyn PageContext>,
        tree_type: TreeType,
        stem: Stem,
    ) -> StoreResult<Self> {
        let header = PageHeader::parse(input)?;
        Ok(Self::from_header(context, tree_type, stem, header))
    }

    /// Reads a header from `reader` into an unloaded reference.
    pub(crate) fn read(
        reader: &mut TextReader<'_>,
        context: Arc<dyn PageContext>,
        tree_type: TreeType,
        stem: Stem,
    ) -> StoreResult<Self> {
        let header = PageHeader::read(reader)?;
        Ok(Self::from_header(context, tree_type, stem, header))
    }

    /// Fills in the size, area, span and tile fields derived from `page`.
    fn memoize_size(header: &mut PageHeader, page: &Page) {
        header.size = page.encoded_len();
        header.area = header.size as u64 + 1 + page.children().map(PageRef::tree_size).sum::<u64>();
        header.span = page.span();
        if let Some((x, y)) = page_tile(page) {
            header.x = x;
            header.y = y;
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the page context.
    pub fn context(&self) -> &Arc<dyn PageContext> {
        &self.inner.context
    }

    /// Returns the tree kind.
    pub fn tree_type(&self) -> TreeType {
        self.inner.tree_type
    }

    /// Returns the stem.
    pub fn stem(&self) -> Stem {
        self.inner.stem
    }

    /// Returns the serialized fields.
    pub fn header(&self) -> &PageHeader {
        &self.inner.header
    }

    /// Oldest zone the subtree depends on; 0 if nothing beneath is committed.
    pub fn post(&self) -> ZoneId {
        self.inner.header.post
    }

    /// Zone the page is committed to.
    pub fn zone(&self) -> ZoneId {
        self.inner.header.zone
    }

    /// Offset just past the page in its zone.
    pub fn base(&self) -> u64 {
        self.inner.header.base
    }

    /// Leaf entries beneath this reference.
    pub fn span(&self) -> u64 {
        self.inner.header.span
    }

    /// Memoized reduction; `Absent` when undefined.
    pub fn fold(&self) -> &Value {
        &self.inner.header.fold
    }

    /// Horizontal bounding tile.
    pub fn x(&self) -> u64 {
        self.inner.header.x
    }

    /// Vertical bounding tile.
    pub fn y(&self) -> u64 {
        self.inner.header.y
    }

    /// Returns true once the page has a durable location.
    pub fn is_committed(&self) -> bool {
        self.zone() > 0 && self.base() > 0
    }

    /// Returns true if both references share the same identity.
    pub fn ptr_eq(&self, other: &PageRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Encoded size of the page in bytes.
    pub fn page_size(&self) -> usize {
        self.inner.header.size
    }

    /// Encoded size of the whole subtree, one newline per page included.
    pub fn tree_size(&self) -> u64 {
        self.inner.header.area
    }

    /// Encoded size of the uncommitted pages beneath this reference, one
    /// newline per page included.
    pub fn diff_size(&self) -> u64 {
        if self.is_committed() {
            return 0;
        }
        *self.inner.diff_size.get_or_init(|| {
            let children = self
                .hard_page()
                .map_or(0, |page| page.children().map(PageRef::diff_size).sum());
            self.page_size() as u64 + 1 + children
        })
    }

    /// Encoded size of this reference's header.
    pub fn page_ref_size(&self) -> usize {
        *self
            .inner
            .page_ref_size
            .get_or_init(|| self.header().encoded_len(self.tree_type().is_tiled()))
    }

    /// Writes the encoded header.
    pub fn write_page_ref(&self, out: &mut impl Write) -> fmt::Result {
        self.header().write(out, self.tree_type().is_tiled())
    }

    /// Returns the encoded header as a text value.
    pub fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    /// Decodes a header previously produced by [`PageRef::to_value`].
    pub fn from_value(
        value: &Value,
        context: Arc<dyn PageContext>,
        tree_type: TreeType,
        stem: Stem,
    ) -> StoreResult<Self> {
        match value.as_text() {
            Some(text) => Self::parse(text, context, tree_type, stem),
            None => Err(StoreError::malformed_page_ref("expected text", value.to_string())),
        }
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Rank of the horizontal tile.
    pub fn x_rank(&self) -> u32 {
        BitInterval::from_bits(self.x()).rank()
    }

    /// Base of the horizontal tile.
    pub fn x_base(&self) -> u64 {
        BitInterval::from_bits(self.x()).base()
    }

    /// Significant-bit mask of the horizontal tile.
    pub fn x_mask(&self) -> u64 {
        BitInterval::from_bits(self.x()).mask()
    }

    /// Midpoint splitting the horizontal tile in two.
    pub fn x_split(&self) -> u64 {
        BitInterval::from_bits(self.x()).split()
    }

    /// Rank of the vertical tile.
    pub fn y_rank(&self) -> u32 {
        BitInterval::from_bits(self.y()).rank()
    }

    /// Base of the vertical tile.
    pub fn y_base(&self) -> u64 {
        BitInterval::from_bits(self.y()).base()
    }

    /// Significant-bit mask of the vertical tile.
    pub fn y_mask(&self) -> u64 {
        BitInterval::from_bits(self.y()).mask()
    }

    /// Midpoint splitting the vertical tile in two.
    pub fn y_split(&self) -> u64 {
        BitInterval::from_bits(self.y()).split()
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Returns the current cache tier.
    pub fn cache_state(&self) -> CacheState {
        match &*self.inner.slot.read() {
            CacheSlot::Unloaded => CacheState::Unloaded,
            CacheSlot::Strong(_) => CacheState::Strong,
            CacheSlot::Weak(_) => CacheState::Weak,
        }
    }

    /// Returns the page if it is held strongly. Never loads.
    pub fn hard_page(&self) -> Option<Arc<Page>> {
        match &*self.inner.slot.read() {
            CacheSlot::Strong(page) => Some(Arc::clone(page)),
            _ => None,
        }
    }

    /// Returns the page if it is still in memory. Never loads.
    pub fn soft_page(&self) -> Option<Arc<Page>> {
        match &*self.inner.slot.read() {
            CacheSlot::Strong(page) => Some(Arc::clone(page)),
            CacheSlot::Weak(page) => page.upgrade(),
            CacheSlot::Unloaded => None,
        }
    }

    /// Version of the page if it is, or once was, in memory. Never loads.
    pub fn known_version(&self) -> Option<Version> {
        self.inner
            .version
            .get()
            .copied()
            .or_else(|| self.soft_page().map(|page| page.version()))
    }

    /// Returns the page, loading it if needed.
    ///
    /// Non-fatal failures are wrapped with this reference's debug string.
    pub fn page(&self) -> StoreResult<Arc<Page>> {
        if let Some(page) = self.soft_page() {
            trace!(zone = self.zone(), base = self.base(), "page cache hit");
            self.context().hit_page(&page);
            return Ok(page);
        }
        LoaderGuard::open(self.context().as_ref(), false)
            .and_then(|mut loader| self.load_with(&mut loader))
            .map_err(|e| e.with_page_ref(format!("{self:?}")))
    }

    fn load_with(&self, loader: &mut LoaderGuard) -> StoreResult<Arc<Page>> {
        if !self.is_committed() {
            return Err(StoreError::NotCommitted {
                page_ref: format!("{self:?}"),
            });
        }
        let page = loader.load_page(self)?;
        if page.tree_type() != self.tree_type() {
            return Err(StoreError::malformed_page(
                format!("expected a {} page", self.tree_type()),
                page.to_string(),
            ));
        }
        debug!(
            zone = self.zone(),
            base = self.base(),
            size = self.page_size(),
            "loaded page"
        );
        let page = Arc::new(page);
        let _ = self.inner.version.set(page.version());
        *self.inner.slot.write() = CacheSlot::Strong(Arc::clone(&page));
        Ok(page)
    }

    /// Loads this page and every descendant, holding them strongly.
    pub fn load_tree(&self, loader: &mut LoaderGuard) -> StoreResult<()> {
        let page = match self.soft_page() {
            Some(page) => {
                *self.inner.slot.write() = CacheSlot::Strong(Arc::clone(&page));
                page
            }
            None => self
                .load_with(loader)
                .map_err(|e| e.with_page_ref(format!("{self:?}")))?,
        };
        for child in page.children() {
            child.load_tree(loader)?;
        }
        Ok(())
    }

    /// Demotes committed pages with version `<= version` to the weak tier.
    pub fn soften(&self, version: Version) {
        let Some(page) = self.soft_page() else {
            return;
        };
        for child in page.children() {
            child.soften(version);
        }
        if self.is_committed() && page.version() <= version {
            let mut slot = self.inner.slot.write();
            if let CacheSlot::Strong(held) = &*slot {
                if Arc::ptr_eq(held, &page) {
                    *slot = CacheSlot::Weak(Arc::downgrade(&page));
                }
            }
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Returns a reference to the same page with `fold` memoized.
    ///
    /// The page bytes do not include the page's own fold, so a committed
    /// reference stays committed.
    pub fn with_fold(&self, fold: Value) -> PageRef {
        let header = PageHeader {
            fold,
            ..self.header().clone()
        };
        let slot = self.inner.slot.read().clone();
        let page_ref = Self::with_slot(
            Arc::clone(self.context()),
            self.tree_type(),
            self.stem(),
            header,
            slot,
        );
        if let Some(&version) = self.inner.version.get() {
            let _ = page_ref.inner.version.set(version);
        }
        page_ref
    }

    /// Rewrites pages whose subtree still depends on a zone older than
    /// `post`.
    ///
    /// Returns `self` when `post() == 0 || post() >= post`. Otherwise the
    /// result is uncommitted and its post is 0 or at least `post`.
    pub fn evacuated(&self, post: ZoneId, version: Version) -> StoreResult<PageRef> {
        if self.post() == 0 || self.post() >= post {
            return Ok(self.clone());
        }
        let evacuate = || -> StoreResult<PageRef> {
            let page = self
                .page()?
                .map_children(version, |child| child.evacuated(post, version))?;
            Ok(PageRef::from_page(
                Arc::clone(self.context()),
                page,
                self.fold().clone(),
            ))
        };
        evacuate().map_err(|e| e.with_page_ref(format!("{self:?}")))
    }

    /// Assigns zone locations to every uncommitted page, as if the diff were
    /// written to `zone` starting at offset `base`.
    pub fn committed(&self, zone: ZoneId, base: u64, version: Version) -> StoreResult<PageRef> {
        let mut diff = DiffWriter::new(ByteCount::new(), zone, base, version);
        self.commit_into(&mut diff)
    }

    /// Writes every uncommitted page beneath this reference, children before
    /// parents, and returns the committed reference.
    ///
    /// Pages newer than the diff's version are left uncommitted, together
    /// with their ancestors.
    pub(crate) fn commit_into<W: Write>(&self, diff: &mut DiffWriter<W>) -> StoreResult<PageRef> {
        if self.is_committed() {
            return Ok(self.clone());
        }
        let Some(page) = self.hard_page() else {
            return Err(StoreError::NotCommitted {
                page_ref: format!("{self:?}"),
            });
        };
        if page.version() > diff.version {
            return Ok(self.clone());
        }
        let page = if page.is_node() {
            Arc::new(page.map_children(page.version(), |child| child.commit_into(diff))?)
        } else {
            page
        };
        let (base, size) = diff.write_page(&page)?;
        let area = size as u64 + 1 + page.children().map(PageRef::tree_size).sum::<u64>();
        let post = page
            .children()
            .map(PageRef::post)
            .filter(|&post| post != 0)
            .fold(diff.zone, ZoneId::min);
        let header = PageHeader {
            post,
            zone: diff.zone,
            base,
            size,
            area,
            ..self.header().clone()
        };
        Ok(Self::with_slot(
            Arc::clone(self.context()),
            self.tree_type(),
            self.stem(),
            header,
            CacheSlot::Strong(page),
        ))
    }

    /// Demotes pages written at or after `version` back to uncommitted, so
    /// that the next commit rewrites them.
    pub fn uncommitted(&self, version: Version) -> StoreResult<PageRef> {
        let Some(page) = self.hard_page() else {
            return Ok(self.clone());
        };
        if page.version() < version {
            return Ok(self.clone());
        }
        let mut changed = self.is_committed();
        let rebuilt = page.map_children(page.version(), |child| {
            let demoted = child.uncommitted(version)?;
            changed |= !demoted.ptr_eq(child);
            Ok(demoted)
        })?;
        if !changed {
            return Ok(self.clone());
        }
        Ok(PageRef::from_page(
            Arc::clone(self.context()),
            rebuilt,
            self.fold().clone(),
        ))
    }

    /// Records, for every page of this uncommitted subtree, its counterpart in
    /// `committed`, the same subtree after [`PageRef::commit_into`].
    pub(crate) fn pair_committed(&self, committed: &PageRef, pairs: &mut CommitPairs) {
        if self.ptr_eq(committed) {
            return;
        }
        if let (Some(old), Some(new)) = (self.hard_page(), committed.hard_page()) {
            for (old_child, new_child) in old.children().zip(new.children()) {
                old_child.pair_committed(new_child, pairs);
            }
        }
        pairs.insert(self, committed);
    }

    /// Replaces every page found in `pairs` by its committed counterpart.
    /// Rebuilds only the uncommitted pages above a replacement.
    pub(crate) fn rebased(&self, pairs: &CommitPairs) -> StoreResult<PageRef> {
        if let Some(committed) = pairs.get(self) {
            return Ok(committed.clone());
        }
        if self.is_committed() {
            return Ok(self.clone());
        }
        let Some(page) = self.hard_page() else {
            return Ok(self.clone());
        };
        if !page.is_node() {
            return Ok(self.clone());
        }
        let mut changed = false;
        let rebuilt = page.map_children(page.version(), |child| {
            let rebased = child.rebased(pairs)?;
            changed |= !rebased.ptr_eq(child);
            Ok(rebased)
        })?;
        if !changed {
            return Ok(self.clone());
        }
        Ok(PageRef::from_page(
            Arc::clone(self.context()),
            rebuilt,
            self.fold().clone(),
        ))
    }

    /// Memoizes folds throughout the subtree.
    ///
    /// Leaves fold their values with `combine` starting from `identity`;
    /// nodes fold their children's folds with `merge`. Defined folds are
    /// reused.
    pub fn reduced(
        &self,
        identity: &Value,
        combine: &dyn Fn(&Value, &Value) -> Value,
        merge: &dyn Fn(&Value, &Value) -> Value,
        version: Version,
    ) -> StoreResult<PageRef> {
        if self.fold().is_defined() {
            return Ok(self.clone());
        }
        let page = self.page()?;
        if !page.is_node() {
            let fold = page
                .values()
                .fold(identity.clone(), |acc, value| combine(&acc, value));
            return Ok(self.with_fold(fold));
        }
        let page = page.map_children(version, |child| {
            child.reduced(identity, combine, merge, version)
        })?;
        let fold = page
            .children()
            .fold(identity.clone(), |acc, child| merge(&acc, child.fold()));
        Ok(PageRef::from_page(Arc::clone(self.context()), page, fold))
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_page_ref(f)
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRef")
            .field("tree", &self.tree_type())
            .field("stem", &self.stem())
            .field("post", &self.post())
            .field("zone", &self.zone())
            .field("base", &self.base())
            .field("size", &self.page_size())
            .field("span", &self.span())
            .field("cache", &self.cache_state())
            .finish()
    }
}

/// Bounding tiles of a spatial page.
fn page_tile(page: &Page) -> Option<(u64, u64)> {
    match page.body() {
        PageBody::QTreeLeaf(slots) => Some(BitInterval::bounds(
            slots.iter().map(|slot| (slot.x, slot.y)),
        )),
        PageBody::QTreeNode(children) => Some(BitInterval::bounds(
            children.iter().map(|child| (child.x(), child.y())),
        )),
        _ => None,
    }
}

// =============================================================================
// Commit Pairs
// =============================================================================

/// Maps uncommitted references to their committed counterparts by identity.
///
/// Holds the uncommitted references too, so an identity is never reused
/// while the map is alive.
#[derive(Default)]
pub(crate) struct CommitPairs {
    pairs: HashMap<usize, (PageRef, PageRef)>,
}

impl CommitPairs {
    fn key(page_ref: &PageRef) -> usize {
        Arc::as_ptr(&page_ref.inner) as usize
    }

    fn insert(&mut self, uncommitted: &PageRef, committed: &PageRef) {
        self.pairs.insert(
            Self::key(uncommitted),
            (uncommitted.clone(), committed.clone()),
        );
    }

    fn get(&self, uncommitted: &PageRef) -> Option<&PageRef> {
        self.pairs
            .get(&Self::key(uncommitted))
            .map(|(_, committed)| committed)
    }

    pub(crate) fn len(&self) -> usize {
        self.pairs.len()
    }
}

// =============================================================================
// Diff Writer
// =============================================================================

/// Lays out a diff: pages in post-order, each followed by a newline.
///
/// Writing into a [`ByteCount`] computes the same layout without producing
/// the bytes.
pub(crate) struct DiffWriter<W> {
    out: W,
    zone: ZoneId,
    offset: u64,
    version: Version,
}

impl<W: Write> DiffWriter<W> {
    /// Creates a writer for a diff starting at `base` within `zone`.
    pub(crate) fn new(out: W, zone: ZoneId, base: u64, version: Version) -> Self {
        Self {
            out,
            zone,
            offset: base,
            version,
        }
    }

    /// Appends a page; returns its base and size.
    fn write_page(&mut self, page: &Page) -> StoreResult<(u64, usize)> {
        let mut size = ByteCount::new();
        write!(size, "{page}").map_err(|_| StoreError::fatal("failed to size page"))?;
        writeln!(self.out, "{page}").map_err(|_| StoreError::fatal("failed to write diff"))?;
        self.offset += size.len() as u64;
        let base = self.offset;
        self.offset += 1;
        Ok((base, size.len()))
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StoreContext;
    use crate::store::MemoryStore;
    use arbor_common::StoreSettings;

    fn context() -> Arc<dyn PageContext> {
        MemoryStore::new(StoreSettings::for_testing()).page_context()
    }

    fn leaf(context: &Arc<dyn PageContext>, version: Version, entries: &[(i64, i64)]) -> PageRef {
        let slots = entries
            .iter()
            .map(|&(k, v)| (Value::from(k), Value::from(v)))
            .collect();
        PageRef::from_page(
            Arc::clone(context),
            Page::new(version, 1, PageBody::BTreeLeaf(slots)),
            Value::Absent,
        )
    }

    #[test]
    fn test_fresh_ref_is_uncommitted_and_strong() {
        let context = context();
        let page_ref = leaf(&context, 1, &[(1, 10), (2, 20)]);
        assert!(!page_ref.is_committed());
        assert_eq!(page_ref.cache_state(), CacheState::Strong);
        assert_eq!(page_ref.span(), 2);
        assert_eq!(page_ref.post(), 0);
        let page = page_ref.hard_page().unwrap();
        assert_eq!(page_ref.page_size(), page.to_string().len());
        assert_eq!(page_ref.tree_size(), page_ref.page_size() as u64 + 1);
        assert_eq!(page_ref.diff_size(), page_ref.tree_size());
    }

    #[test]
    fn test_page_ref_size_matches_encoding() {
        let context = context();
        let page_ref = leaf(&context, 1, &[(1, 10)]).with_fold(Value::from(10i64));
        assert_eq!(page_ref.page_ref_size(), page_ref.to_string().len());
        assert!(page_ref.to_string().ends_with(",fold:10)"));
    }

    #[test]
    fn test_value_form() {
        let context = context();
        let page_ref = leaf(&context, 1, &[(1, 10)]);
        let value = page_ref.to_value();
        assert_eq!(value.as_text(), Some(page_ref.to_string().as_str()));

        let parsed = PageRef::from_value(&value, Arc::clone(&context), TreeType::BTree, 1).unwrap();
        assert_eq!(parsed.header(), page_ref.header());
        assert!(PageRef::from_value(&Value::from(3i64), context, TreeType::BTree, 1).is_err());
    }

    #[test]
    fn test_committed_layout() {
        let context = context();
        let a = leaf(&context, 1, &[(1, 10)]);
        let b = leaf(&context, 1, &[(2, 20)]);
        let node = PageRef::from_page(
            Arc::clone(&context),
            Page::new(
                1,
                1,
                PageBody::BTreeNode(vec![(Value::from(1i64), a.clone()), (Value::from(2i64), b)]),
            ),
            Value::Absent,
        );
        assert_eq!(node.span(), 2);

        let mut diff = DiffWriter::new(String::new(), 3, 100, 1);
        let committed = node.commit_into(&mut diff).unwrap();
        let text = diff.into_inner();

        assert!(committed.is_committed());
        assert_eq!(committed.zone(), 3);
        assert_eq!(committed.post(), 3);
        assert_eq!(committed.diff_size(), 0);
        assert_eq!(text.len() as u64, committed.tree_size());
        assert_eq!(committed.base(), 100 + text.len() as u64 - 1);
        assert!(text.ends_with('\n'));

        let counted = node.committed(3, 100, 1).unwrap();
        assert_eq!(counted.header(), committed.header());

        let page = committed.hard_page().unwrap();
        let first = page.child(0).unwrap();
        assert_eq!(first.base(), 100 + a.page_size() as u64);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].len(), committed.page_size());
    }

    #[test]
    fn test_newer_pages_stay_uncommitted() {
        let context = context();
        let page_ref = leaf(&context, 5, &[(1, 1)]);
        let committed = page_ref.committed(1, 1, 4).unwrap();
        assert!(committed.ptr_eq(&page_ref));
    }

    #[test]
    fn test_soften_only_committed() {
        let context = context();
        let page_ref = leaf(&context, 1, &[(1, 1)]);
        page_ref.soften(10);
        assert_eq!(page_ref.cache_state(), CacheState::Strong);

        let committed = page_ref.committed(1, 1, 1).unwrap();
        committed.soften(0);
        assert_eq!(committed.cache_state(), CacheState::Strong);
        committed.soften(1);
        assert_eq!(committed.cache_state(), CacheState::Weak);
        assert!(committed.hard_page().is_none());
    }

    #[test]
    fn test_evacuated_no_op() {
        let context = context();
        let fresh = leaf(&context, 1, &[(1, 1)]);
        assert!(fresh.evacuated(5, 2).unwrap().ptr_eq(&fresh));

        let committed = fresh.committed(7, 1, 1).unwrap();
        assert!(committed.evacuated(7, 2).unwrap().ptr_eq(&committed));
        assert!(committed.evacuated(3, 2).unwrap().ptr_eq(&committed));

        let moved = committed.evacuated(8, 2).unwrap();
        assert!(!moved.is_committed());
        assert_eq!(moved.post(), 0);
        assert_eq!(moved.span(), committed.span());
    }

    #[test]
    fn test_uncommitted_demotes_new_pages() {
        let context = context();
        let committed = leaf(&context, 4, &[(1, 1)]).committed(2, 9, 4).unwrap();
        assert!(committed.uncommitted(5).unwrap().ptr_eq(&committed));
        let demoted = committed.uncommitted(4).unwrap();
        assert!(!demoted.is_committed());
        assert_eq!(demoted.span(), 1);
    }

    #[test]
    fn test_reduced_memoizes_fold() {
        let context = context();
        let page_ref = leaf(&context, 1, &[(1, 10), (2, 20)]);
        let sum = |a: &Value, b: &Value| {
            Value::from(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0))
        };
        let reduced = page_ref.reduced(&Value::from(0i64), &sum, &sum, 1).unwrap();
        assert_eq!(reduced.fold(), &Value::from(30i64));
        let again = reduced.reduced(&Value::from(0i64), &sum, &sum, 1).unwrap();
        assert!(again.ptr_eq(&reduced));
    }

    #[test]
    fn test_unloaded_uncommitted_ref_errors() {
        let page_ref = PageRef::from_header(context(), TreeType::BTree, 1, PageHeader::default());
        let err = page_ref.page().unwrap_err();
        match err {
            StoreError::PageLoad { page_ref, source } => {
                assert!(page_ref.contains("PageRef"));
                assert!(matches!(*source, StoreError::NotCommitted { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
