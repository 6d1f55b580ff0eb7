//! Pages and page references.
//!
//! A [`Page`] is an immutable, versioned node or leaf of one of the tree
//! kinds. A [`PageRef`] is the lazily resolved, size-memoizing pointer to a
//! page that parents and trees hold.
//!
//! # Encoding
//!
//! Pages are stored as text, one page per line within a zone:
//!
//! ```text
//! @bleaf(stem:7,v:3){"a":1,"b":2}
//! @bnode(stem:7,v:3){"a":@page(zone:1,base:31,size:31,area:32,span:2)}
//! @uleaf(stem:7,v:3){"value"}
//! @qleaf(stem:7,v:3){"k"@tile(x:0x0000000000000010,y:0x0000000000000020):1}
//! @qnode(stem:7,v:3){@page(zone:1,base:80,size:80,area:81,span:1,x:0x..,y:0x..)}
//! ```

mod codec;
mod page_ref;

use std::fmt::{self, Write};
use std::slice;
use std::sync::Arc;

use arbor_common::text::{self, TextReader};
use arbor_common::{Stem, StoreError, StoreResult, Value, Version};

use crate::context::PageContext;

pub use codec::PageHeader;
pub(crate) use codec::read_count;
pub(crate) use page_ref::{CommitPairs, DiffWriter};
pub use page_ref::{CacheState, PageRef};

/// The kind of tree a page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeType {
    /// Ordered map.
    BTree,
    /// Single value register.
    UTree,
    /// Spatial quadrant tree.
    QTree,
}

impl TreeType {
    /// Returns the name used in seeds.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::UTree => "utree",
            Self::QTree => "qtree",
        }
    }

    /// Parses a seed name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "btree" => Some(Self::BTree),
            "utree" => Some(Self::UTree),
            "qtree" => Some(Self::QTree),
            _ => None,
        }
    }

    /// Returns true if references to this tree's pages carry tiles.
    pub const fn is_tiled(self) -> bool {
        matches!(self, Self::QTree)
    }
}

impl fmt::Display for TreeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Page type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    /// Ordered map leaf.
    BTreeLeaf,
    /// Ordered map interior node.
    BTreeNode,
    /// Single value leaf.
    UTreeLeaf,
    /// Spatial leaf.
    QTreeLeaf,
    /// Spatial interior node.
    QTreeNode,
}

impl PageType {
    /// Returns the encoding tag.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::BTreeLeaf => "bleaf",
            Self::BTreeNode => "bnode",
            Self::UTreeLeaf => "uleaf",
            Self::QTreeLeaf => "qleaf",
            Self::QTreeNode => "qnode",
        }
    }

    /// Parses an encoding tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bleaf" => Some(Self::BTreeLeaf),
            "bnode" => Some(Self::BTreeNode),
            "uleaf" => Some(Self::UTreeLeaf),
            "qleaf" => Some(Self::QTreeLeaf),
            "qnode" => Some(Self::QTreeNode),
            _ => None,
        }
    }

    /// Returns the tree kind this page type belongs to.
    pub const fn tree_type(self) -> TreeType {
        match self {
            Self::BTreeLeaf | Self::BTreeNode => TreeType::BTree,
            Self::UTreeLeaf => TreeType::UTree,
            Self::QTreeLeaf | Self::QTreeNode => TreeType::QTree,
        }
    }

    /// Returns true for interior node types.
    pub const fn is_node(self) -> bool {
        matches!(self, Self::BTreeNode | Self::QTreeNode)
    }
}

/// A spatial leaf entry.
///
/// `x` and `y` are bit-interval tiles (see [`crate::qtree::BitInterval`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QTreeSlot {
    /// Entry key.
    pub key: Value,
    /// Horizontal tile.
    pub x: u64,
    /// Vertical tile.
    pub y: u64,
    /// Entry value.
    pub value: Value,
}

/// Page contents.
#[derive(Debug, Clone)]
pub enum PageBody {
    /// Key-ordered slots.
    BTreeLeaf(Vec<(Value, Value)>),
    /// Children keyed by the first key of their subtree.
    BTreeNode(Vec<(Value, PageRef)>),
    /// The register value.
    UTreeLeaf(Value),
    /// Key-ordered spatial slots.
    QTreeLeaf(Vec<QTreeSlot>),
    /// Children, each carrying its bounding tile.
    QTreeNode(Vec<PageRef>),
}

/// An immutable, versioned page.
#[derive(Debug, Clone)]
pub struct Page {
    version: Version,
    stem: Stem,
    body: PageBody,
}

impl Page {
    /// Creates a page.
    pub fn new(version: Version, stem: Stem, body: PageBody) -> Self {
        Self {
            version,
            stem,
            body,
        }
    }

    /// Creates the canonical empty page of a tree kind.
    pub fn empty(tree_type: TreeType, stem: Stem, version: Version) -> Self {
        let body = match tree_type {
            TreeType::BTree => PageBody::BTreeLeaf(Vec::new()),
            TreeType::UTree => PageBody::UTreeLeaf(Value::Absent),
            TreeType::QTree => PageBody::QTreeLeaf(Vec::new()),
        };
        Self::new(version, stem, body)
    }

    /// Returns the write version that produced this page.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the stem of the owning tree.
    pub fn stem(&self) -> Stem {
        self.stem
    }

    /// Returns the page contents.
    pub fn body(&self) -> &PageBody {
        &self.body
    }

    /// Returns the page type.
    pub fn page_type(&self) -> PageType {
        match self.body {
            PageBody::BTreeLeaf(_) => PageType::BTreeLeaf,
            PageBody::BTreeNode(_) => PageType::BTreeNode,
            PageBody::UTreeLeaf(_) => PageType::UTreeLeaf,
            PageBody::QTreeLeaf(_) => PageType::QTreeLeaf,
            PageBody::QTreeNode(_) => PageType::QTreeNode,
        }
    }

    /// Returns the tree kind.
    pub fn tree_type(&self) -> TreeType {
        self.page_type().tree_type()
    }

    /// Returns true for interior nodes.
    pub fn is_node(&self) -> bool {
        self.page_type().is_node()
    }

    /// Number of slots or children.
    pub fn arity(&self) -> usize {
        match &self.body {
            PageBody::BTreeLeaf(slots) => slots.len(),
            PageBody::BTreeNode(entries) => entries.len(),
            PageBody::UTreeLeaf(value) => usize::from(value.is_defined()),
            PageBody::QTreeLeaf(slots) => slots.len(),
            PageBody::QTreeNode(children) => children.len(),
        }
    }

    /// Number of leaf entries beneath this page.
    pub fn span(&self) -> u64 {
        match &self.body {
            PageBody::BTreeNode(_) | PageBody::QTreeNode(_) => {
                self.children().map(PageRef::span).sum()
            }
            _ => self.arity() as u64,
        }
    }

    /// Iterates over child references; empty for leaves.
    pub fn children(&self) -> Children<'_> {
        match &self.body {
            PageBody::BTreeNode(entries) => Children::Keyed(entries.iter()),
            PageBody::QTreeNode(children) => Children::Plain(children.iter()),
            _ => Children::None,
        }
    }

    /// Returns the child at `index`.
    pub fn child(&self, index: usize) -> Option<&PageRef> {
        match &self.body {
            PageBody::BTreeNode(entries) => entries.get(index).map(|(_, child)| child),
            PageBody::QTreeNode(children) => children.get(index),
            _ => None,
        }
    }

    /// Iterates over leaf values; empty for nodes.
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match &self.body {
            PageBody::BTreeLeaf(slots) => Box::new(slots.iter().map(|(_, value)| value)),
            PageBody::UTreeLeaf(value) => Box::new(value.is_defined().then_some(value).into_iter()),
            PageBody::QTreeLeaf(slots) => Box::new(slots.iter().map(|slot| &slot.value)),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Returns a copy of this page at `version` with every child replaced
    /// by `f(child)`. Leaves are copied unchanged.
    pub fn map_children(
        &self,
        version: Version,
        mut f: impl FnMut(&PageRef) -> StoreResult<PageRef>,
    ) -> StoreResult<Page> {
        let body = match &self.body {
            PageBody::BTreeNode(entries) => PageBody::BTreeNode(
                entries
                    .iter()
                    .map(|(key, child)| Ok((key.clone(), f(child)?)))
                    .collect::<StoreResult<_>>()?,
            ),
            PageBody::QTreeNode(children) => {
                PageBody::QTreeNode(children.iter().map(&mut f).collect::<StoreResult<_>>()?)
            }
            other => other.clone(),
        };
        Ok(Page::new(version, self.stem, body))
    }

    /// Returns the number of bytes this page encodes to.
    pub fn encoded_len(&self) -> usize {
        text::encoded_len(self)
    }

    /// Decodes a page. Child references resolve through `context`.
    pub fn parse(input: &str, context: &Arc<dyn PageContext>) -> StoreResult<Page> {
        let malformed = |e: StoreError| StoreError::malformed_page(e.reason(), input);
        let mut reader = TextReader::new(input);
        reader.expect('@').map_err(malformed)?;
        let tag = reader.read_ident().map_err(malformed)?;
        let page_type = PageType::from_tag(tag)
            .ok_or_else(|| StoreError::malformed_page(format!("unknown page type {tag:?}"), input))?;
        let page = codec::read_page(&mut reader, page_type, context).map_err(malformed)?;
        reader.finish().map_err(malformed)?;
        Ok(page)
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{}(stem:{},v:{}){{",
            self.page_type().tag(),
            self.stem,
            self.version
        )?;
        match &self.body {
            PageBody::BTreeLeaf(slots) => {
                for (i, (key, value)) in slots.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{key}:{value}")?;
                }
            }
            PageBody::BTreeNode(entries) => {
                for (i, (key, child)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{key}:{child}")?;
                }
            }
            PageBody::UTreeLeaf(value) => write!(f, "{value}")?,
            PageBody::QTreeLeaf(slots) => {
                for (i, slot) in slots.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(
                        f,
                        "{}@tile(x:0x{:016x},y:0x{:016x}):{}",
                        slot.key, slot.x, slot.y, slot.value
                    )?;
                }
            }
            PageBody::QTreeNode(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{child}")?;
                }
            }
        }
        f.write_char('}')
    }
}

/// Iterator over a page's child references.
#[derive(Debug, Clone)]
pub enum Children<'a> {
    /// A leaf has no children.
    None,
    /// Children of a B-tree node.
    Keyed(slice::Iter<'a, (Value, PageRef)>),
    /// Children of a Q-tree node.
    Plain(slice::Iter<'a, PageRef>),
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a PageRef;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::None => None,
            Self::Keyed(iter) => iter.next().map(|(_, child)| child),
            Self::Plain(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::context::StoreContext;
    use arbor_common::StoreSettings;

    fn context() -> Arc<dyn PageContext> {
        MemoryStore::new(StoreSettings::for_testing()).page_context()
    }

    #[test]
    fn test_page_type_tags() {
        for page_type in [
            PageType::BTreeLeaf,
            PageType::BTreeNode,
            PageType::UTreeLeaf,
            PageType::QTreeLeaf,
            PageType::QTreeNode,
        ] {
            assert_eq!(PageType::from_tag(page_type.tag()), Some(page_type));
        }
        assert_eq!(PageType::from_tag("snode"), None);
        assert!(PageType::QTreeNode.is_node());
        assert_eq!(PageType::UTreeLeaf.tree_type(), TreeType::UTree);
    }

    #[test]
    fn test_leaf_encoding() {
        let page = Page::new(
            3,
            7,
            PageBody::BTreeLeaf(vec![
                (Value::from("a"), Value::from(1i64)),
                (Value::from("b"), Value::from(2i64)),
            ]),
        );
        let text = page.to_string();
        assert_eq!(text, r#"@bleaf(stem:7,v:3){"a":1,"b":2}"#);
        assert_eq!(page.encoded_len(), text.len());

        let parsed = Page::parse(&text, &context()).unwrap();
        assert_eq!(parsed.to_string(), text);
        assert_eq!(parsed.span(), 2);
    }

    #[test]
    fn test_qleaf_encoding() {
        let page = Page::new(
            1,
            2,
            PageBody::QTreeLeaf(vec![QTreeSlot {
                key: Value::from("k"),
                x: 0x10,
                y: 0x20,
                value: Value::from(true),
            }]),
        );
        let text = page.to_string();
        assert_eq!(
            text,
            r#"@qleaf(stem:2,v:1){"k"@tile(x:0x0000000000000010,y:0x0000000000000020):true}"#
        );
        let parsed = Page::parse(&text, &context()).unwrap();
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn test_empty_pages() {
        assert_eq!(
            Page::empty(TreeType::UTree, 4, 0).to_string(),
            "@uleaf(stem:4,v:0){absent}"
        );
        assert_eq!(Page::empty(TreeType::BTree, 4, 0).span(), 0);
        assert_eq!(Page::empty(TreeType::UTree, 4, 0).arity(), 0);
    }

    #[test]
    fn test_unknown_page_type() {
        let err = Page::parse("@snode(stem:1,v:1){}", &context()).unwrap_err();
        assert!(matches!(err, StoreError::MalformedPage { .. }));
        assert!(err.to_string().contains("@snode"));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let err = Page::parse("@bleaf(stem:1,v:1){}x", &context()).unwrap_err();
        assert!(matches!(err, StoreError::MalformedPage { .. }));
    }
}
