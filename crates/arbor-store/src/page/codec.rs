//! Page and page-reference text codec.

use std::fmt::{self, Write};
use std::sync::Arc;

use arbor_common::text::{self, TextReader};
use arbor_common::{StoreError, StoreResult, Value, ZoneId};

use super::{Page, PageBody, PageRef, PageType, QTreeSlot};
use crate::context::PageContext;

/// The serialized fields of a page reference.
///
/// Encoded as
/// `@page(post:_,zone:_,base:_,size:_,area:_,span:_,x:0x_,y:0x_,fold:_)`,
/// where `post` is omitted when equal to `zone`, the tile fields are only
/// present for tiled trees, and `fold` only when defined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageHeader {
    /// Oldest zone the subtree depends on; 0 if none.
    pub post: ZoneId,
    /// Zone the page is committed to; 0 while uncommitted.
    pub zone: ZoneId,
    /// Offset just past the page's last byte in its zone; 0 while uncommitted.
    pub base: u64,
    /// Encoded page size in bytes.
    pub size: usize,
    /// Encoded size of the whole subtree, one newline per page included.
    pub area: u64,
    /// Leaf entries beneath the page.
    pub span: u64,
    /// Horizontal bounding tile.
    pub x: u64,
    /// Vertical bounding tile.
    pub y: u64,
    /// Memoized reduction; `Absent` when undefined.
    pub fold: Value,
}

impl PageHeader {
    /// Writes the header.
    pub fn write(&self, out: &mut impl Write, tiled: bool) -> fmt::Result {
        out.write_str("@page(")?;
        if self.post != self.zone {
            write!(out, "post:{},", self.post)?;
        }
        write!(
            out,
            "zone:{},base:{},size:{},area:{},span:{}",
            self.zone, self.base, self.size, self.area, self.span
        )?;
        if tiled {
            write!(out, ",x:0x{:016x},y:0x{:016x}", self.x, self.y)?;
        }
        if self.fold.is_defined() {
            write!(out, ",fold:{}", self.fold)?;
        }
        out.write_char(')')
    }

    /// Returns the encoded length of the header.
    pub fn encoded_len(&self, tiled: bool) -> usize {
        let mut count = text::ByteCount::new();
        // ByteCount never fails
        let _ = self.write(&mut count, tiled);
        count.len()
    }

    /// Parses a complete header.
    pub fn parse(input: &str) -> StoreResult<Self> {
        let malformed = |e: StoreError| StoreError::malformed_page_ref(e.reason(), input);
        let mut reader = TextReader::new(input);
        let header = Self::read(&mut reader).map_err(malformed)?;
        reader.finish().map_err(malformed)?;
        Ok(header)
    }

    /// Reads a header from `reader`.
    pub(crate) fn read(reader: &mut TextReader<'_>) -> StoreResult<Self> {
        reader.expect_str("@page(")?;
        let mut header = Self::default();
        let mut post = None;
        loop {
            let name = reader.read_ident()?;
            reader.expect(':')?;
            match name {
                "post" => post = Some(read_zone(reader, "post")?),
                "zone" => header.zone = read_zone(reader, "zone")?,
                "base" => header.base = read_count(reader, "base")?,
                "size" => {
                    header.size = usize::try_from(read_count(reader, "size")?)
                        .map_err(|_| reader.error("size out of range"))?;
                }
                "area" => header.area = read_count(reader, "area")?,
                "span" => header.span = read_count(reader, "span")?,
                "x" => header.x = reader.read_hex_u64()?,
                "y" => header.y = reader.read_hex_u64()?,
                "fold" => header.fold = reader.read_value()?,
                other => return Err(reader.error(format!("unknown field {other:?}"))),
            }
            if !reader.eat(',') {
                break;
            }
        }
        reader.expect(')')?;
        header.post = post.unwrap_or(header.zone);
        Ok(header)
    }
}

/// Reads a non-negative integer field.
pub(crate) fn read_count(reader: &mut TextReader<'_>, what: &str) -> StoreResult<u64> {
    let n = reader.read_i64()?;
    u64::try_from(n).map_err(|_| reader.error(format!("negative {what}")))
}

fn read_zone(reader: &mut TextReader<'_>, what: &str) -> StoreResult<ZoneId> {
    let n = read_count(reader, what)?;
    ZoneId::try_from(n).map_err(|_| reader.error(format!("{what} out of range")))
}

/// Reads a `{item,item,...}` list.
fn read_list<T>(
    reader: &mut TextReader<'_>,
    mut item: impl FnMut(&mut TextReader<'_>) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    reader.expect('{')?;
    let mut items = Vec::new();
    if reader.eat('}') {
        return Ok(items);
    }
    loop {
        items.push(item(reader)?);
        if !reader.eat(',') {
            break;
        }
    }
    reader.expect('}')?;
    Ok(items)
}

/// Reads everything after a page's `@tag`.
pub(super) fn read_page(
    reader: &mut TextReader<'_>,
    page_type: PageType,
    context: &Arc<dyn PageContext>,
) -> StoreResult<Page> {
    reader.expect_str("(stem:")?;
    let stem = read_count(reader, "stem")?;
    reader.expect_str(",v:")?;
    let version = read_count(reader, "version")?;
    reader.expect(')')?;

    let child = |header: PageHeader| {
        PageRef::from_header(Arc::clone(context), page_type.tree_type(), stem, header)
    };
    let body = match page_type {
        PageType::BTreeLeaf => PageBody::BTreeLeaf(read_list(reader, |r| {
            let key = r.read_value()?;
            r.expect(':')?;
            Ok((key, r.read_value()?))
        })?),
        PageType::BTreeNode => PageBody::BTreeNode(read_list(reader, |r| {
            let key = r.read_value()?;
            r.expect(':')?;
            Ok((key, child(PageHeader::read(r)?)))
        })?),
        PageType::UTreeLeaf => {
            reader.expect('{')?;
            let value = reader.read_value()?;
            reader.expect('}')?;
            PageBody::UTreeLeaf(value)
        }
        PageType::QTreeLeaf => PageBody::QTreeLeaf(read_list(reader, |r| {
            let key = r.read_value()?;
            r.expect_str("@tile(x:")?;
            let x = r.read_hex_u64()?;
            r.expect_str(",y:")?;
            let y = r.read_hex_u64()?;
            r.expect_str("):")?;
            Ok(QTreeSlot {
                key,
                x,
                y,
                value: r.read_value()?,
            })
        })?),
        PageType::QTreeNode => {
            PageBody::QTreeNode(read_list(reader, |r| Ok(child(PageHeader::read(r)?)))?)
        }
    };
    Ok(Page::new(version, stem, body))
}
