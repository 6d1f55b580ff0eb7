//! Dynamic value type.
//!
//! Keys, values and folds stored in trees are [`Value`]s. Values have a total
//! order (used for B-tree key order) and a canonical text encoding used by the
//! page codec:
//!
//! | Variant | Encoding |
//! |---------|----------|
//! | `Absent` | `absent` |
//! | `Bool` | `true` / `false` |
//! | `Int` | decimal, e.g. `-17` |
//! | `Text` | quoted with `\"`, `\\`, `\n`, `\r`, `\t` escapes |
//! | `Data` | `%` followed by lowercase hex |
//! | `List` | `{a,b,c}` |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

use crate::error::StoreResult;
use crate::text::{self, TextReader};

/// A dynamically typed, totally ordered value.
///
/// `Absent` doubles as "no value": removing a key is done by updating it to
/// `Absent`, and an undefined fold is `Absent`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    #[default]
    Absent,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Data(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// Returns true unless this is `Absent`.
    #[inline]
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        !matches!(self, Self::Absent)
    }

    /// Returns the integer, if this is an `Int`.
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text, if this is a `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is `Data`.
    #[must_use]
    pub const fn as_data(&self) -> Option<&Bytes> {
        match self {
            Self::Data(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the items, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns `Some(self)` if defined.
    #[must_use]
    pub fn defined(self) -> Option<Self> {
        self.is_defined().then_some(self)
    }

    /// Returns the length of the canonical encoding in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        text::encoded_len(self)
    }

    /// Parses a value from its canonical encoding.
    pub fn parse(input: &str) -> StoreResult<Self> {
        let mut reader = TextReader::new(input);
        let value = reader.read_value()?;
        reader.finish()?;
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => text::write_quoted(f, s),
            Self::Data(data) => {
                f.write_char('%')?;
                for byte in data.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::List(items) => {
                f.write_char('{')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_char(',')?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char('}')
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Data(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Data(Bytes::from(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}
