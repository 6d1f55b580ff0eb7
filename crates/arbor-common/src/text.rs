//! Textual codec primitives.
//!
//! Pages, page references and seeds are stored as compact s-expression-like
//! text. Sizes of encoded pages are memoized and must equal the bytes the
//! encoder emits, so every encoder writes through [`std::fmt::Write`] and
//! sizes are measured by running the same encoder into a [`ByteCount`].
//!
//! [`TextReader`] is the matching decoder cursor.

use std::fmt::{self, Write};

use crate::error::{StoreError, StoreResult};
use crate::types::Value;

/// A `fmt::Write` sink that only counts bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteCount(usize);

impl ByteCount {
    /// Creates a zeroed counter.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Write for ByteCount {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Returns the number of bytes `value` renders to with `Display`.
#[must_use]
pub fn encoded_len(value: &impl fmt::Display) -> usize {
    let mut count = ByteCount::new();
    // ByteCount never fails
    let _ = write!(count, "{value}");
    count.len()
}

/// Writes `s` as a quoted, escaped text literal.
pub fn write_quoted(out: &mut impl Write, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

/// A decoding cursor over encoded text.
///
/// All failures are reported as [`StoreError::MalformedValue`] carrying the
/// whole input and the offset of the failure; callers decoding a larger
/// structure re-wrap them with their own error kind.
#[derive(Debug, Clone)]
pub struct TextReader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> TextReader<'a> {
    /// Creates a reader positioned at the start of `input`.
    #[must_use]
    pub const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the whole input.
    #[must_use]
    pub const fn input(&self) -> &'a str {
        self.input
    }

    /// Returns the current byte offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns true if all input has been consumed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Returns the unconsumed input.
    #[must_use]
    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Returns the next character without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consumes and returns the next character.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consumes `c` if it is next.
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Consumes `c` or fails.
    pub fn expect(&mut self, c: char) -> StoreResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    /// Consumes `s` if it is next.
    pub fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Consumes `s` or fails.
    pub fn expect_str(&mut self, s: &str) -> StoreResult<()> {
        if self.eat_str(s) {
            Ok(())
        } else {
            Err(self.error(format!("expected \"{s}\"")))
        }
    }

    /// Reads an identifier (`[A-Za-z0-9_]+`).
    pub fn read_ident(&mut self) -> StoreResult<&'a str> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected identifier"));
        }
        Ok(&self.input[start..self.pos])
    }

    /// Reads an optionally negative decimal integer.
    pub fn read_i64(&mut self) -> StoreResult<i64> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.input[start..self.pos].parse().map_err(|_| {
            self.pos = start;
            self.error("expected integer")
        })
    }

    /// Reads a `0x`-prefixed hexadecimal `u64` of at most 16 digits.
    pub fn read_hex_u64(&mut self) -> StoreResult<u64> {
        self.expect_str("0x")?;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() || digits.len() > 16 {
            self.pos = start;
            return Err(self.error("expected 1 to 16 hex digits"));
        }
        u64::from_str_radix(digits, 16).map_err(|_| self.error("invalid hex number"))
    }

    /// Reads one encoded [`Value`].
    pub fn read_value(&mut self) -> StoreResult<Value> {
        match self.peek() {
            Some('"') => self.read_quoted().map(Value::Text),
            Some('%') => self.read_data(),
            Some('{') => self.read_list(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.read_i64().map(Value::Int),
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                match self.read_ident()? {
                    "absent" => Ok(Value::Absent),
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => {
                        self.pos = start;
                        Err(self.error("unknown literal"))
                    }
                }
            }
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn read_quoted(&mut self) -> StoreResult<String> {
        self.expect('"')?;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('"') => text.push('"'),
                    Some('\\') => text.push('\\'),
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    _ => return Err(self.error("invalid escape")),
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn read_data(&mut self) -> StoreResult<Value> {
        self.expect('%')?;
        let mut data = Vec::new();
        while let Some(hi) = self.peek().and_then(|c| c.to_digit(16)) {
            self.pos += 1;
            let lo = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("odd number of hex digits"))?;
            self.pos += 1;
            // both digits are < 16
            data.push(u8::try_from(hi * 16 + lo).unwrap_or_default());
        }
        Ok(Value::from(data))
    }

    fn read_list(&mut self) -> StoreResult<Value> {
        self.expect('{')?;
        let mut items = Vec::new();
        if self.eat('}') {
            return Ok(Value::List(items));
        }
        loop {
            items.push(self.read_value()?);
            if self.eat(',') {
                continue;
            }
            self.expect('}')?;
            return Ok(Value::List(items));
        }
    }

    /// Fails unless all input has been consumed.
    pub fn finish(&self) -> StoreResult<()> {
        if self.is_done() {
            Ok(())
        } else {
            Err(self.error("trailing input"))
        }
    }

    /// Builds a malformed-value error at the current position.
    #[must_use]
    pub fn error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::MalformedValue {
            reason: reason.into(),
            input: self.input.to_owned(),
            offset: self.pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_count() {
        let mut count = ByteCount::new();
        write!(count, "@page(zone:{},base:{})", 12, 3456).unwrap();
        assert_eq!(count.len(), "@page(zone:12,base:3456)".len());
        assert!(!count.is_empty());
    }

    #[test]
    fn test_read_integers() {
        let mut reader = TextReader::new("-42,17");
        assert_eq!(reader.read_i64().unwrap(), -42);
        reader.expect(',').unwrap();
        assert_eq!(reader.read_i64().unwrap(), 17);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_read_hex() {
        let mut reader = TextReader::new("0x00000000000000ff");
        assert_eq!(reader.read_hex_u64().unwrap(), 255);

        let mut reader = TextReader::new("0x");
        assert!(reader.read_hex_u64().is_err());

        let mut reader = TextReader::new("0x11112222333344445");
        assert!(reader.read_hex_u64().is_err());
    }

    #[test]
    fn test_error_carries_input_and_offset() {
        let mut reader = TextReader::new("ab!");
        reader.read_ident().unwrap();
        match reader.read_value().unwrap_err() {
            StoreError::MalformedValue { input, offset, .. } => {
                assert_eq!(input, "ab!");
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quoted_escapes() {
        let mut out = String::new();
        write_quoted(&mut out, "a\"b\\c\nd").unwrap();
        assert_eq!(out, r#""a\"b\\c\nd""#);

        let mut reader = TextReader::new(&out);
        assert_eq!(reader.read_value().unwrap(), Value::from("a\"b\\c\nd"));
    }

    #[test]
    fn test_unterminated_string() {
        let mut reader = TextReader::new("\"abc");
        assert!(reader.read_value().is_err());
    }
}
