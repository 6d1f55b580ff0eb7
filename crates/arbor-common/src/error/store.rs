//! Store error types.
//!
//! Provides the error taxonomy for page encoding, page loading, and the
//! lifecycle of a store.

use std::fmt;
use thiserror::Error;

use crate::types::ZoneId;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Invalid configuration.
    Config = 0x0001,
    /// An argument outside the accepted domain.
    InvalidArgument = 0x0002,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,

    // Encoding errors (0x0200 - 0x02FF)
    /// A page reference header could not be parsed.
    MalformedPageRef = 0x0200,
    /// A page body could not be parsed.
    MalformedPage = 0x0201,
    /// A tree seed could not be parsed.
    MalformedSeed = 0x0202,
    /// A value could not be parsed.
    MalformedValue = 0x0203,

    // Storage errors (0x0300 - 0x03FF)
    /// A page failed to load.
    PageLoad = 0x0300,
    /// No page at the referenced zone offset.
    PageNotFound = 0x0301,
    /// The referenced zone does not exist.
    ZoneNotFound = 0x0302,
    /// A page that must be committed is not.
    NotCommitted = 0x0303,

    // Lifecycle errors (0x0400 - 0x04FF)
    /// Non-recoverable failure.
    Fatal = 0x0400,
    /// The store has been closed.
    Closed = 0x0401,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Encoding",
            0x03 => "Storage",
            0x04 => "Lifecycle",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for arbor.
///
/// Encoding errors carry the raw encoded text that failed to parse. Load
/// failures are wrapped in [`StoreError::PageLoad`] with the debug string of
/// the page reference being resolved.
///
/// # Example
///
/// ```rust
/// use arbor_common::error::{StoreError, StoreResult};
///
/// fn load_zone(zone: u32) -> StoreResult<Vec<u8>> {
///     Err(StoreError::ZoneNotFound { zone })
/// }
/// assert!(load_zone(3).is_err());
/// ```
#[derive(Debug, Error)]
pub enum StoreError {
    // ==========================================================================
    // Encoding Errors
    // ==========================================================================
    /// A page reference header is malformed.
    #[error("malformed page ref ({reason}): {input}")]
    MalformedPageRef {
        /// What was wrong.
        reason: String,
        /// The offending encoded text.
        input: String,
    },

    /// A page body is malformed or carries an unknown type tag.
    #[error("malformed page ({reason}): {input}")]
    MalformedPage {
        /// What was wrong.
        reason: String,
        /// The offending encoded text.
        input: String,
    },

    /// A tree seed is malformed.
    #[error("malformed seed ({reason}): {input}")]
    MalformedSeed {
        /// What was wrong.
        reason: String,
        /// The offending encoded text.
        input: String,
    },

    /// A value is malformed.
    #[error("malformed value at offset {offset} ({reason}): {input}")]
    MalformedValue {
        /// What was wrong.
        reason: String,
        /// The offending encoded text.
        input: String,
        /// Byte offset of the failure within `input`.
        offset: usize,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// Resolving, evacuating or committing a page failed.
    #[error("failed to load {page_ref}: {source}")]
    PageLoad {
        /// Debug rendering of the page reference.
        page_ref: String,
        /// The underlying failure.
        #[source]
        source: Box<StoreError>,
    },

    /// No page exists at the referenced offset.
    #[error("page not found in zone {zone} at base {base}")]
    PageNotFound {
        /// Zone that was read.
        zone: ZoneId,
        /// Offset that was read.
        base: u64,
    },

    /// The referenced zone does not exist.
    #[error("zone {zone} not found")]
    ZoneNotFound {
        /// The missing zone.
        zone: ZoneId,
    },

    /// A page that must be committed is not.
    #[error("page is not committed: {page_ref}")]
    NotCommitted {
        /// Debug rendering of the page reference.
        page_ref: String,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ==========================================================================
    // Lifecycle Errors
    // ==========================================================================
    /// Non-recoverable failure. Never wrapped, never retried.
    #[error("fatal store error: {message}")]
    Fatal {
        /// Error message.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// An argument outside the accepted domain. Never retried.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedPageRef { .. } => ErrorCode::MalformedPageRef,
            Self::MalformedPage { .. } => ErrorCode::MalformedPage,
            Self::MalformedSeed { .. } => ErrorCode::MalformedSeed,
            Self::MalformedValue { .. } => ErrorCode::MalformedValue,
            Self::PageLoad { .. } => ErrorCode::PageLoad,
            Self::PageNotFound { .. } => ErrorCode::PageNotFound,
            Self::ZoneNotFound { .. } => ErrorCode::ZoneNotFound,
            Self::NotCommitted { .. } => ErrorCode::NotCommitted,
            Self::Io(_) => ErrorCode::Io,
            Self::Fatal { .. } => ErrorCode::Fatal,
            Self::Closed => ErrorCode::Closed,
            Self::Config { .. } => ErrorCode::Config,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
        }
    }

    /// Returns true if this error must not be retried or wrapped.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Fatal { .. } | Self::Closed | Self::Config { .. } | Self::InvalidArgument { .. }
        )
    }

    /// Returns true if this error comes from decoding stored text.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedPageRef { .. }
                | Self::MalformedPage { .. }
                | Self::MalformedSeed { .. }
                | Self::MalformedValue { .. }
        )
    }

    /// Wraps this error with the debug string of the page reference that
    /// was being resolved.
    ///
    /// Fatal errors pass through unwrapped, and an error that already carries
    /// page-ref context keeps the innermost one.
    #[must_use]
    pub fn with_page_ref(self, page_ref: impl fmt::Display) -> Self {
        if self.is_fatal() || matches!(self, Self::PageLoad { .. }) {
            return self;
        }
        Self::PageLoad {
            page_ref: page_ref.to_string(),
            source: Box::new(self),
        }
    }

    /// Creates a malformed page-ref error.
    #[must_use]
    pub fn malformed_page_ref(reason: impl Into<String>, input: impl Into<String>) -> Self {
        Self::MalformedPageRef {
            reason: reason.into(),
            input: input.into(),
        }
    }

    /// Creates a malformed page error.
    #[must_use]
    pub fn malformed_page(reason: impl Into<String>, input: impl Into<String>) -> Self {
        Self::MalformedPage {
            reason: reason.into(),
            input: input.into(),
        }
    }

    /// Creates a malformed seed error.
    #[must_use]
    pub fn malformed_seed(reason: impl Into<String>, input: impl Into<String>) -> Self {
        Self::MalformedSeed {
            reason: reason.into(),
            input: input.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns a short reason for malformed errors, or the display text.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::MalformedPageRef { reason, .. }
            | Self::MalformedPage { reason, .. }
            | Self::MalformedSeed { reason, .. }
            | Self::MalformedValue { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = StoreError::ZoneNotFound { zone: 7 };
        assert_eq!(err.code(), ErrorCode::ZoneNotFound);
        assert_eq!(err.code().category(), "Storage");
        assert_eq!(ErrorCode::MalformedValue.category(), "Encoding");
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::malformed_page_ref("negative base", "@page(zone:1,base:-4)");
        assert_eq!(
            err.to_string(),
            "malformed page ref (negative base): @page(zone:1,base:-4)"
        );
    }

    #[test]
    fn test_with_page_ref_wraps_once() {
        let err = StoreError::PageNotFound { zone: 2, base: 40 }
            .with_page_ref("PageRef(zone:2)")
            .with_page_ref("PageRef(zone:9)");
        match err {
            StoreError::PageLoad { page_ref, source } => {
                assert_eq!(page_ref, "PageRef(zone:2)");
                assert_eq!(source.code(), ErrorCode::PageNotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fatal_is_not_wrapped() {
        let err = StoreError::fatal("out of memory").with_page_ref("PageRef(zone:1)");
        assert!(err.is_fatal());
        assert_eq!(err.code(), ErrorCode::Fatal);
        assert!(StoreError::Closed.is_fatal());
        assert!(StoreError::invalid_argument("x out of range").is_fatal());
        assert_eq!(ErrorCode::InvalidArgument.category(), "General");
        assert!(!StoreError::ZoneNotFound { zone: 1 }.is_fatal());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "zone file missing");
        let err: StoreError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
        assert!(!err.is_malformed());
    }
}
