//! Error types for the marketshark-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.

use thiserror::Error;

/// Result type alias for marketshark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all decode operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// VLQ decoding exhausted its input before a terminating byte
    #[error("truncated varint at offset {offset}: no terminating byte in slice")]
    TruncatedVarint {
        /// Byte offset where decoding gave up
        offset: usize,
    },

    /// Buffer does not begin with the marketplace response magic
    #[error("payload does not begin with the marketplace response magic")]
    MissingHeader,

    /// No footer pattern was found in the trailing bytes
    #[error("no footer pattern in the trailing bytes of a {len}-byte buffer")]
    MissingFooter {
        /// Length of the buffer that was searched
        len: usize,
    },

    /// Item identity marker or its terminator was not found
    #[error("item identity marker or its 0x18 terminator not found")]
    MissingIdentity,

    /// Stack count field did not match the `0x18 <count> 0x20` shape
    #[error("malformed stack count at offset {offset}: expected 0x18 <count> 0x20")]
    MalformedStackCount {
        /// Offset of the expected stack-count marker within the item sub-buffer
        offset: usize,
    },

    /// Property record ran out of bytes or lost its name terminator
    #[error("malformed property '{name}': terminator or value bytes missing")]
    MalformedProperty {
        /// Property name, or the raw trailing text when the name terminator is missing
        name: String,
    },

    /// Price marker `0x18` or its `0x20` terminator was not found
    #[error("price marker 0x18 or its 0x20 terminator not found")]
    MissingPrice,

    /// Fewer than five bytes follow the price terminator
    #[error("expiry field truncated: fewer than 5 bytes after the price terminator")]
    TruncatedExpiry,

    /// Seller identity markers were not found
    #[error("seller identity markers not found")]
    MissingSeller,

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new truncated varint error
    pub fn truncated_varint(offset: usize) -> Self {
        Self::TruncatedVarint { offset }
    }

    /// Creates a new missing footer error
    pub fn missing_footer(len: usize) -> Self {
        Self::MissingFooter { len }
    }

    /// Creates a new malformed stack count error
    pub fn malformed_stack_count(offset: usize) -> Self {
        Self::MalformedStackCount { offset }
    }

    /// Creates a new malformed property error
    pub fn malformed_property(name: impl Into<String>) -> Self {
        Self::MalformedProperty { name: name.into() }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
