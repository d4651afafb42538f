//! # marketshark-core
//!
//! A library for reassembling and decoding a reverse-engineered
//! marketplace wire protocol carried over TCP.
//!
//! The protocol is undocumented: framing markers were inferred from
//! repeating byte signatures in captured traffic, field boundaries are
//! heuristic, and the pagination footer has no declared field widths.
//! This crate reproduces the recovered behavior faithfully, ambiguities
//! included, rather than guessing at a cleaner format.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`wire`]: VLQ integers and marker-token search
//! - [`frame`]: wire constants, frame validation, footer location
//! - [`item`]: decoding of one item sub-record
//! - [`message`]: message validation and assembly
//! - [`reassembly`]: out-of-order TCP segment reassembly
//! - [`stream`]: the segment-to-response pipeline
//! - [`error`]: error types and handling
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use marketshark_core::{RawSegment, StreamDecoder};
//!
//! let mut decoder = StreamDecoder::new();
//!
//! // Segments come from a capture collaborator; anything that is not
//! // part of a marketplace response is ignored.
//! let segment = RawSegment {
//!     ack: 42,
//!     seq: 1000,
//!     next_seq: 1017,
//!     payload: Bytes::from_static(b"unrelated traffic"),
//! };
//! assert!(decoder.push(segment).is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod frame;
pub mod item;
pub mod message;
pub mod reassembly;
pub mod stream;
pub mod wire;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export primary types for convenience
pub use error::{Error, Result};
pub use item::{Item, LootState, PlayerRef, Rarity};
pub use message::MarketplaceResponse;
pub use reassembly::{RawSegment, Reassembler, ReassemblerConfig};
pub use stream::{CompletedMessage, DecoderStats, StreamDecoder};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
