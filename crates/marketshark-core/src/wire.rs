//! Low-level wire primitives for the reverse-engineered protocol.
//!
//! The protocol carries integers as little-endian variable-length
//! quantities that look like protobuf varints but are not: the
//! terminating byte (high bit clear) contributes its full eight bits at
//! the current shift, not just the low seven. Decoders in this crate
//! reproduce that quirk exactly rather than normalizing it.
//!
//! Marker tokens are located with a plain subsequence search; there is no
//! length-prefixed framing anywhere in the observed traffic.

use crate::error::{Error, Result};

/// Decode a little-endian VLQ integer from the front of `data`.
///
/// Bytes with the high bit set contribute their low seven bits and
/// continue; the first byte with the high bit clear contributes all eight
/// bits at the current shift and terminates decoding.
///
/// Returns the decoded value and the number of bytes consumed.
///
/// Fails with [`Error::TruncatedVarint`] if the slice is empty, if no
/// terminating byte occurs within it, or if decoding would run past the
/// ten bytes a 64-bit value can occupy.
pub fn decode_vlq(data: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            // 64-bit values never span more than 10 bytes
            return Err(Error::truncated_varint(i));
        }

        if byte & 0x80 != 0 {
            value |= ((byte & 0x7F) as u64) << shift;
            shift += 7;
        } else {
            // Terminating byte: all eight bits land at the current shift.
            value |= (byte as u64) << shift;
            return Ok((value, i + 1));
        }
    }

    Err(Error::truncated_varint(data.len()))
}

/// Find a subsequence within a byte slice
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Find a subsequence within a byte slice, starting the search at `start`.
///
/// The returned offset is relative to the start of `haystack`. Returns
/// `None` when `start` is past the end of the slice.
pub fn find_subsequence_from(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if start > haystack.len() {
        return None;
    }
    find_subsequence(&haystack[start..], needle).map(|pos| pos + start)
}
