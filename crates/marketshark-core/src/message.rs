//! Marketplace response assembly: frame validation, item boundary scan,
//! pagination footer.
//!
//! A reconstructed buffer is validated (magic at the front, footer at the
//! back), split into item sub-buffers anchored on the identity marker
//! token, and decoded item by item. Any single item failure aborts the
//! whole message; no partial response is ever produced.

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::frame::{begins_response, locate_footer, ITEM_MARKER, ITEM_PREFIX_LEN, RESPONSE_HEADER_LEN};
use crate::item::{decode_item, Item};
use crate::wire::{decode_vlq, find_subsequence_from};

/// One fully decoded marketplace response message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MarketplaceResponse {
    /// The two unknown bytes preceding the magic, kept for diagnostics
    pub header_bytes: [u8; 2],
    /// Decoded items, in buffer order
    pub items: Vec<Item>,
    /// Page number of this response
    pub page_number: u64,
    /// Total pages available for the query
    pub total_pages: u64,
}

impl MarketplaceResponse {
    /// Decodes a reconstructed message buffer, anchoring item expiry to
    /// the current wall clock.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Self::decode_at(payload, Utc::now())
    }

    /// Decodes a reconstructed message buffer with an explicit decode
    /// instant.
    ///
    /// Decoding the same buffer twice with the same instant yields
    /// structurally identical responses; with different instants only the
    /// derived `expires_at` fields differ.
    pub fn decode_at(payload: &[u8], decoded_at: DateTime<Utc>) -> Result<Self> {
        if !begins_response(payload) {
            return Err(Error::MissingHeader);
        }
        let footer =
            locate_footer(payload).ok_or_else(|| Error::missing_footer(payload.len()))?;

        // Each marker occurrence anchors one item; the sub-buffer starts
        // 20 unparsed bytes before it.
        let mut starts = Vec::new();
        let mut search = RESPONSE_HEADER_LEN;
        while let Some(pos) = find_subsequence_from(payload, ITEM_MARKER, search) {
            trace!(pos, "item marker");
            starts.push(pos.saturating_sub(ITEM_PREFIX_LEN));
            search = pos + ITEM_MARKER.len();
        }

        let mut items = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = match starts.get(i + 1) {
                Some(&next) => next,
                None => footer.start,
            };
            let sub = payload.get(start..end).ok_or_else(|| {
                Error::internal(format!(
                    "item range {start}..{end} escapes a {}-byte buffer",
                    payload.len()
                ))
            })?;
            items.push(decode_item(sub, decoded_at)?);
        }

        let (page_number, _) = decode_vlq(&payload[footer.page_range()])?;
        let (total_pages, _) = decode_vlq(&payload[footer.total_range(payload.len())])?;

        debug!(
            items = items.len(),
            page_number, total_pages, "decoded marketplace response"
        );

        Ok(Self {
            header_bytes: [payload[0], payload[1]],
            items,
            page_number,
            total_pages,
        })
    }
}
