//! Byte-level fixtures shared by the protocol tests.
//!
//! Real captures cannot be checked in, so tests synthesize buffers with
//! the same shape: marker tokens, single-byte terminators, and the
//! trailing pagination footer.

use crate::frame::{ITEM_MARKER, ITEM_PREFIX_LEN, LEADERBOARD_MARKER, PROPERTY_MARKER, RESPONSE_MAGIC};

/// Builds one item sub-buffer: 20 filler prefix bytes, identity, stack
/// count, properties, then the optional and trailing fields in wire
/// order.
pub(crate) struct ItemFixture {
    pub(crate) identity: String,
    pub(crate) stack: u8,
    /// Property name plus its raw value bytes, sign-extension runs included
    pub(crate) properties: Vec<(String, Vec<u8>)>,
    pub(crate) loot_state: Option<u8>,
    pub(crate) finder: Option<(String, String)>,
    pub(crate) price_vlq: Vec<u8>,
    pub(crate) expiry: [u8; 5],
    pub(crate) seller: (String, String),
    pub(crate) rank: Option<String>,
}

impl Default for ItemFixture {
    fn default() -> Self {
        Self {
            identity: "Sword_3001".into(),
            stack: 1,
            properties: Vec::new(),
            loot_state: None,
            finder: None,
            price_vlq: vec![0x96, 0x01], // 150
            expiry: [0x05, 0x00, 0x00, 0x00, 0x00],
            seller: ("SellerGuy".into(), "Seller#77".into()),
            rank: None,
        }
    }
}

impl ItemFixture {
    pub(crate) fn build(&self) -> Vec<u8> {
        let mut buf = vec![0xAA; ITEM_PREFIX_LEN];
        buf.extend_from_slice(ITEM_MARKER);
        buf.extend_from_slice(self.identity.as_bytes());
        buf.push(0x18);
        buf.push(self.stack);
        buf.push(0x20);

        for (name, value_bytes) in &self.properties {
            buf.extend_from_slice(PROPERTY_MARKER);
            buf.extend_from_slice(name.as_bytes());
            buf.push(0x10);
            buf.extend_from_slice(value_bytes);
        }

        if let Some(code) = self.loot_state {
            buf.push(0x58);
            buf.push(code);
        }

        if let Some((name, tag)) = &self.finder {
            buf.extend_from_slice(&[0x60, 0x01, 0x6a]);
            buf.push(0x04); // filler the decoder skips as non-alphanumeric
            buf.extend_from_slice(name.as_bytes());
            buf.push(0x07); // separator
            buf.extend_from_slice(tag.as_bytes());
        }

        buf.push(0x18);
        buf.extend_from_slice(&self.price_vlq);
        buf.push(0x20);
        buf.extend_from_slice(&self.expiry);

        buf.extend_from_slice(&[0x62, 0x0a]); // opaque pair before the seller block
        buf.push(0x07); // non-alphanumeric lead-in
        buf.extend_from_slice(self.seller.0.as_bytes());
        buf.push(0x12);
        buf.extend_from_slice(&[0x0a, 0x05]); // skipped after the tag marker
        buf.extend_from_slice(self.seller.1.as_bytes());

        if let Some(rank) = &self.rank {
            // non-alphanumeric byte so the tag run stops before the marker text
            buf.push(0x1a);
            buf.extend_from_slice(LEADERBOARD_MARKER);
            buf.extend_from_slice(rank.as_bytes());
        }

        buf
    }
}

/// Builds a complete message buffer: two unknown header bytes, the
/// response magic, the given item sub-buffers, and the pagination footer.
pub(crate) fn message_fixture(items: &[Vec<u8>], page_vlq: &[u8], total_vlq: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x01, 0x02];
    buf.extend_from_slice(&RESPONSE_MAGIC);
    for item in items {
        buf.extend_from_slice(item);
    }
    buf.push(0x10);
    buf.extend_from_slice(page_vlq);
    buf.push(0x18);
    buf.extend_from_slice(total_vlq);
    buf
}
