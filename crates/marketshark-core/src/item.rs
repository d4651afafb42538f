//! Decoding of a single marketplace item sub-record.
//!
//! An item sub-buffer has no declared field lengths. Fields are laid out
//! sequentially and anchored on marker bytes or tokens; each decode step
//! starts at the offset where the previous step stopped and never
//! backtracks. The steps, in order: unparsed header prefix, identity
//! (name and rarity), stack count, zero or more properties, optional loot
//! state, optional finder identity, price, expiry offset, seller identity
//! with an optional leaderboard rank tail.
//!
//! Text fields are extracted lossily; invalid UTF-8 never aborts a
//! decode.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use tracing::trace;

use crate::error::{Error, Result};
use crate::frame::{ITEM_MARKER, LEADERBOARD_MARKER, PROPERTY_MARKER};
use crate::wire::{decode_vlq, find_subsequence_from};

/// Terminates the identity text; also anchors the stack count, the finder
/// tag, and the price field.
const FIELD_MARKER: u8 = 0x18;

/// Literal space byte terminating the stack count and the price VLQ
const SPACE_TERMINATOR: u8 = 0x20;

/// Terminates a property name; the value byte follows it
const PROPERTY_NAME_TERMINATOR: u8 = 0x10;

/// A run of these after a property value byte flags a negative value
const SIGN_EXTENSION: u8 = 0xFF;

/// Marker byte introducing the optional loot state
const LOOT_STATE_MARKER: u8 = 0x58;

/// Fixed prefix introducing the optional finder identity
const FINDER_PREFIX: [u8; 3] = [0x60, 0x01, 0x6a];

/// Marker byte between the seller's display name and tag
const SELLER_TAG_MARKER: u8 = 0x12;

/// Bytes occupied by the expiry offset VLQ
const EXPIRY_LEN: usize = 5;

/// Item rarity tier, decoded from the numeric suffix of the identity
/// field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Rarity {
    /// Code 1001
    Poor,
    /// Code 2001; also the fallback when no code is present
    #[default]
    Common,
    /// Code 3001
    Uncommon,
    /// Code 4001
    Rare,
    /// Code 5001
    Epic,
    /// Code 6001
    Legendary,
    /// Code 7001
    Unique,
    /// A code was present but is not in the known table
    Unknown,
}

impl Rarity {
    /// Maps a wire rarity code to its tier.
    pub fn from_code(code: u32) -> Self {
        match code {
            1001 => Self::Poor,
            2001 => Self::Common,
            3001 => Self::Uncommon,
            4001 => Self::Rare,
            5001 => Self::Epic,
            6001 => Self::Legendary,
            7001 => Self::Unique,
            _ => Self::Unknown,
        }
    }

    /// Returns the display name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "Poor",
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
            Self::Unique => "Unique",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-sale handling state; present only on listings the server has
/// already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LootState {
    /// Code 2
    Looted,
    /// Code 3
    Handled,
    /// Any other code
    Unknown,
}

impl LootState {
    /// Maps a wire loot-state code to its state.
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => Self::Looted,
            3 => Self::Handled,
            _ => Self::Unknown,
        }
    }

    /// Returns the display name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Looted => "Looted",
            Self::Handled => "Handled",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for LootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player reference: display name plus discriminator tag.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PlayerRef {
    /// Display name
    pub name: String,
    /// Discriminator tag, e.g. `Fighter#1234`
    pub tag: String,
}

/// One decoded marketplace listing.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Item {
    /// Unparsed bytes preceding the identity marker, kept verbatim for
    /// diagnostics
    pub header_bytes: Vec<u8>,
    /// Item name, without the rarity code suffix
    pub name: String,
    /// Rarity tier
    pub rarity: Rarity,
    /// Number of units in the listing
    pub stack_count: u8,
    /// Per-item numeric attributes, in encounter order; a repeated name
    /// keeps its first position and takes the last value
    pub properties: IndexMap<String, i64>,
    /// Post-sale state, absent on live listings
    pub loot_state: Option<LootState>,
    /// Player who found the item, when the listing carries one
    pub found_by: Option<PlayerRef>,
    /// Player selling the item
    pub seller: PlayerRef,
    /// Leaderboard rank text, when the listing carries one
    pub leaderboard_rank: Option<String>,
    /// Asking price, in the currency's minor unit
    pub price: u64,
    /// Millisecond offset decoded from the wire; this is the canonical
    /// expiry field
    pub expires_in_ms: u64,
    /// Decode instant plus [`expires_in_ms`](Self::expires_in_ms).
    /// Recomputing from a stored buffer at a later time yields a
    /// different instant; only the offset is authoritative.
    pub expires_at: DateTime<Utc>,
}

/// Position into an immutable item sub-buffer.
///
/// Every decode step takes the cursor where the previous step left it and
/// advances it forward; nothing rewinds.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.buf.get(self.pos + offset).copied()
    }

    fn bump(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.rest().starts_with(prefix)
    }

    /// Absolute offset of the next occurrence of `byte`, from the cursor on
    fn find_byte(&self, byte: u8) -> Option<usize> {
        self.rest().iter().position(|&b| b == byte).map(|p| p + self.pos)
    }

    /// Absolute offset of the next occurrence of `token`, from the cursor on
    fn find_token(&self, token: &[u8]) -> Option<usize> {
        find_subsequence_from(self.buf, token, self.pos)
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        self.skip_while(pred);
        &self.buf[start..self.pos]
    }
}

/// Decodes one item sub-buffer into a structured [`Item`].
///
/// `decoded_at` is the instant the expiry offset is anchored to; pass a
/// fixed value for deterministic results.
pub fn decode_item(buf: &[u8], decoded_at: DateTime<Utc>) -> Result<Item> {
    let mut cur = Cursor::new(buf);

    let (header_bytes, name, rarity) = identity(&mut cur)?;
    let stack_count = stack_count(&mut cur)?;
    let properties = properties(&mut cur)?;
    let loot_state = loot_state(&mut cur);
    let found_by = finder(&mut cur);
    let price = price(&mut cur)?;
    let expires_in_ms = expiry(&mut cur)?;
    let (seller, leaderboard_rank) = seller(&mut cur)?;

    trace!(%name, %rarity, price, "decoded item");

    Ok(Item {
        header_bytes,
        name,
        rarity,
        stack_count,
        properties,
        loot_state,
        found_by,
        seller,
        leaderboard_rank,
        price,
        expires_in_ms,
        expires_at: decoded_at + TimeDelta::milliseconds(expires_in_ms as i64),
    })
}

/// Step 1+2: header prefix and identity.
///
/// Everything before the identity marker is kept verbatim. The identity
/// text runs from the end of the marker to the next `0x18`; the cursor is
/// left on that terminator because the stack count step anchors on it.
fn identity(cur: &mut Cursor<'_>) -> Result<(Vec<u8>, String, Rarity)> {
    let marker = cur.find_token(ITEM_MARKER).ok_or(Error::MissingIdentity)?;
    let header_bytes = cur.buf[..marker].to_vec();
    cur.pos = marker + ITEM_MARKER.len();

    let end = cur.find_byte(FIELD_MARKER).ok_or(Error::MissingIdentity)?;
    let text = String::from_utf8_lossy(&cur.buf[cur.pos..end]);
    cur.pos = end;

    let (name, rarity) = split_identity(&text);
    Ok((header_bytes, name, rarity))
}

/// Splits `Name_<code>` identity text into name and rarity.
///
/// The code is the part after the last underscore, so names containing
/// underscores keep their full text. No underscore or an empty code means
/// the default rarity; a non-empty code outside the table is `Unknown`.
fn split_identity(text: &str) -> (String, Rarity) {
    match text.rsplit_once('_') {
        None => (text.to_string(), Rarity::Common),
        Some((name, "")) => (name.to_string(), Rarity::Common),
        Some((name, code)) => {
            let rarity = code
                .parse::<u32>()
                .map(Rarity::from_code)
                .unwrap_or(Rarity::Unknown);
            (name.to_string(), rarity)
        }
    }
}

/// Step 3: stack count, the literal three bytes `0x18 <count> 0x20`.
///
/// The count is the raw byte value, not a VLQ.
fn stack_count(cur: &mut Cursor<'_>) -> Result<u8> {
    let at = cur.pos;
    match (cur.peek(), cur.peek_at(1), cur.peek_at(2)) {
        (Some(FIELD_MARKER), Some(count), Some(SPACE_TERMINATOR)) => {
            cur.bump(3);
            Ok(count)
        }
        _ => Err(Error::malformed_stack_count(at)),
    }
}

/// Step 4: zero or more properties.
///
/// Each property is the marker token, the name text up to `0x10`, and a
/// single unsigned value byte. A run of `0xFF` immediately after the
/// value byte means the value is negative two's-complement: subtract 256,
/// swallow the `0xFF` run, and swallow one trailing `0x01` if present.
fn properties(cur: &mut Cursor<'_>) -> Result<IndexMap<String, i64>> {
    let mut props = IndexMap::new();

    while let Some(marker) = cur.find_token(PROPERTY_MARKER) {
        cur.pos = marker + PROPERTY_MARKER.len();

        let end = cur.find_byte(PROPERTY_NAME_TERMINATOR).ok_or_else(|| {
            Error::malformed_property(String::from_utf8_lossy(cur.rest()).into_owned())
        })?;
        let name = String::from_utf8_lossy(&cur.buf[cur.pos..end]).into_owned();
        cur.pos = end + 1;

        let value_byte = cur
            .peek()
            .ok_or_else(|| Error::malformed_property(name.clone()))?;
        let mut value = value_byte as i64;
        cur.bump(1);

        if cur.peek() == Some(SIGN_EXTENSION) {
            value -= 256;
            cur.skip_while(|b| b == SIGN_EXTENSION);
            if cur.peek() == Some(0x01) {
                cur.bump(1);
            }
        }

        // Repeated names take the last value, keeping the first position.
        props.insert(name, value);
    }

    Ok(props)
}

/// Step 5: optional loot state, `0x58 <code>`.
///
/// Absent unless the current byte is the marker; nothing is consumed in
/// that case.
fn loot_state(cur: &mut Cursor<'_>) -> Option<LootState> {
    if cur.peek() != Some(LOOT_STATE_MARKER) {
        return None;
    }
    let code = cur.peek_at(1)?;
    cur.bump(2);
    Some(LootState::from_code(code))
}

/// Step 6: optional finder identity, introduced by the `60 01 6a` prefix.
///
/// After the prefix: skip non-alphanumeric filler, take the alphanumeric
/// run as the display name, skip one separator byte, then everything up
/// to the next `0x18` is the tag. Absent prefix consumes nothing.
fn finder(cur: &mut Cursor<'_>) -> Option<PlayerRef> {
    if !cur.starts_with(&FINDER_PREFIX) {
        return None;
    }
    cur.bump(FINDER_PREFIX.len());

    cur.skip_while(|b| !b.is_ascii_alphanumeric());
    let name = String::from_utf8_lossy(cur.take_while(|b| b.is_ascii_alphanumeric())).into_owned();
    cur.bump(1);

    let end = cur.find_byte(FIELD_MARKER).unwrap_or(cur.buf.len());
    let tag = String::from_utf8_lossy(&cur.buf[cur.pos..end]).into_owned();
    cur.pos = end;

    Some(PlayerRef { name, tag })
}

/// Step 7: price, the VLQ between the next `0x18` and the next `0x20`.
fn price(cur: &mut Cursor<'_>) -> Result<u64> {
    if cur.peek() != Some(FIELD_MARKER) {
        let marker = cur.find_byte(FIELD_MARKER).ok_or(Error::MissingPrice)?;
        cur.pos = marker;
    }
    cur.bump(1);

    let end = cur.find_byte(SPACE_TERMINATOR).ok_or(Error::MissingPrice)?;
    let (price, _) = decode_vlq(&cur.buf[cur.pos..end])?;
    cur.pos = end + 1;

    Ok(price)
}

/// Step 8: expiry offset, the five bytes after the price terminator,
/// VLQ-decoded as milliseconds.
fn expiry(cur: &mut Cursor<'_>) -> Result<u64> {
    let bytes = cur
        .buf
        .get(cur.pos..cur.pos + EXPIRY_LEN)
        .ok_or(Error::TruncatedExpiry)?;
    let (offset_ms, _) = decode_vlq(bytes)?;
    cur.bump(EXPIRY_LEN);
    Ok(offset_ms)
}

/// Step 9: seller identity and the optional leaderboard rank tail.
///
/// Two opaque bytes, non-alphanumeric filler, then the alphanumeric
/// display name runs up to the `0x12` marker; two more bytes are skipped
/// after it and the tag is the following alphanumeric-or-`#` run. If the
/// leaderboard marker token occurs anywhere after that, the rest of the
/// sub-buffer is the rank text.
fn seller(cur: &mut Cursor<'_>) -> Result<(PlayerRef, Option<String>)> {
    if cur.rest().len() < 2 {
        return Err(Error::MissingSeller);
    }
    cur.bump(2);

    cur.skip_while(|b| !b.is_ascii_alphanumeric());
    let name = String::from_utf8_lossy(cur.take_while(|b| b.is_ascii_alphanumeric())).into_owned();

    let marker = cur.find_byte(SELLER_TAG_MARKER).ok_or(Error::MissingSeller)?;
    cur.pos = marker + 1;
    cur.bump(2);

    let tag = String::from_utf8_lossy(
        cur.take_while(|b| b.is_ascii_alphanumeric() || b == b'#'),
    )
    .into_owned();

    let rank = cur.find_token(LEADERBOARD_MARKER).map(|m| {
        String::from_utf8_lossy(&cur.buf[m + LEADERBOARD_MARKER.len()..]).into_owned()
    });

    Ok((PlayerRef { name, tag }, rank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ItemFixture;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_default_item() {
        let buf = ItemFixture::default().build();
        let item = decode_item(&buf, fixed_clock()).unwrap();

        assert_eq!(item.header_bytes.len(), 20);
        assert_eq!(item.name, "Sword");
        assert_eq!(item.rarity, Rarity::Uncommon);
        assert_eq!(item.stack_count, 1);
        assert!(item.properties.is_empty());
        assert_eq!(item.loot_state, None);
        assert_eq!(item.found_by, None);
        assert_eq!(item.seller.name, "SellerGuy");
        assert_eq!(item.seller.tag, "Seller#77");
        assert_eq!(item.leaderboard_rank, None);
        assert_eq!(item.price, 150);
        assert_eq!(item.expires_in_ms, 5);
        assert_eq!(
            item.expires_at,
            fixed_clock() + TimeDelta::milliseconds(5)
        );
    }

    #[test]
    fn test_decode_positive_property() {
        let fixture = ItemFixture {
            properties: vec![("ArmorRating".into(), vec![0x19])],
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.properties.get("ArmorRating"), Some(&25));
    }

    #[test]
    fn test_decode_negative_property() {
        // Value byte 0xFB followed by an 0xFF run and the trailing 0x01:
        // 251 - 256 = -5
        let fixture = ItemFixture {
            properties: vec![("MoveSpeed".into(), vec![0xFB, 0xFF, 0xFF, 0x01])],
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.properties.get("MoveSpeed"), Some(&-5));
    }

    #[test]
    fn test_decode_repeated_property_keeps_last_value() {
        let fixture = ItemFixture {
            properties: vec![
                ("ArmorRating".into(), vec![0x05]),
                ("Weight".into(), vec![0x02]),
                ("ArmorRating".into(), vec![0x07]),
            ],
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.properties.get("ArmorRating"), Some(&7));
        // first-encounter position survives the overwrite
        assert_eq!(
            item.properties.keys().collect::<Vec<_>>(),
            vec!["ArmorRating", "Weight"]
        );
    }

    #[test]
    fn test_decode_loot_state_and_finder() {
        let fixture = ItemFixture {
            loot_state: Some(2),
            finder: Some(("FinderGuy".into(), "F1nder#9".into())),
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.loot_state, Some(LootState::Looted));
        let finder = item.found_by.unwrap();
        assert_eq!(finder.name, "FinderGuy");
        assert_eq!(finder.tag, "F1nder#9");
    }

    #[test]
    fn test_decode_unknown_loot_state() {
        let fixture = ItemFixture {
            loot_state: Some(9),
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.loot_state, Some(LootState::Unknown));
    }

    #[test]
    fn test_decode_leaderboard_rank() {
        let fixture = ItemFixture {
            rank: Some("Gold".into()),
            ..ItemFixture::default()
        };
        let item = decode_item(&fixture.build(), fixed_clock()).unwrap();
        assert_eq!(item.leaderboard_rank.as_deref(), Some("Gold"));
    }

    #[test]
    fn test_split_identity() {
        assert_eq!(split_identity("Sword_3001"), ("Sword".into(), Rarity::Uncommon));
        assert_eq!(
            split_identity("Golden_Key_7001"),
            ("Golden_Key".into(), Rarity::Unique)
        );
        assert_eq!(split_identity("Sword"), ("Sword".into(), Rarity::Common));
        assert_eq!(split_identity("Sword_"), ("Sword".into(), Rarity::Common));
        assert_eq!(split_identity("Sword_9999"), ("Sword".into(), Rarity::Unknown));
        assert_eq!(split_identity("Sword_abc"), ("Sword".into(), Rarity::Unknown));
    }

    #[test]
    fn test_missing_identity_terminator() {
        let mut buf = vec![0xAA; 20];
        buf.extend_from_slice(ITEM_MARKER);
        buf.extend_from_slice(b"Sword");
        // no 0x18 anywhere after the marker
        assert!(matches!(
            decode_item(&buf, fixed_clock()),
            Err(Error::MissingIdentity)
        ));
    }

    #[test]
    fn test_missing_identity_marker() {
        let buf = vec![0xAA; 64];
        assert!(matches!(
            decode_item(&buf, fixed_clock()),
            Err(Error::MissingIdentity)
        ));
    }

    #[test]
    fn test_malformed_stack_count() {
        let mut buf = vec![0xAA; 20];
        buf.extend_from_slice(ITEM_MARKER);
        buf.extend_from_slice(b"Sword_3001");
        buf.push(0x18);
        buf.push(0x05);
        buf.push(0x42); // not the 0x20 terminator
        assert!(matches!(
            decode_item(&buf, fixed_clock()),
            Err(Error::MalformedStackCount { .. })
        ));
    }

    #[test]
    fn test_missing_price() {
        // Identity and stack count are fine, then the buffer ends with no
        // 0x18 price marker.
        let mut buf = vec![0xAA; 20];
        buf.extend_from_slice(ITEM_MARKER);
        buf.extend_from_slice(b"Sword_3001");
        buf.extend_from_slice(&[0x18, 0x01, 0x20]);
        buf.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            decode_item(&buf, fixed_clock()),
            Err(Error::MissingPrice)
        ));
    }

    #[test]
    fn test_truncated_expiry() {
        let mut buf = vec![0xAA; 20];
        buf.extend_from_slice(ITEM_MARKER);
        buf.extend_from_slice(b"Sword_3001");
        buf.extend_from_slice(&[0x18, 0x01, 0x20]);
        buf.extend_from_slice(&[0x18, 0x05, 0x20]); // price 5
        buf.extend_from_slice(&[0x00, 0x00]); // only two expiry bytes
        assert!(matches!(
            decode_item(&buf, fixed_clock()),
            Err(Error::TruncatedExpiry)
        ));
    }

    #[test]
    fn test_rarity_table() {
        assert_eq!(Rarity::from_code(1001), Rarity::Poor);
        assert_eq!(Rarity::from_code(7001), Rarity::Unique);
        assert_eq!(Rarity::from_code(42), Rarity::Unknown);
        assert_eq!(Rarity::default(), Rarity::Common);
        assert_eq!(Rarity::Legendary.to_string(), "Legendary");
    }
}
