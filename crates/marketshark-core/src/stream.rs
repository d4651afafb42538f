//! Segment-to-response pipeline: reassembly feeding the message decoder.
//!
//! A decode failure is reported, never swallowed, and never fatal: the
//! bucket behind the failed buffer is already consumed, and the engine
//! keeps accepting segments for everything else.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::Result;
use crate::message::MarketplaceResponse;
use crate::reassembly::{RawSegment, Reassembler, ReassemblerConfig};

/// A fully reassembled message buffer together with its decode outcome.
#[derive(Debug)]
pub struct CompletedMessage {
    /// The reconstructed buffer, ascending-sequence concatenation
    pub buffer: Bytes,
    /// Decode outcome for the buffer
    pub response: Result<MarketplaceResponse>,
}

/// Running counters for a decoding session
#[derive(Debug, Default, Clone, Copy)]
pub struct DecoderStats {
    /// Segments pushed, keep-alives and unrelated traffic included
    pub segments: u64,
    /// Buffers fully reassembled
    pub completed: u64,
    /// Buffers decoded into responses
    pub decoded: u64,
    /// Buffers that failed to decode
    pub failed: u64,
}

/// Drives raw captured segments through reassembly and decoding.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    reassembler: Reassembler,
    stats: DecoderStats,
}

impl StreamDecoder {
    /// Creates a new decoder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new decoder with custom reassembly configuration
    pub fn with_config(config: ReassemblerConfig) -> Self {
        Self {
            reassembler: Reassembler::with_config(config),
            stats: DecoderStats::default(),
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Number of buckets still waiting for segments
    pub fn pending_buckets(&self) -> usize {
        self.reassembler.pending_buckets()
    }

    /// Pushes one segment, anchoring any resulting decode to the current
    /// wall clock.
    pub fn push(&mut self, segment: RawSegment) -> Option<CompletedMessage> {
        self.push_at(segment, Utc::now())
    }

    /// Pushes one segment with an explicit decode instant.
    pub fn push_at(
        &mut self,
        segment: RawSegment,
        decoded_at: DateTime<Utc>,
    ) -> Option<CompletedMessage> {
        self.stats.segments += 1;

        let buffer = self.reassembler.ingest(segment)?;
        self.stats.completed += 1;

        let response = MarketplaceResponse::decode_at(&buffer, decoded_at);
        match &response {
            Ok(_) => self.stats.decoded += 1,
            Err(err) => {
                self.stats.failed += 1;
                warn!(len = buffer.len(), %err, "reconstructed buffer failed to decode");
            }
        }

        Some(CompletedMessage { buffer, response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{message_fixture, ItemFixture};
    use crate::item::Rarity;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn segment(ack: u32, seq: u32, next_seq: u32, payload: &[u8]) -> RawSegment {
        RawSegment {
            ack,
            seq,
            next_seq,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_end_to_end_out_of_order() {
        let item = ItemFixture {
            properties: vec![("ArmorRating".into(), vec![0x19])],
            ..ItemFixture::default()
        };
        let payload = message_fixture(&[item.build()], &[0x01], &[0x01]);

        // Start, then the tail before the middle.
        let cut_a = 30;
        let cut_b = payload.len() - 20;
        let mut decoder = StreamDecoder::new();

        let first = segment(42, 5000, 5000 + cut_a as u32, &payload[..cut_a]);
        let middle = segment(42, 5000 + cut_a as u32, 5000 + cut_b as u32, &payload[cut_a..cut_b]);
        let tail = segment(
            42,
            5000 + cut_b as u32,
            5000 + payload.len() as u32,
            &payload[cut_b..],
        );

        assert!(decoder.push_at(first, fixed_clock()).is_none());
        assert!(decoder.push_at(tail, fixed_clock()).is_none());

        let completed = decoder
            .push_at(middle, fixed_clock())
            .expect("third segment completes the message");
        assert_eq!(&completed.buffer[..], &payload[..]);

        let response = completed.response.unwrap();
        assert_eq!(response.page_number, 1);
        assert_eq!(response.total_pages, 1);
        assert_eq!(response.items.len(), 1);

        let decoded = &response.items[0];
        assert_eq!(decoded.name, "Sword");
        assert_eq!(decoded.rarity, Rarity::Uncommon);
        assert_eq!(decoded.stack_count, 1);
        assert_eq!(decoded.properties.get("ArmorRating"), Some(&25));
        assert_eq!(decoded.price, 150);

        let stats = decoder.stats();
        assert_eq!(stats.segments, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_decode_failure_keeps_pipeline_running() {
        // A message that reassembles but cannot decode: the identity
        // marker is present and the buffer is well-framed, but the
        // identity terminator never appears inside the item sub-buffer.
        let mut broken = vec![0x01, 0x02, 0x00, 0x00, 0xb8, 0x0d];
        broken.extend_from_slice(&[0xAA; 20]);
        broken.extend_from_slice(crate::frame::ITEM_MARKER);
        broken.extend_from_slice(b"Broken");
        broken.extend_from_slice(&[0x10, 0x01]);
        broken.push(0x18);
        broken.push(0x01);

        let mut decoder = StreamDecoder::new();

        let completed = decoder
            .push_at(segment(1, 100, 100 + broken.len() as u32, &broken), fixed_clock())
            .expect("well-framed buffer reassembles even if it cannot decode");
        assert!(completed.response.is_err());

        // The engine is still live: a valid message on another ack decodes.
        let payload = message_fixture(&[ItemFixture::default().build()], &[0x01], &[0x01]);
        let completed = decoder
            .push_at(segment(2, 200, 200 + payload.len() as u32, &payload), fixed_clock())
            .unwrap();
        assert!(completed.response.is_ok());

        let stats = decoder.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(decoder.pending_buckets(), 0);
    }
}
