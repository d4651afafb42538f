//! Out-of-order TCP segment reassembly keyed by acknowledgment number.
//!
//! Marketplace responses span multiple TCP segments; all segments of one
//! response share an acknowledgment number. The engine opens a bucket
//! when it sees a payload that begins like a response, files every
//! further segment for that ack by sequence number, and emits the
//! ascending-sequence concatenation once every expected successor has
//! arrived.
//!
//! Segments for acks that never began a response belong to unrelated
//! traffic and are dropped silently. A consequence worth knowing: if the
//! first segment of a response arrives *after* its continuations, those
//! continuations are already gone and the response cannot be
//! reconstructed. Nothing in the captured metadata lets the engine
//! associate a continuation with a not-yet-open bucket.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::frame::{begins_response, ends_response, is_keep_alive};

/// One captured TCP payload slice with its correlation metadata.
///
/// The ack/seq/next-seq numbers are used purely as application-level
/// correlation and ordering keys, not for TCP's own retransmission
/// logic.
#[derive(Debug, Clone)]
pub struct RawSegment {
    /// Acknowledgment number; all segments of one message share it
    pub ack: u32,
    /// Sequence number of this segment
    pub seq: u32,
    /// Sequence number expected to follow this segment
    pub next_seq: u32,
    /// Raw TCP payload bytes
    pub payload: Bytes,
}

/// Configuration for the reassembly engine
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Upper bound on concurrently pending buckets. Opening a bucket
    /// beyond the bound evicts the oldest pending one, so a stream of
    /// never-completing messages cannot grow the table without limit.
    pub max_pending_buckets: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            max_pending_buckets: 64,
        }
    }
}

impl ReassemblerConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pending bucket bound
    pub fn max_pending_buckets(mut self, max: usize) -> Self {
        self.max_pending_buckets = max;
        self
    }
}

/// Segments collected so far for one acknowledgment number.
#[derive(Debug, Default)]
struct Bucket {
    /// seq → payload; iterated in ascending order at reconstruction
    segments: BTreeMap<u32, Bytes>,
    /// seq → expected successor, for segments that do not end a message
    expected_next: HashMap<u32, u32>,
    /// Monotonic open stamp, for oldest-first eviction
    opened: u64,
}

impl Bucket {
    /// Complete iff every expected successor has arrived as a segment key.
    fn is_complete(&self) -> bool {
        self.expected_next
            .values()
            .all(|next| self.segments.contains_key(next))
    }

    /// Ascending-sequence concatenation of all collected segments.
    fn reconstruct(&self) -> Bytes {
        let total: usize = self.segments.values().map(|p| p.len()).sum();
        let mut buf = BytesMut::with_capacity(total);
        for payload in self.segments.values() {
            buf.extend_from_slice(payload);
        }
        buf.freeze()
    }
}

/// Buffers out-of-order TCP payload segments and emits reconstructed
/// message buffers.
///
/// The bucket table is owned by the instance; buckets for distinct ack
/// values are mutually independent. Completeness is re-evaluated after
/// every insertion, and a completed bucket is consumed before its buffer
/// is returned.
#[derive(Debug, Default)]
pub struct Reassembler {
    buckets: HashMap<u32, Bucket>,
    config: ReassemblerConfig,
    open_stamp: u64,
}

impl Reassembler {
    /// Creates a new reassembler with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new reassembler with custom configuration
    pub fn with_config(config: ReassemblerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Number of buckets still waiting for segments
    pub fn pending_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Feeds one captured segment into the engine.
    ///
    /// Returns the reconstructed message buffer when this segment
    /// completes one; `None` means "still waiting" or "not ours", both of
    /// which are normal states rather than errors.
    pub fn ingest(&mut self, segment: RawSegment) -> Option<Bytes> {
        let RawSegment {
            ack,
            seq,
            next_seq,
            payload,
        } = segment;

        if is_keep_alive(&payload) {
            trace!(ack, "keep-alive response discarded");
            return None;
        }

        if begins_response(&payload) && !self.buckets.contains_key(&ack) {
            trace!(ack, seq, "message start; opening bucket");
            if self.buckets.len() >= self.config.max_pending_buckets {
                self.evict_oldest();
            }
            self.open_stamp += 1;
            self.buckets.insert(
                ack,
                Bucket {
                    opened: self.open_stamp,
                    ..Bucket::default()
                },
            );
        }

        let Some(bucket) = self.buckets.get_mut(&ack) else {
            trace!(ack, seq, "segment for untracked ack ignored");
            return None;
        };

        let ends = ends_response(&payload);
        bucket.segments.insert(seq, payload);
        if !ends {
            trace!(ack, seq, next_seq, "segment incomplete; expecting successor");
            bucket.expected_next.insert(seq, next_seq);
        }

        if !bucket.is_complete() {
            trace!(ack, "bucket still waiting");
            return None;
        }

        debug!(
            ack,
            segments = bucket.segments.len(),
            "all segments arrived; reconstructing"
        );
        let buffer = bucket.reconstruct();
        self.buckets.remove(&ack);
        Some(buffer)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buckets
            .iter()
            .min_by_key(|(_, bucket)| bucket.opened)
            .map(|(&ack, _)| ack);
        if let Some(ack) = oldest {
            warn!(ack, "pending bucket limit reached; evicting oldest bucket");
            self.buckets.remove(&ack);
        }
    }
}
