//! Per-`X-Chunk-Id` chunk collector: deposits inbound chunked envelopes,
//! reassembles a group via [`crate::envelope::chunk::merge`] once complete,
//! and expires groups whose deadline has passed (spec.md §4.4 step 5).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::envelope::chunk::{merge, ChunkError};
use crate::envelope::{Envelope, HEADER_CHUNK_ID, HEADER_CHUNK_TOTAL};

/// Header key an inbound envelope carries when the sender expects a
/// request/reply correlation. Mirrors `super::runtime::HEADER_REPLY_TO`;
/// duplicated here rather than imported so the collector has no dependency
/// on the runtime module.
const HEADER_REPLY_TO: &str = "reply_to";

/// Default chunk-group assembly timeout, per spec.md §5.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingGroup {
    chunks: Vec<Envelope>,
    total: usize,
    deadline: Instant,
    reply_to: Option<String>,
}

/// Outcome of depositing one inbound envelope.
pub enum DepositOutcome {
    /// This envelope was not chunked; dispatch it immediately.
    NotChunked(Envelope),
    /// The group is still missing chunks.
    Pending,
    /// The group just completed and has been reassembled.
    Complete(Envelope),
}

/// A group that expired before every chunk arrived.
pub struct ExpiredGroup {
    /// The group's `X-Chunk-Id`.
    pub group_id: String,
    /// Chunks actually received before expiry.
    pub have: usize,
    /// Chunks the group declared via `X-Chunk-Total`.
    pub need: usize,
    /// The `reply_to` header carried by the chunks received so far, if any
    /// — present when the sender expects a request/reply correlation, in
    /// which case the caller publishes a `ChunkTimeout` error reply here.
    pub reply_to: Option<String>,
}

/// Tracks every in-flight chunk group for one inbound channel. Concurrent
/// groups are isolated from one another by `X-Chunk-Id`.
pub struct ChunkCollector {
    groups: HashMap<String, PendingGroup>,
    chunk_timeout: Duration,
}

impl ChunkCollector {
    /// Build a collector whose groups expire `chunk_timeout` after their
    /// first chunk arrives.
    #[must_use]
    pub fn new(chunk_timeout: Duration) -> Self {
        Self {
            groups: HashMap::new(),
            chunk_timeout,
        }
    }

    /// Deposit an inbound envelope, reassembling its group if this
    /// completes it.
    ///
    /// # Errors
    /// Returns [`ChunkError`] if the completed group fails reassembly
    /// (`DuplicateIndex`/`MismatchedGroup`); the group is discarded either
    /// way.
    pub fn deposit(&mut self, envelope: Envelope, now: Instant) -> Result<DepositOutcome, ChunkError> {
        if !envelope.is_chunk() {
            return Ok(DepositOutcome::NotChunked(envelope));
        }
        let group_id = envelope.headers[HEADER_CHUNK_ID].clone();
        let total: usize = envelope.headers[HEADER_CHUNK_TOTAL].parse().unwrap_or(1);

        let group = self.groups.entry(group_id.clone()).or_insert_with(|| PendingGroup {
            chunks: Vec::with_capacity(total),
            total,
            deadline: now + self.chunk_timeout,
            reply_to: None,
        });
        if group.reply_to.is_none() {
            group.reply_to = envelope.headers.get(HEADER_REPLY_TO).cloned();
        }
        group.chunks.push(envelope);

        if group.chunks.len() < group.total {
            return Ok(DepositOutcome::Pending);
        }

        let group = self.groups.remove(&group_id).expect("just inserted");
        merge(group.chunks).map(DepositOutcome::Complete)
    }

    /// Remove and report every group whose deadline has passed.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<ExpiredGroup> {
        let expired_ids: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, group)| group.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        expired_ids
            .into_iter()
            .map(|id| {
                let group = self.groups.remove(&id).expect("just found");
                ExpiredGroup {
                    group_id: id,
                    have: group.chunks.len(),
                    need: group.total,
                    reply_to: group.reply_to,
                }
            })
            .collect()
    }

    /// The earliest deadline among in-flight groups, if any — the runtime
    /// driver sleeps up to this long before re-sweeping.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.groups.values().map(|g| g.deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AgentId, MessageType};
    use crate::envelope::chunk::{chunk, ChunkStrategy};
    use serde_json::Value;

    fn envelope(payload: Value) -> Envelope {
        Envelope::new(
            AgentId::try_new("a").unwrap(),
            "pub:big",
            MessageType::try_new("data").unwrap(),
            payload,
        )
    }

    #[test]
    fn non_chunked_envelope_dispatches_immediately() {
        let mut collector = ChunkCollector::new(Duration::from_secs(30));
        let env = envelope(Value::String("hi".to_string()));
        let outcome = collector.deposit(env, Instant::now()).unwrap();
        assert!(matches!(outcome, DepositOutcome::NotChunked(_)));
    }

    #[test]
    fn out_of_order_chunks_reassemble_on_the_last_deposit() {
        let mut collector = ChunkCollector::new(Duration::from_secs(30));
        let original = envelope(Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]));
        let mut chunks = chunk(&original, ChunkStrategy::JsonArray, 3);
        chunks.swap(0, 2);

        let now = Instant::now();
        assert!(matches!(collector.deposit(chunks.remove(0), now).unwrap(), DepositOutcome::Pending));
        assert!(matches!(collector.deposit(chunks.remove(0), now).unwrap(), DepositOutcome::Pending));
        let outcome = collector.deposit(chunks.remove(0), now).unwrap();
        let DepositOutcome::Complete(merged) = outcome else { panic!("expected complete") };
        assert_eq!(merged.payload, original.payload);
    }

    #[test]
    fn expired_group_is_swept_and_reported() {
        let mut collector = ChunkCollector::new(Duration::from_millis(10));
        let original = envelope(Value::String("x".repeat(1000)));
        let mut chunks = chunk(&original, ChunkStrategy::Text, 3);
        let t0 = Instant::now();
        collector.deposit(chunks.remove(0), t0).unwrap();
        collector.deposit(chunks.remove(0), t0).unwrap();

        let expired = collector.sweep_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].have, 2);
        assert_eq!(expired[0].need, 3);
        assert_eq!(expired[0].reply_to, None);
    }

    #[test]
    fn expired_group_carries_reply_to_from_its_chunks() {
        let mut collector = ChunkCollector::new(Duration::from_millis(10));
        let mut original = envelope(Value::String("x".repeat(1000)));
        original.headers.insert(HEADER_REPLY_TO.to_string(), "req-42".to_string());
        let mut chunks = chunk(&original, ChunkStrategy::Text, 3);
        let t0 = Instant::now();
        collector.deposit(chunks.remove(0), t0).unwrap();

        let expired = collector.sweep_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reply_to, Some("req-42".to_string()));
    }

    #[test]
    fn concurrent_groups_are_isolated() {
        let mut collector = ChunkCollector::new(Duration::from_secs(30));
        let a = envelope(Value::String("a".repeat(100)));
        let b = envelope(Value::String("b".repeat(100)));
        let mut chunks_a = chunk(&a, ChunkStrategy::Text, 2);
        let chunks_b = chunk(&b, ChunkStrategy::Text, 2);
        let now = Instant::now();

        // Interleave a's first chunk with all of b's; a must stay pending
        // until its own second chunk arrives, unaffected by b completing.
        assert!(matches!(collector.deposit(chunks_a.remove(0), now).unwrap(), DepositOutcome::Pending));
        for c in chunks_b {
            collector.deposit(c, now).unwrap();
        }
        let outcome = collector.deposit(chunks_a.remove(0), now).unwrap();
        assert!(matches!(outcome, DepositOutcome::Complete(_)));
        assert!(collector.groups.is_empty());
    }
}
