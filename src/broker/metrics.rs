//! `MetricsCollector`: a lightweight routing-metrics sink, mirroring
//! `message_router::traits::MetricsCollector` in the teacher but scoped to
//! the events spec.md's broker actually produces (messages routed, drops,
//! chunk-group splits) rather than the teacher's WASM-agent-lifecycle
//! vocabulary.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Observes routing decisions as the broker makes them. `Broker` holds one
/// `Arc<dyn MetricsCollector>`; [`AtomicMetrics`] is the default
/// implementation and [`NoopMetrics`] is available for callers that don't
/// want the bookkeeping.
pub trait MetricsCollector: std::fmt::Debug + Send + Sync {
    /// A message (simple or envelope, unchunked) was routed to at least one
    /// subscriber or pipe.
    fn record_message_routed(&self);

    /// A single delivery to one subscriber was dropped (full channel or
    /// dead connection).
    fn record_delivery_dropped(&self);

    /// An oversized envelope was split into `chunk_count` pieces on
    /// publish.
    fn record_chunk_group_started(&self, chunk_count: usize);
}

/// Discards every event. Used where metrics collection is not wanted.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_message_routed(&self) {}
    fn record_delivery_dropped(&self) {}
    fn record_chunk_group_started(&self, _chunk_count: usize) {}
}

/// `AtomicU64`-backed counters, cheap to update from any number of
/// concurrent connection tasks. The default [`MetricsCollector`] a fresh
/// [`crate::broker::Broker`] is built with.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    messages_routed: AtomicU64,
    deliveries_dropped: AtomicU64,
    chunk_groups_started: AtomicU64,
    chunks_produced: AtomicU64,
}

impl AtomicMetrics {
    /// Read every counter as a point-in-time snapshot, for the `/stats`
    /// endpoint.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
            chunk_groups_started: self.chunk_groups_started.load(Ordering::Relaxed),
            chunks_produced: self.chunks_produced.load(Ordering::Relaxed),
        }
    }
}

impl MetricsCollector for AtomicMetrics {
    fn record_message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivery_dropped(&self) {
        self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_chunk_group_started(&self, chunk_count: usize) {
        self.chunk_groups_started.fetch_add(1, Ordering::Relaxed);
        self.chunks_produced.fetch_add(chunk_count as u64, Ordering::Relaxed);
    }
}

/// JSON-serializable point-in-time read of [`AtomicMetrics`].
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct MetricsSnapshot {
    /// Total messages (simple or envelope) fanned out to at least one
    /// subscriber or enqueued on a pipe.
    pub messages_routed: u64,
    /// Total per-subscriber deliveries dropped (full channel or dead
    /// connection).
    pub deliveries_dropped: u64,
    /// Total chunk groups produced by the publish-side chunking policy.
    pub chunk_groups_started: u64,
    /// Total individual chunk envelopes produced across all groups.
    pub chunks_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = AtomicMetrics::default();
        metrics.record_message_routed();
        metrics.record_message_routed();
        metrics.record_delivery_dropped();
        metrics.record_chunk_group_started(5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_routed, 2);
        assert_eq!(snapshot.deliveries_dropped, 1);
        assert_eq!(snapshot.chunk_groups_started, 1);
        assert_eq!(snapshot.chunks_produced, 5);
    }

    #[test]
    fn noop_metrics_does_not_panic() {
        let metrics = NoopMetrics;
        metrics.record_message_routed();
        metrics.record_delivery_dropped();
        metrics.record_chunk_group_started(3);
    }
}
