//! `Broker`: the routing core implementing `connect`, `publish`,
//! `publish_envelope`, `subscribe`, `send_pipe(_envelope)`, `receive_pipe`,
//! and the chunking publisher.
//!
//! Grounded on `message_router/router.rs::MessageRouterImpl` (an
//! injected-component struct wired from config) and
//! `message_router/traits.rs::MessageRouter`, simplified: spec.md's broker
//! has no worker-pool requirement, so there is no semaphore/task-pool here,
//! only the reader/writer-per-connection split spec.md §5 calls for (that
//! split lives in `broker::server`, which owns the sockets this struct
//! never touches).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::config::{BrokerConfig, SubscriberFullPolicy};
use crate::broker::metrics::{AtomicMetrics, MetricsCollector};
use crate::broker::registry::{ClientSender, ClientTable, PipeTable, SubscriptionTable};
use crate::domain_types::AgentId;
use crate::envelope::budget::{calculate_budget, ProviderRegistry};
use crate::envelope::chunk::{self, strategy_for_payload};
use crate::envelope::{Envelope, Frame, SimpleMessage};

use super::errors::BrokerError;

/// The broker's routing core: subscription fan-out, pipe delivery, and
/// chunking on publish.
#[derive(Debug, Clone)]
pub struct Broker {
    config: BrokerConfig,
    clients: ClientTable,
    subscriptions: SubscriptionTable,
    pipes: PipeTable,
    providers: Arc<ProviderRegistry>,
    metrics: Arc<AtomicMetrics>,
}

impl Broker {
    /// Build a broker from a validated config, with a fresh
    /// [`AtomicMetrics`] collector.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let pipe_capacity = config.default_pipe_capacity.into_inner() as usize;
        let providers = ProviderRegistry::with_defaults(&config.default_provider_profile);
        Self {
            config,
            clients: ClientTable::default(),
            subscriptions: SubscriptionTable::default(),
            pipes: PipeTable::new(pipe_capacity),
            providers: Arc::new(providers),
            metrics: Arc::new(AtomicMetrics::default()),
        }
    }

    /// Register a client connection's outbound sender under `agent_id`.
    /// Idempotent per connection.
    pub async fn connect(&self, agent_id: AgentId, sender: ClientSender) {
        self.clients.connect(agent_id, sender).await;
    }

    /// Remove all trace of a connection that read-errored or disconnected.
    pub async fn disconnect(&self, agent_id: &AgentId) {
        self.clients.disconnect(agent_id).await;
        self.subscriptions.remove_agent(agent_id).await;
    }

    /// Add this agent to `topic`'s subscriber set.
    pub async fn subscribe(&self, topic: &str, agent_id: AgentId) {
        self.subscriptions.subscribe(topic, agent_id).await;
    }

    /// Fan out a simple message to every subscriber of `topic`.
    pub async fn publish(&self, topic: &str, message: SimpleMessage) {
        self.deliver_to_subscribers(topic, Frame::Simple(message)).await;
    }

    /// Fan out an envelope to every subscriber of `topic`, chunking it
    /// first if its payload exceeds the configured provider's per-chunk
    /// budget.
    ///
    /// # Errors
    /// Returns [`BrokerError`] if the envelope's chunk headers are already
    /// inconsistent.
    pub async fn publish_envelope(&self, topic: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let profile = self
            .providers
            .resolve(None)
            .expect("default provider profile always resolves");
        let payload_text = envelope.payload.to_string();
        let metadata_text = serde_json::to_string(&envelope.headers).unwrap_or_default();
        let plan = calculate_budget(&payload_text, &metadata_text, profile);

        if !plan.needs_chunking {
            self.deliver_to_subscribers(topic, Frame::Envelope(Box::new(envelope))).await;
            return Ok(());
        }

        let strategy = strategy_for_payload(&envelope.payload);
        let chunks = chunk::chunk(&envelope, strategy, plan.suggested_chunks);
        debug!(topic, chunks = chunks.len(), "publishing chunked envelope");
        self.metrics.record_chunk_group_started(chunks.len());
        for piece in chunks {
            self.deliver_to_subscribers(topic, Frame::Envelope(Box::new(piece))).await;
        }
        Ok(())
    }

    async fn deliver_to_subscribers(&self, topic: &str, frame: Frame) {
        self.metrics.record_message_routed();
        for agent_id in self.subscriptions.subscribers_of(topic).await {
            let Some(sender) = self.clients.get(&agent_id).await else {
                warn!(%agent_id, topic, "subscriber has no live connection, dropping delivery");
                self.metrics.record_delivery_dropped();
                continue;
            };
            self.deliver_one(&agent_id, &sender, frame.clone()).await;
        }
    }

    async fn deliver_one(&self, agent_id: &AgentId, sender: &ClientSender, frame: Frame) {
        match self.config.subscriber_full_policy {
            SubscriberFullPolicy::Drop => {
                if sender.try_send(frame).is_err() {
                    warn!(%agent_id, "subscriber channel full, dropping delivery");
                    self.metrics.record_delivery_dropped();
                }
            }
            SubscriberFullPolicy::Block => {
                if sender.send(frame).await.is_err() {
                    warn!(%agent_id, "subscriber connection closed while blocked on delivery");
                    self.metrics.record_delivery_dropped();
                }
            }
        }
    }

    /// Enqueue a simple message on pipe `name`.
    ///
    /// # Errors
    /// Returns [`BrokerError::PipeFull`] if the pipe is at capacity.
    pub async fn send_pipe(&self, name: &str, message: SimpleMessage) -> Result<(), BrokerError> {
        self.pipes.send(name, Frame::Simple(message)).await
    }

    /// Enqueue an envelope on pipe `name`, chunking first if needed.
    ///
    /// # Errors
    /// Returns [`BrokerError::PipeFull`] if any resulting chunk can't be
    /// enqueued; earlier chunks already enqueued are not rolled back, as
    /// pipes give no transactional guarantee across a chunk group.
    pub async fn send_pipe_envelope(&self, name: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let profile = self.providers.resolve(None).expect("default provider profile always resolves");
        let payload_text = envelope.payload.to_string();
        let plan = calculate_budget(&payload_text, "", profile);
        if !plan.needs_chunking {
            return self.pipes.send(name, Frame::Envelope(Box::new(envelope))).await;
        }
        let strategy = strategy_for_payload(&envelope.payload);
        for piece in chunk::chunk(&envelope, strategy, plan.suggested_chunks) {
            self.pipes.send(name, Frame::Envelope(Box::new(piece))).await?;
        }
        Ok(())
    }

    /// Dequeue the next item from pipe `name`, waiting up to
    /// `timeout_ms` (defaulting to the broker's configured RPC timeout).
    ///
    /// # Errors
    /// Returns [`BrokerError::Timeout`] if nothing arrives in time.
    pub async fn receive_pipe(&self, name: &str, timeout_ms: Option<u64>) -> Result<Frame, BrokerError> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or_else(|| self.config.rpc_timeout_ms.into_inner()));
        self.pipes.receive(name, timeout).await
    }

    /// The provider registry this broker chunks against, e.g. for an
    /// agent framework that wants to plan its own egress chunking the same
    /// way.
    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// A point-in-time snapshot of connection/subscription/pipe counts and
    /// routing counters, for the `/stats` admin endpoint.
    pub async fn stats(&self) -> BrokerStats {
        BrokerStats {
            connected_clients: self.clients.connected_count().await,
            subscribed_topics: self.subscriptions.topic_count().await,
            open_pipes: self.pipes.pipe_count().await,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Point-in-time broker status, as returned by the `/stats` admin endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BrokerStats {
    /// Number of currently connected clients.
    pub connected_clients: usize,
    /// Number of distinct topics with at least one subscriber.
    pub subscribed_topics: usize,
    /// Number of distinct named pipes created so far.
    pub open_pipes: usize,
    /// Cumulative routing counters.
    pub metrics: crate::broker::metrics::MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::MessageType;
    use serde_json::Value;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    #[tokio::test]
    async fn publish_delivers_only_to_subscribers() {
        let broker = Broker::new(BrokerConfig::testing());
        let (tx, mut rx) = mpsc::channel(10);
        broker.connect(agent("b"), tx).await;
        broker.subscribe("topic1", agent("b")).await;

        broker
            .publish("topic1", SimpleMessage::new(MessageType::try_new("t").unwrap(), "topic1", Value::Null))
            .await;

        let received = rx.recv().await;
        assert!(matches!(received, Some(Frame::Simple(_))));
    }

    #[tokio::test]
    async fn fifo_per_publisher_topic_subscriber() {
        let broker = Broker::new(BrokerConfig::development());
        let (tx, mut rx) = mpsc::channel(10);
        broker.connect(agent("b"), tx).await;
        broker.subscribe("topic1", agent("b")).await;

        for i in 0..3 {
            broker
                .publish(
                    "topic1",
                    SimpleMessage::new(MessageType::try_new("t").unwrap(), "topic1", Value::from(i)),
                )
                .await;
        }

        for expected in 0..3 {
            let Some(Frame::Simple(msg)) = rx.recv().await else { panic!("expected simple message") };
            assert_eq!(msg.payload, Value::from(expected));
        }
    }

    #[tokio::test]
    async fn oversized_envelope_is_chunked_on_publish() {
        let broker = Broker::new(BrokerConfig::testing());
        let (tx, mut rx) = mpsc::channel(32);
        broker.connect(agent("s"), tx).await;
        broker.subscribe("big", agent("s")).await;

        let envelope = Envelope::new(
            agent("p"),
            "pub:big",
            MessageType::try_new("data").unwrap(),
            Value::String("x".repeat(10_000)),
        );
        broker.publish_envelope("big", envelope).await.unwrap();

        let mut count = 0;
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            assert!(matches!(frame, Frame::Envelope(_)));
            count += 1;
        }
        assert!(count >= 4);
    }

    #[tokio::test]
    async fn drop_policy_does_not_block_on_full_subscriber_channel() {
        let config = BrokerConfig::builder()
            .subscriber_channel_capacity(crate::broker::domain_types::ChannelCapacity::try_new(1).unwrap())
            .build()
            .unwrap();
        let broker = Broker::new(config);
        let (tx, _rx) = mpsc::channel(1);
        broker.connect(agent("s"), tx).await;
        broker.subscribe("t", agent("s")).await;

        for i in 0..5 {
            broker
                .publish("t", SimpleMessage::new(MessageType::try_new("t").unwrap(), "t", Value::from(i)))
                .await;
        }
    }

    #[tokio::test]
    async fn stats_reflect_connections_subscriptions_and_routed_messages() {
        let broker = Broker::new(BrokerConfig::testing());
        let (tx, mut rx) = mpsc::channel(10);
        broker.connect(agent("s"), tx).await;
        broker.subscribe("t", agent("s")).await;
        broker
            .publish("t", SimpleMessage::new(MessageType::try_new("t").unwrap(), "t", Value::Null))
            .await;
        rx.recv().await;

        let stats = broker.stats().await;
        assert_eq!(stats.connected_clients, 1);
        assert_eq!(stats.subscribed_topics, 1);
        assert_eq!(stats.metrics.messages_routed, 1);
    }
}
