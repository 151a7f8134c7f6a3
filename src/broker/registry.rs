//! Subscription table, pipe map, and registered-client table.
//!
//! Each table is guarded by its own single `RwLock`; lookups (the hot path)
//! take the read lock, per spec.md §5. No method here ever holds two of
//! these locks at once. Grounded on
//! `message_router/implementations/agent_registry.rs`'s lookup-table shape,
//! simplified from `DashMap` sharding to the single-lock discipline spec.md
//! mandates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};

use crate::broker::errors::BrokerError;
use crate::domain_types::AgentId;
use crate::envelope::Frame;

/// Per-connection outbound handle: both JSON-RPC responses and
/// subscription pushes for one agent's connection flow through this single
/// bounded channel, drained by that connection's writer task.
pub type ClientSender = mpsc::Sender<Frame>;

/// Registered-client table, keyed by `agent_id`.
#[derive(Debug, Clone, Default)]
pub struct ClientTable {
    clients: Arc<RwLock<HashMap<AgentId, ClientSender>>>,
}

impl ClientTable {
    /// Register (or replace) the outbound sender for `agent_id`. Idempotent
    /// per connection: calling `connect` again for the same agent replaces
    /// the prior handle.
    pub async fn connect(&self, agent_id: AgentId, sender: ClientSender) {
        self.clients.write().await.insert(agent_id, sender);
    }

    /// Remove `agent_id`'s connection, e.g. on a read error.
    pub async fn disconnect(&self, agent_id: &AgentId) {
        self.clients.write().await.remove(agent_id);
    }

    /// Fetch `agent_id`'s outbound sender, if connected.
    pub async fn get(&self, agent_id: &AgentId) -> Option<ClientSender> {
        self.clients.read().await.get(agent_id).cloned()
    }

    /// Number of currently connected clients, for the `/stats` endpoint.
    pub async fn connected_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Topic subscription table: topic name to the set of subscribed agents.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTable {
    subscribers: Arc<RwLock<HashMap<String, HashSet<AgentId>>>>,
}

impl SubscriptionTable {
    /// Add `agent_id` to `topic`'s subscriber set. Idempotent: repeated
    /// calls for the same `(topic, agent_id)` pair register exactly one
    /// entry.
    pub async fn subscribe(&self, topic: &str, agent_id: AgentId) {
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(agent_id);
    }

    /// Snapshot the current subscriber set for `topic`. Empty (not an
    /// error) for an unknown topic — `UnknownTopic` is informational.
    pub async fn subscribers_of(&self, topic: &str) -> Vec<AgentId> {
        self.subscribers
            .read()
            .await
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove `agent_id` from every topic, e.g. on disconnect.
    pub async fn remove_agent(&self, agent_id: &AgentId) {
        let mut subscribers = self.subscribers.write().await;
        for set in subscribers.values_mut() {
            set.remove(agent_id);
        }
    }

    /// Number of distinct topics with at least one subscriber, for the
    /// `/stats` endpoint.
    pub async fn topic_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

struct Pipe {
    sender: mpsc::Sender<Frame>,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Frame>>>,
}

/// Named bounded pipe queues, created on first use with a configured
/// default capacity.
#[derive(Debug, Clone, Default)]
pub struct PipeTable {
    pipes: Arc<RwLock<HashMap<String, Arc<Pipe>>>>,
    default_capacity: usize,
}

impl PipeTable {
    /// Build an empty pipe table whose pipes default to `default_capacity`
    /// when first created.
    #[must_use]
    pub fn new(default_capacity: usize) -> Self {
        Self {
            pipes: Arc::new(RwLock::new(HashMap::new())),
            default_capacity: default_capacity.max(1),
        }
    }

    async fn get_or_create(&self, name: &str) -> Arc<Pipe> {
        if let Some(pipe) = self.pipes.read().await.get(name) {
            return pipe.clone();
        }
        let mut pipes = self.pipes.write().await;
        pipes
            .entry(name.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::channel(self.default_capacity);
                Arc::new(Pipe {
                    sender,
                    receiver: Arc::new(AsyncMutex::new(receiver)),
                })
            })
            .clone()
    }

    /// Enqueue `frame` on pipe `name`.
    ///
    /// # Errors
    /// Returns [`BrokerError::PipeFull`] if the pipe's bounded buffer is at
    /// capacity.
    pub async fn send(&self, name: &str, frame: Frame) -> Result<(), BrokerError> {
        let pipe = self.get_or_create(name).await;
        pipe.sender.try_send(frame).map_err(|_| BrokerError::PipeFull {
            pipe: name.to_string(),
        })
    }

    /// Dequeue the next item from pipe `name`, waiting up to `timeout`.
    ///
    /// # Errors
    /// Returns [`BrokerError::Timeout`] if nothing arrives before the
    /// deadline.
    pub async fn receive(&self, name: &str, timeout: std::time::Duration) -> Result<Frame, BrokerError> {
        let pipe = self.get_or_create(name).await;
        let mut receiver = pipe.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) | Err(_) => Err(BrokerError::Timeout { pipe: name.to_string() }),
        }
    }

    /// Number of distinct named pipes created so far, for the `/stats`
    /// endpoint.
    pub async fn pipe_count(&self) -> usize {
        self.pipes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::MessageType;
    use crate::envelope::SimpleMessage;
    use serde_json::Value;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    fn frame() -> Frame {
        Frame::Simple(SimpleMessage::new(MessageType::try_new("t").unwrap(), "pipe:p", Value::Null))
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let table = SubscriptionTable::default();
        table.subscribe("topic1", agent("a")).await;
        table.subscribe("topic1", agent("a")).await;
        assert_eq!(table.subscribers_of("topic1").await.len(), 1);
    }

    #[tokio::test]
    async fn pipe_full_is_reported() {
        let pipes = PipeTable::new(2);
        pipes.send("p", frame()).await.unwrap();
        pipes.send("p", frame()).await.unwrap();
        assert!(matches!(pipes.send("p", frame()).await, Err(BrokerError::PipeFull { .. })));
    }

    #[tokio::test]
    async fn pipe_fifo_order_and_receive_after_drain() {
        let pipes = PipeTable::new(2);
        pipes.send("p", frame()).await.unwrap();
        pipes.receive("p", std::time::Duration::from_millis(50)).await.unwrap();
        pipes.send("p", frame()).await.unwrap();
        pipes.send("p", frame()).await.unwrap();
        assert!(pipes.send("p", frame()).await.is_err());
    }

    #[tokio::test]
    async fn pipe_receive_times_out_cleanly() {
        let pipes = PipeTable::new(2);
        let result = pipes.receive("empty", std::time::Duration::from_millis(10)).await;
        assert!(matches!(result, Err(BrokerError::Timeout { .. })));
    }
}
