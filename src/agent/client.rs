//! `BrokerClient`: the JSON-RPC connection an agent uses to talk to the
//! broker — `connect`, `subscribe`, `publish(_envelope)`,
//! `send_pipe(_envelope)`, `receive_pipe`, plus the inbound push channel
//! that subscription and pipe deliveries arrive on.
//!
//! Grounded on `src/time_provider.rs`'s `RealTimeProvider`/`TimeProvider`
//! split, used here to make dial retries testable without real sleeps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::warn;

use crate::domain_types::AgentId;
use crate::envelope::{Envelope, Frame, RequestFrame, ResponseFrame, SimpleMessage};
use crate::time_provider::SharedTimeProvider;
use crate::wire::{read_frame, write_frame};

use super::error::AgentError;

type PendingTable = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<ResponseFrame>>>>;

/// A connected JSON-RPC client talking the broker's wire protocol.
///
/// Cloning shares the same underlying connection: every clone can issue
/// requests, but only the original owner's `inbound` receiver observes
/// pushed envelopes (there is exactly one).
#[derive(Clone)]
pub struct BrokerClient {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    inbound_rx: Arc<AsyncMutex<mpsc::Receiver<Frame>>>,
    default_timeout: Duration,
}

impl BrokerClient {
    /// Dial `address`, retrying with exponential backoff (capped at 1s)
    /// until `deadline` elapses.
    ///
    /// # Errors
    /// Returns [`AgentError::BrokerUnreachable`] if no attempt succeeds
    /// before the deadline.
    pub async fn dial(
        address: &str,
        deadline: Duration,
        rpc_timeout: Duration,
        time_provider: &SharedTimeProvider,
    ) -> Result<Self, AgentError> {
        let started = time_provider.instant();
        let mut backoff = Duration::from_millis(50);
        loop {
            match TcpStream::connect(address).await {
                Ok(stream) => return Ok(Self::from_stream(stream, rpc_timeout)),
                Err(source) => {
                    if time_provider.instant().duration_since(started) >= deadline {
                        return Err(AgentError::BrokerUnreachable {
                            address: address.to_string(),
                            source,
                        });
                    }
                    time_provider.sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(1));
                }
            }
        }
    }

    fn from_stream(stream: TcpStream, rpc_timeout: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingTable = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame::<Frame, _>(&mut reader).await {
                    Ok(Some(Frame::Response(response))) => {
                        if let Some(sender) = reader_pending.lock().expect("pending table poisoned").remove(&response.id) {
                            let _ = sender.send(response);
                        }
                    }
                    Ok(Some(pushed @ (Frame::Envelope(_) | Frame::Simple(_)))) => {
                        if inbound_tx.send(pushed).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Frame::Request(_))) => {
                        warn!("broker client received an unexpected request frame, ignoring");
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "broker connection read failed");
                        break;
                    }
                }
            }
        });

        Self {
            writer: Arc::new(AsyncMutex::new(write_half)),
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
            default_timeout: rpc_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending table poisoned").insert(id, tx);

        let request = Frame::Request(RequestFrame {
            id,
            method: method.to_string(),
            params,
        });
        {
            let mut writer = self.writer.lock().await;
            if write_frame(&mut *writer, &request).await.is_err() {
                self.pending.lock().expect("pending table poisoned").remove(&id);
                return Err(AgentError::ConnectionLost);
            }
        }

        let response = tokio::time::timeout(self.default_timeout, rx)
            .await
            .map_err(|_| AgentError::ConnectionLost)?
            .map_err(|_| AgentError::ConnectionLost)?;

        match response.error {
            Some(error) => Err(AgentError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Register this connection under `agent_id`. Idempotent per
    /// connection.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails or the connection is lost.
    pub async fn connect(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.call("connect", serde_json::json!({ "agent_id": agent_id })).await?;
        Ok(())
    }

    /// Subscribe this connection to `topic`; subsequent matching messages
    /// arrive on [`Self::inbound`].
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails or the connection is lost.
    pub async fn subscribe(&self, topic: &str) -> Result<(), AgentError> {
        self.call("subscribe", serde_json::json!({ "topic": topic })).await?;
        Ok(())
    }

    /// Fan out `message` to `topic`'s subscribers.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails or the connection is lost.
    pub async fn publish(&self, topic: &str, message: SimpleMessage) -> Result<(), AgentError> {
        self.call("publish", serde_json::json!({ "topic": topic, "message": message })).await?;
        Ok(())
    }

    /// Fan out `envelope` to `topic`'s subscribers, chunked by the broker
    /// if oversized.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails or the connection is lost.
    pub async fn publish_envelope(&self, topic: &str, envelope: Envelope) -> Result<(), AgentError> {
        self.call("publish_envelope", serde_json::json!({ "topic": topic, "envelope": envelope }))
            .await?;
        Ok(())
    }

    /// Enqueue `message` on pipe `name`.
    ///
    /// # Errors
    /// Returns [`AgentError::Rpc`] with `PipeFull`'s code if the pipe is at
    /// capacity, or [`AgentError`] if the call fails outright.
    pub async fn send_pipe(&self, name: &str, message: SimpleMessage) -> Result<(), AgentError> {
        self.call("send_pipe", serde_json::json!({ "pipe": name, "message": message })).await?;
        Ok(())
    }

    /// Enqueue `envelope` on pipe `name`, chunked if oversized.
    ///
    /// # Errors
    /// Returns [`AgentError::Rpc`] with `PipeFull`'s code if any resulting
    /// chunk can't be enqueued.
    pub async fn send_pipe_envelope(&self, name: &str, envelope: Envelope) -> Result<(), AgentError> {
        self.call("send_pipe_envelope", serde_json::json!({ "pipe": name, "envelope": envelope }))
            .await?;
        Ok(())
    }

    /// Dequeue the next item from pipe `name`, waiting up to `timeout_ms`.
    ///
    /// # Errors
    /// Returns [`AgentError::Rpc`] with `Timeout`'s code if nothing arrives
    /// in time.
    pub async fn receive_pipe(&self, name: &str, timeout_ms: Option<u64>) -> Result<Frame, AgentError> {
        let result = self
            .call("receive_pipe", serde_json::json!({ "pipe": name, "timeout_ms": timeout_ms }))
            .await?;
        serde_json::from_value(result).map_err(|e| AgentError::Rpc {
            code: crate::envelope::RpcError::INTERNAL,
            message: e.to_string(),
        })
    }

    /// Receive the next pushed frame (subscription delivery), waiting
    /// indefinitely.
    pub async fn recv(&self) -> Option<Frame> {
        self.inbound_rx.lock().await.recv().await
    }
}
