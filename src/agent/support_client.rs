//! `SupportClient`: the JSON-RPC connection an agent uses to register with
//! and query the support registry — `register`, `declare_*`, `wait_ready`,
//! `list_status`.
//!
//! Mirrors [`super::client::BrokerClient`]'s dial/call machinery; support
//! never pushes unsolicited frames, so there is no inbound channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::warn;

use crate::domain_types::AgentId;
use crate::envelope::{RequestFrame, ResponseFrame};
use crate::time_provider::SharedTimeProvider;
use crate::wire::{read_frame, write_frame};

use super::error::AgentError;

type PendingTable = Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<ResponseFrame>>>>;

/// Snapshot of one agent's status as returned by `list_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatusView {
    /// The agent this status describes.
    pub agent_id: AgentId,
    /// Its current lifecycle state, as an upper-case name
    /// (`"REGISTERED"`, `"READY"`, ...).
    pub state: String,
    /// Its declared dependencies.
    pub dependencies: Vec<AgentId>,
    /// Set when `state == "FAILED"`.
    pub failure_reason: Option<String>,
}

/// A connected JSON-RPC client talking the support registry's wire
/// protocol.
#[derive(Clone)]
pub struct SupportClient {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    default_timeout: Duration,
}

impl SupportClient {
    /// Dial `address`, retrying with exponential backoff (capped at 1s)
    /// until `deadline` elapses.
    ///
    /// # Errors
    /// Returns [`AgentError::SupportUnreachable`] if no attempt succeeds
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
                        return Err(AgentError::SupportUnreachable {
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

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame::<ResponseFrame, _>(&mut reader).await {
                    Ok(Some(response)) => {
                        if let Some(sender) = reader_pending.lock().expect("pending table poisoned").remove(&response.id) {
                            let _ = sender.send(response);
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "support connection read failed");
                        break;
                    }
                }
            }
        });

        Self {
            writer: Arc::new(AsyncMutex::new(write_half)),
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            default_timeout: rpc_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending table poisoned").insert(id, tx);

        let request = RequestFrame {
            id,
            method: method.to_string(),
            params,
        };
        {
            let mut writer = self.writer.lock().await;
            if write_frame(&mut *writer, &request).await.is_err() {
                self.pending.lock().expect("pending table poisoned").remove(&id);
                return Err(AgentError::ConnectionLost);
            }
        }

        let response = tokio::time::timeout(timeout.unwrap_or(self.default_timeout), rx)
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

    /// Enter `REGISTERED` and record `dependencies`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails or the connection is lost.
    pub async fn register(&self, agent_id: &AgentId, dependencies: &[AgentId]) -> Result<(), AgentError> {
        self.call(
            "register",
            serde_json::json!({ "agent_id": agent_id, "dependencies": dependencies }),
            None,
        )
        .await?;
        Ok(())
    }

    /// `REGISTERED -> INITIALIZING`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the transition is illegal or the call
    /// fails.
    pub async fn declare_initializing(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.call("declare_initializing", serde_json::json!({ "agent_id": agent_id }), None).await?;
        Ok(())
    }

    /// `INITIALIZING -> READY`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the transition is illegal or the call
    /// fails.
    pub async fn declare_ready(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.call("declare_ready", serde_json::json!({ "agent_id": agent_id }), None).await?;
        Ok(())
    }

    /// `READY -> STOPPING`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the transition is illegal or the call
    /// fails.
    pub async fn declare_stopping(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.call("declare_stopping", serde_json::json!({ "agent_id": agent_id }), None).await?;
        Ok(())
    }

    /// `STOPPING -> STOPPED`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the transition is illegal or the call
    /// fails.
    pub async fn declare_stopped(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        self.call("declare_stopped", serde_json::json!({ "agent_id": agent_id }), None).await?;
        Ok(())
    }

    /// `any -> FAILED`.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the agent is already terminal or the call
    /// fails.
    pub async fn declare_failed(&self, agent_id: &AgentId, reason: &str) -> Result<(), AgentError> {
        self.call(
            "declare_failed",
            serde_json::json!({ "agent_id": agent_id, "reason": reason }),
            None,
        )
        .await?;
        Ok(())
    }

    /// Block until `agent_id` and every transitive dependency is `READY`.
    ///
    /// # Errors
    /// Returns [`AgentError::Rpc`] with `DependencyFailed`'s or
    /// `Timeout`'s detail if readiness can't be reached.
    pub async fn wait_ready(&self, agent_id: &AgentId, timeout: Duration) -> Result<(), AgentError> {
        self.call(
            "wait_ready",
            serde_json::json!({ "agent_id": agent_id, "timeout_ms": timeout.as_millis() as u64 }),
            Some(timeout + Duration::from_secs(1)),
        )
        .await?;
        Ok(())
    }

    /// Snapshot every registered agent's status.
    ///
    /// # Errors
    /// Returns [`AgentError`] if the call fails.
    pub async fn list_status(&self) -> Result<Vec<AgentStatusView>, AgentError> {
        let value = self.call("list_status", Value::Null, None).await?;
        serde_json::from_value(value).map_err(|e| AgentError::Rpc {
            code: crate::envelope::RpcError::INTERNAL,
            message: e.to_string(),
        })
    }
}
