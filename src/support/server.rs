//! Wire-exposed support protocol: `register`, `declare_*`, `wait_ready`,
//! `list_status`, served over the same newline-delimited JSON framing the
//! broker uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain_types::AgentId;
use crate::envelope::{RequestFrame, ResponseFrame, RpcError};
use crate::support::errors::SupportError;
use crate::support::registry::SupportRegistry;
use crate::wire::{read_frame, write_frame};

/// Serves the support registry's wire protocol on a bound TCP listener.
#[derive(Debug, Clone)]
pub struct SupportServer {
    registry: SupportRegistry,
    cancellation: CancellationToken,
}

impl SupportServer {
    /// Build a server wrapping `registry`, cancelled via `cancellation`.
    #[must_use]
    pub fn new(registry: SupportRegistry, cancellation: CancellationToken) -> Self {
        Self { registry, cancellation }
    }

    /// Accept connections until cancelled.
    ///
    /// # Errors
    /// Returns an error if `accept` fails fatally.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                () = self.cancellation.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let registry = self.registry.clone();
                    let cancellation = self.cancellation.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        let mut reader = BufReader::new(reader);
                        let mut writer = writer;
                        if let Err(error) = handle_connection(&mut reader, &mut writer, &registry, &cancellation).await {
                            warn!(%peer, %error, "support connection ended");
                        }
                    });
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterParams {
    agent_id: AgentId,
    #[serde(default)]
    dependencies: Vec<AgentId>,
}

#[derive(Debug, Deserialize)]
struct AgentIdParams {
    agent_id: AgentId,
}

#[derive(Debug, Deserialize)]
struct DeclareFailedParams {
    agent_id: AgentId,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct WaitReadyParams {
    agent_id: AgentId,
    #[serde(default = "default_wait_timeout_ms")]
    timeout_ms: u64,
}

fn default_wait_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Serialize)]
struct StatusEntry {
    agent_id: AgentId,
    state: String,
    dependencies: Vec<AgentId>,
    failure_reason: Option<String>,
}

async fn handle_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    registry: &SupportRegistry,
    cancellation: &CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(request) = read_frame::<RequestFrame, _>(reader).await? {
        let response = dispatch(registry, cancellation, &request).await;
        write_frame(writer, &response).await?;
    }
    Ok(())
}

async fn dispatch(registry: &SupportRegistry, cancellation: &CancellationToken, request: &RequestFrame) -> ResponseFrame {
    let result = handle_method(registry, cancellation, request).await;
    match result {
        Ok(value) => ResponseFrame {
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(error) => ResponseFrame {
            id: request.id,
            result: None,
            error: Some(error),
        },
    }
}

async fn handle_method(
    registry: &SupportRegistry,
    cancellation: &CancellationToken,
    request: &RequestFrame,
) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "register" => {
            let params: RegisterParams = parse_params(&request.params)?;
            info!(agent_id = %params.agent_id, "register");
            registry.register(params.agent_id, params.dependencies).await;
            Ok(Value::Null)
        }
        "declare_initializing" => {
            let params: AgentIdParams = parse_params(&request.params)?;
            registry.declare_initializing(&params.agent_id).await.map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "declare_ready" => {
            let params: AgentIdParams = parse_params(&request.params)?;
            registry.declare_ready(&params.agent_id).await.map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "declare_stopping" => {
            let params: AgentIdParams = parse_params(&request.params)?;
            registry.declare_stopping(&params.agent_id).await.map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "declare_failed" => {
            let params: DeclareFailedParams = parse_params(&request.params)?;
            registry
                .declare_failed(&params.agent_id, params.reason)
                .await
                .map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "wait_ready" => {
            let params: WaitReadyParams = parse_params(&request.params)?;
            registry
                .wait_ready(&params.agent_id, Duration::from_millis(params.timeout_ms), cancellation)
                .await
                .map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "list_status" => {
            let statuses = registry.list_status().await;
            let entries: Vec<StatusEntry> = statuses
                .into_iter()
                .map(|s| StatusEntry {
                    agent_id: s.agent_id,
                    state: s.state.to_string(),
                    dependencies: s.dependencies,
                    failure_reason: s.failure_reason,
                })
                .collect();
            serde_json::to_value(entries).map_err(|e| RpcError::new(RpcError::INTERNAL, e.to_string()))
        }
        other => Err(RpcError::new(RpcError::METHOD_NOT_FOUND, format!("no such method {other:?}"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    serde_json::from_value(params.clone()).map_err(|e| RpcError::new(RpcError::INVALID_PARAMS, e.to_string()))
}

fn to_rpc_error(error: SupportError) -> RpcError {
    match error {
        SupportError::Timeout { .. } => RpcError::new(RpcError::TIMEOUT, error.to_string()),
        _ => RpcError::new(RpcError::INTERNAL, error.to_string()),
    }
}
