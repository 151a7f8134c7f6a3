//! TCP accept loop: one reader task per connection, concurrent per-request
//! handler tasks feeding a single bounded outbound channel that one writer
//! task drains — the reader/writer-pair-with-cancellation model spec.md §9
//! calls for in place of unbounded per-message tasks.
//!
//! Grounded on `src/server.rs`'s accept/serve structure, adapted from HTTP
//! to raw newline-delimited-JSON TCP.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::broker::Broker;
use crate::broker::errors::BrokerError;
use crate::domain_types::AgentId;
use crate::envelope::{Envelope, Frame, RequestFrame, ResponseFrame, RpcError, SimpleMessage};
use crate::wire::{read_frame, write_frame};

/// Serves the broker's wire protocol on a bound TCP listener until
/// cancelled.
#[derive(Debug, Clone)]
pub struct BrokerServer {
    broker: Broker,
    cancellation: CancellationToken,
}

impl BrokerServer {
    /// Build a server wrapping `broker`, cancelled via `cancellation`.
    #[must_use]
    pub fn new(broker: Broker, cancellation: CancellationToken) -> Self {
        Self { broker, cancellation }
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
                    let broker = self.broker.clone();
                    let cancellation = self.cancellation.clone();
                    tokio::spawn(async move {
                        if let Err(error) = handle_connection(stream, broker, cancellation).await {
                            warn!(%peer, %error, "broker connection ended");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    broker: Broker,
    cancellation: CancellationToken,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);
    let agent_id: Arc<AsyncMutex<Option<AgentId>>> = Arc::new(AsyncMutex::new(None));

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            frame = read_frame::<Frame, _>(&mut reader) => {
                match frame {
                    Ok(Some(Frame::Request(request))) => {
                        let broker = broker.clone();
                        let outbound_tx = outbound_tx.clone();
                        let agent_id = agent_id.clone();
                        let sender = outbound_tx.clone();
                        tokio::spawn(async move {
                            let response = dispatch(&broker, &agent_id, &sender, &request).await;
                            let _ = outbound_tx.send(Frame::Response(response)).await;
                        });
                    }
                    Ok(Some(_)) => {
                        warn!("client sent a non-request frame, ignoring");
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "malformed frame, dropping connection");
                        break;
                    }
                }
            }
        }
    }

    if let Some(id) = agent_id.lock().await.take() {
        info!(agent_id = %id, "client gone");
        broker.disconnect(&id).await;
    }
    drop(outbound_tx);
    let _ = writer_task.await;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    agent_id: AgentId,
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    topic: String,
    message: SimpleMessage,
}

#[derive(Debug, Deserialize)]
struct PublishEnvelopeParams {
    topic: String,
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    topic: String,
}

#[derive(Debug, Deserialize)]
struct SendPipeParams {
    pipe: String,
    message: SimpleMessage,
}

#[derive(Debug, Deserialize)]
struct SendPipeEnvelopeParams {
    pipe: String,
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct ReceivePipeParams {
    pipe: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

async fn dispatch(
    broker: &Broker,
    agent_id: &Arc<AsyncMutex<Option<AgentId>>>,
    sender: &mpsc::Sender<Frame>,
    request: &RequestFrame,
) -> ResponseFrame {
    match handle_method(broker, agent_id, sender, request).await {
        Ok(result) => ResponseFrame {
            id: request.id,
            result: Some(result),
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
    broker: &Broker,
    agent_id: &Arc<AsyncMutex<Option<AgentId>>>,
    sender: &mpsc::Sender<Frame>,
    request: &RequestFrame,
) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "connect" => {
            let params: ConnectParams = parse_params(&request.params)?;
            *agent_id.lock().await = Some(params.agent_id.clone());
            broker.connect(params.agent_id, sender.clone()).await;
            Ok(Value::Null)
        }
        "publish" => {
            let params: PublishParams = parse_params(&request.params)?;
            broker.publish(&params.topic, params.message).await;
            Ok(Value::Null)
        }
        "publish_envelope" => {
            let params: PublishEnvelopeParams = parse_params(&request.params)?;
            broker
                .publish_envelope(&params.topic, params.envelope)
                .await
                .map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "subscribe" => {
            let params: SubscribeParams = parse_params(&request.params)?;
            let Some(id) = agent_id.lock().await.clone() else {
                return Err(RpcError::new(RpcError::INVALID_PARAMS, "subscribe before connect"));
            };
            broker.subscribe(&params.topic, id).await;
            Ok(Value::Null)
        }
        "send_pipe" => {
            let params: SendPipeParams = parse_params(&request.params)?;
            broker.send_pipe(&params.pipe, params.message).await.map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "send_pipe_envelope" => {
            let params: SendPipeEnvelopeParams = parse_params(&request.params)?;
            broker
                .send_pipe_envelope(&params.pipe, params.envelope)
                .await
                .map_err(to_rpc_error)?;
            Ok(Value::Null)
        }
        "receive_pipe" => {
            let params: ReceivePipeParams = parse_params(&request.params)?;
            let frame = broker
                .receive_pipe(&params.pipe, params.timeout_ms)
                .await
                .map_err(to_rpc_error)?;
            serde_json::to_value(frame).map_err(|e| RpcError::new(RpcError::INTERNAL, e.to_string()))
        }
        other => Err(RpcError::new(RpcError::METHOD_NOT_FOUND, format!("no such method {other:?}"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    serde_json::from_value(params.clone()).map_err(|e| RpcError::new(RpcError::INVALID_PARAMS, e.to_string()))
}

fn to_rpc_error(error: BrokerError) -> RpcError {
    match error {
        BrokerError::PipeFull { .. } => RpcError::new(RpcError::PIPE_FULL, error.to_string()),
        BrokerError::Timeout { .. } => RpcError::new(RpcError::TIMEOUT, error.to_string()),
        BrokerError::ClientGone { .. } => RpcError::new(RpcError::CLIENT_GONE, error.to_string()),
        BrokerError::NoSuchMethod { .. } => RpcError::new(RpcError::METHOD_NOT_FOUND, error.to_string()),
        BrokerError::InvalidParams { .. } | BrokerError::InvalidTopicExpression { .. } => {
            RpcError::new(RpcError::INVALID_PARAMS, error.to_string())
        }
        BrokerError::TooManyHops(_) | BrokerError::Chunking(_) | BrokerError::Cancelled { .. } => {
            RpcError::new(RpcError::INTERNAL, error.to_string())
        }
    }
}
