//! `Capability` trait and the `run` driver implementing spec.md §4.4's
//! agent framework: connect, subscribe/poll, dispatch, chunk-collect,
//! reply, and teardown.
//!
//! Grounded on `agent_lifecycle_manager.rs`'s
//! `#[tracing::instrument]` + `tokio::time::timeout`-wrapped component-call
//! idiom in the teacher, and `runtime.rs::CaxtonRuntime`'s config-struct
//! shape (its method bodies are stubs there and are not reused, only the
//! struct/config shape).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::broker::domain_types::Destination;
use crate::domain_types::MessageType;
use crate::envelope::{Envelope, Frame, RpcError, SimpleMessage};
use crate::time_provider::{production_time_provider, SharedTimeProvider};

use super::chunk_collector::{ChunkCollector, DepositOutcome, DEFAULT_CHUNK_TIMEOUT};
use super::client::BrokerClient;
use super::env::AgentEnv;
use super::error::AgentError;
use super::support_client::SupportClient;

/// Header key an inbound envelope carries when the sender expects a
/// request/reply correlation. Not one of the five reserved chunk headers;
/// its presence controls the framework's error policy (spec.md §4.4/§7).
pub const HEADER_REPLY_TO: &str = "reply_to";

/// Default timeout waiting for broker/support TCP connections to succeed.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval a pipe-ingress agent polls `receive_pipe` at.
pub const DEFAULT_PIPE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared handles an agent's [`Capability`] implementation uses to talk to
/// the broker and support registry, plus its own environment.
#[derive(Clone)]
pub struct CapabilityContext {
    /// This agent's environment, as read from `AGEN_*` variables.
    pub env: AgentEnv,
    /// The broker connection.
    pub broker: BrokerClient,
    /// The support registry connection.
    pub support: SupportClient,
}

/// The capability set every agent binary implements: `Init`,
/// `ProcessMessage`, `Cleanup`.
#[async_trait]
pub trait Capability: Send {
    /// Called once after the framework has connected and registered, and
    /// before readiness is declared.
    ///
    /// # Errors
    /// Any error here is surfaced via `declare_failed` and aborts startup.
    async fn init(&mut self, ctx: &CapabilityContext) -> Result<(), AgentError>;

    /// Called once per inbound message (already reassembled if it arrived
    /// chunked). Returning `Ok(Some(reply))` publishes `reply` on the
    /// configured egress; `Ok(None)` means this message produced no reply.
    ///
    /// # Errors
    /// An error here becomes a structured error reply if the inbound
    /// envelope carried [`HEADER_REPLY_TO`], or is logged and dropped
    /// otherwise. It never aborts the agent.
    async fn process_message(&mut self, message: Envelope, ctx: &CapabilityContext) -> Result<Option<Envelope>, AgentError>;

    /// Called once during graceful shutdown, before declaring `STOPPING`.
    async fn cleanup(&mut self, ctx: &CapabilityContext);
}

/// Run `capability` to completion: connect, register readiness, dispatch
/// inbound messages until shutdown, then tear down.
///
/// # Errors
/// Returns [`AgentError`] if dialing the broker/support fails, or if
/// `capability.init` fails (after declaring `FAILED`).
#[instrument(skip(capability, env), fields(agent_id = %env.agent_id))]
pub async fn run<C: Capability>(mut capability: C, env: AgentEnv) -> Result<(), AgentError> {
    let time_provider = production_time_provider();
    let broker = BrokerClient::dial(&env.broker_address, DEFAULT_DIAL_TIMEOUT, DEFAULT_DIAL_TIMEOUT, &time_provider).await?;
    broker.connect(&env.agent_id).await?;
    let support =
        SupportClient::dial(&env.support_address, DEFAULT_DIAL_TIMEOUT, DEFAULT_DIAL_TIMEOUT, &time_provider).await?;

    let ctx = CapabilityContext {
        env: env.clone(),
        broker: broker.clone(),
        support: support.clone(),
    };

    support.register(&env.agent_id, &env.dependencies).await?;
    support.declare_initializing(&env.agent_id).await?;
    if let Err(error) = capability.init(&ctx).await {
        let _ = support.declare_failed(&env.agent_id, error.to_string()).await;
        return Err(error);
    }
    support.declare_ready(&env.agent_id).await?;
    info!("agent ready");

    let ingress = Destination::parse(&env.ingress).unwrap_or_else(|| Destination::Topic(env.ingress.clone()));
    let egress = Destination::parse(&env.egress).unwrap_or_else(|| Destination::Topic(env.egress.clone()));
    if let Destination::Topic(topic) = &ingress {
        broker.subscribe(topic).await?;
    }

    let mut inbound = spawn_ingress_task(broker.clone(), ingress, DEFAULT_PIPE_POLL_INTERVAL);
    let mut collector = ChunkCollector::new(DEFAULT_CHUNK_TIMEOUT);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let sleep_for = collector
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        tokio::select! {
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
            maybe_frame = inbound.recv() => {
                match maybe_frame {
                    Some(Frame::Envelope(boxed)) => {
                        handle_inbound_envelope(*boxed, &mut capability, &ctx, &egress, &mut collector).await;
                    }
                    Some(Frame::Simple(_)) => {
                        warn!("dropping simple message on envelope-dispatch ingress");
                    }
                    Some(_) => {}
                    None => {
                        warn!("ingress channel closed, shutting down");
                        break;
                    }
                }
            }
            () = time_provider.sleep(sleep_for) => {
                for expired in collector.sweep_expired(Instant::now()) {
                    warn!(
                        group_id = %expired.group_id,
                        have = expired.have,
                        need = expired.need,
                        "chunk group timed out"
                    );
                    if let Some(reply_to) = &expired.reply_to {
                        let error = AgentError::ChunkTimeout {
                            group_id: expired.group_id,
                            have: expired.have,
                            need: expired.need,
                        };
                        let error_envelope = build_error_envelope(&ctx.env.agent_id, reply_to, &error);
                        if let Err(publish_error) = publish_to_egress(&ctx.broker, &egress, error_envelope).await {
                            error!(%publish_error, "failed to publish chunk-timeout reply on egress");
                        }
                    }
                }
            }
        }
    }

    capability.cleanup(&ctx).await;
    let _ = support.declare_stopping(&env.agent_id).await;
    let _ = support.declare_stopped(&env.agent_id).await;
    Ok(())
}

/// Runs `capability` to completion and terminates the process with the
/// exit code spec.md §6.4 assigns: `0` on a clean shutdown, or
/// [`AgentError::exit_code`] on failure. Concrete agent binaries call this
/// from their own `main` instead of matching on [`run`]'s result by hand.
pub async fn run_process<C: Capability>(capability: C, env: AgentEnv) -> ! {
    match run(capability, env).await {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            error!(%error, "agent exiting with error");
            std::process::exit(error.exit_code());
        }
    }
}

fn spawn_ingress_task(broker: BrokerClient, ingress: Destination, poll_interval: Duration) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        match ingress {
            Destination::Topic(_) => {
                while let Some(frame) = broker.recv().await {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            Destination::Pipe(name) => loop {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = poll_interval.as_millis() as u64;
                match broker.receive_pipe(&name, Some(timeout_ms)).await {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(AgentError::Rpc { code, .. }) if code == RpcError::TIMEOUT => {}
                    Err(error) => {
                        warn!(%error, "pipe ingress stopped");
                        break;
                    }
                }
            },
        }
    });
    rx
}

async fn handle_inbound_envelope<C: Capability>(
    envelope: Envelope,
    capability: &mut C,
    ctx: &CapabilityContext,
    egress: &Destination,
    collector: &mut ChunkCollector,
) {
    let outcome = match collector.deposit(envelope, Instant::now()) {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(%error, "chunk group reassembly failed");
            return;
        }
    };

    let ready = match outcome {
        DepositOutcome::NotChunked(envelope) | DepositOutcome::Complete(envelope) => envelope,
        DepositOutcome::Pending => return,
    };

    let reply_to = ready.headers.get(HEADER_REPLY_TO).cloned();

    match capability.process_message(ready, ctx).await {
        Ok(Some(reply)) => {
            if let Err(error) = publish_to_egress(&ctx.broker, egress, reply).await {
                error!(%error, "failed to publish reply on egress");
            }
        }
        Ok(None) => {}
        Err(error) => {
            error!(%error, "process_message returned an error");
            if let Some(reply_to) = reply_to {
                let error_envelope = build_error_envelope(&ctx.env.agent_id, &reply_to, &error);
                if let Err(publish_error) = publish_to_egress(&ctx.broker, egress, error_envelope).await {
                    error!(%publish_error, "failed to publish error reply on egress");
                }
            }
        }
    }
}

async fn publish_to_egress(broker: &BrokerClient, egress: &Destination, envelope: Envelope) -> Result<(), AgentError> {
    match egress {
        Destination::Topic(topic) => broker.publish_envelope(topic, envelope).await,
        Destination::Pipe(name) => broker.send_pipe_envelope(name, envelope).await,
    }
}

fn build_error_envelope(source: &crate::domain_types::AgentId, reply_to: &str, error: &AgentError) -> Envelope {
    let mut envelope = Envelope::new(
        source.clone(),
        reply_to.to_string(),
        MessageType::try_new("error").unwrap_or_else(|_| MessageType::try_new("err").unwrap()),
        Value::String(error.to_string()),
    );
    envelope.headers.insert("in_reply_to".to_string(), reply_to.to_string());
    envelope
}

/// A trivial simple-message helper used by agents that don't need the
/// full envelope shape for fire-and-forget publishes.
#[must_use]
pub fn simple(message_type: &str, target: &str, payload: Value) -> SimpleMessage {
    SimpleMessage::new(
        MessageType::try_new(message_type).unwrap_or_else(|_| MessageType::try_new("message").unwrap()),
        target,
        payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;

    #[test]
    fn chunk_timeout_error_envelope_carries_in_reply_to_and_group_detail() {
        let source = AgentId::try_new("a").unwrap();
        let error = AgentError::ChunkTimeout {
            group_id: "g1".to_string(),
            have: 2,
            need: 3,
        };
        let envelope = build_error_envelope(&source, "req-1", &error);
        assert_eq!(envelope.headers.get("in_reply_to"), Some(&"req-1".to_string()));
        assert_eq!(
            envelope.payload,
            Value::String("chunk group g1 timed out waiting for 2/3 chunks".to_string())
        );
    }

    #[test]
    fn error_envelope_carries_in_reply_to() {
        let source = AgentId::try_new("a").unwrap();
        let error = AgentError::Capability("boom".to_string());
        let envelope = build_error_envelope(&source, "req-1", &error);
        assert_eq!(envelope.headers.get("in_reply_to"), Some(&"req-1".to_string()));
        assert_eq!(envelope.payload, Value::String("agent error: boom".to_string()));
    }
}
