//! Structured lifecycle telemetry and the `tracing_subscriber` init helper.
//!
//! Grounded on the teacher's `src/observability.rs::AgentEvent`/
//! `AgentEventType` (a structured event enum keyed on state transitions),
//! adapted from the teacher's WASM `AgentState`/`FipaMessage` vocabulary to
//! spec.md §3's `AgentLifecycleState` transitions and envelope routing, and
//! on `src/main.rs`'s `tracing_subscriber::fmt().with_env_filter(...)`
//! init call.

use serde::{Deserialize, Serialize};

use crate::domain_types::AgentId;
use crate::support::AgentLifecycleState;

/// A structured lifecycle transition or routing drop, emitted alongside
/// the `tracing` spans each subsystem already logs, for consumers that
/// want typed events rather than parsed log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEventType {
    /// An agent moved from one lifecycle state to another.
    StateChange {
        /// The state before the transition.
        from: AgentLifecycleState,
        /// The state after the transition.
        to: AgentLifecycleState,
    },
    /// An envelope delivery was dropped (full subscriber channel, dead
    /// client, or an exhausted hop count).
    DeliveryDropped {
        /// Why the delivery was dropped.
        reason: String,
    },
    /// The agent's process exited unexpectedly and was declared `FAILED`.
    Crashed(String),
}

/// One structured event about a single agent, for observability sinks
/// that want more than `tracing`'s text/JSON log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// The agent this event concerns.
    pub agent_id: AgentId,
    /// Wall-clock time the event was recorded.
    pub timestamp: std::time::SystemTime,
    /// What happened.
    pub event_type: AgentEventType,
    /// Correlation id, if this event was produced while handling a
    /// specific envelope or request.
    pub trace_id: Option<String>,
}

impl AgentEvent {
    /// Build a `StateChange` event timestamped `now`.
    #[must_use]
    pub fn state_change(agent_id: AgentId, from: AgentLifecycleState, to: AgentLifecycleState) -> Self {
        Self {
            agent_id,
            timestamp: std::time::SystemTime::now(),
            event_type: AgentEventType::StateChange { from, to },
            trace_id: None,
        }
    }
}

/// Output shape for [`init_tracing`]'s formatter, selected by the
/// orchestrator binary's `--log-format` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Text,
    /// One JSON object per event, for log aggregators.
    Json,
}

/// Install a `tracing_subscriber` formatter reading its filter from
/// `RUST_LOG`, defaulting to `agen=info` when unset.
///
/// # Errors
/// Returns an error if the default directive fails to parse, which would
/// only happen if the literal default itself were malformed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("agen=info".parse()?);
    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_change_event_carries_both_states() {
        let agent_id = AgentId::try_new("ner").unwrap();
        let event = AgentEvent::state_change(agent_id, AgentLifecycleState::Registered, AgentLifecycleState::Initializing);
        assert!(matches!(
            event.event_type,
            AgentEventType::StateChange {
                from: AgentLifecycleState::Registered,
                to: AgentLifecycleState::Initializing,
            }
        ));
    }
}
