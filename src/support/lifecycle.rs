//! The agent lifecycle state machine.
//!
//! Grounded on the teacher's `domain::agent_lifecycle::AgentLifecycleState`,
//! renamed to spec's exact state names and transition table: `Registered
//! -> Initializing -> Ready -> Stopping -> Stopped`, with `Failed` absorbing
//! from any non-terminal state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::AgentId;

/// State of an agent as tracked by the support registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentLifecycleState {
    /// `register` has been called; the agent has not yet called `Init`.
    Registered,
    /// The agent is running `Init`.
    Initializing,
    /// `Init` succeeded and the agent is serving its ingress.
    Ready,
    /// The agent has begun graceful shutdown.
    Stopping,
    /// The agent has exited cleanly.
    Stopped,
    /// The agent failed, either by explicit declaration or unexpected exit.
    Failed,
}

impl AgentLifecycleState {
    /// Legal next states from this one.
    #[must_use]
    pub fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Registered => &[Self::Initializing, Self::Failed],
            Self::Initializing => &[Self::Ready, Self::Failed],
            Self::Ready => &[Self::Stopping, Self::Failed],
            Self::Stopping => &[Self::Stopped, Self::Failed],
            Self::Stopped | Self::Failed => &[],
        }
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// `true` for `Stopped`/`Failed`: no further transitions are legal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// `true` once the agent has reported `Ready`.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Registered => "REGISTERED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// An illegal lifecycle transition was attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition for {agent_id}: {from} -> {to}")]
pub struct IllegalTransition {
    /// The agent whose transition was rejected.
    pub agent_id: AgentId,
    /// The state it was in.
    pub from: AgentLifecycleState,
    /// The state it tried to move to.
    pub to: AgentLifecycleState,
}

/// A single agent's lifecycle record, as tracked by the support registry.
#[derive(Debug, Clone)]
pub struct AgentLifecycle {
    /// The agent this record tracks.
    pub agent_id: AgentId,
    /// Agents this one depends on.
    pub dependencies: Vec<AgentId>,
    /// Current state.
    pub state: AgentLifecycleState,
    /// State before the most recent transition, for diagnostics.
    pub previous_state: Option<AgentLifecycleState>,
    /// Set when `state == Failed`.
    pub failure_reason: Option<String>,
}

impl AgentLifecycle {
    /// A freshly `Registered` lifecycle record.
    #[must_use]
    pub fn new(agent_id: AgentId, dependencies: Vec<AgentId>) -> Self {
        Self {
            agent_id,
            dependencies,
            state: AgentLifecycleState::Registered,
            previous_state: None,
            failure_reason: None,
        }
    }

    /// Attempt `self.state -> next`.
    ///
    /// # Errors
    /// Returns [`IllegalTransition`] if the transition isn't legal.
    pub fn transition_to(&mut self, next: AgentLifecycleState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                agent_id: self.agent_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.previous_state = Some(self.state);
        self.state = next;
        Ok(())
    }

    /// Force `state -> Failed` with a reason, bypassing the normal
    /// transition check since `Failed` is absorbing from any non-terminal
    /// state.
    ///
    /// # Errors
    /// Returns [`IllegalTransition`] if the record is already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), IllegalTransition> {
        if self.state.is_terminal() {
            return Err(IllegalTransition {
                agent_id: self.agent_id.clone(),
                from: self.state,
                to: AgentLifecycleState::Failed,
            });
        }
        self.previous_state = Some(self.state);
        self.state = AgentLifecycleState::Failed;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> AgentLifecycle {
        AgentLifecycle::new(AgentId::try_new("a").unwrap(), vec![])
    }

    #[test]
    fn happy_path_transitions_in_order() {
        let mut lc = lifecycle();
        lc.transition_to(AgentLifecycleState::Initializing).unwrap();
        lc.transition_to(AgentLifecycleState::Ready).unwrap();
        lc.transition_to(AgentLifecycleState::Stopping).unwrap();
        lc.transition_to(AgentLifecycleState::Stopped).unwrap();
        assert_eq!(lc.state, AgentLifecycleState::Stopped);
    }

    #[test]
    fn ready_to_initializing_is_illegal() {
        let mut lc = lifecycle();
        lc.transition_to(AgentLifecycleState::Initializing).unwrap();
        lc.transition_to(AgentLifecycleState::Ready).unwrap();
        assert!(lc.transition_to(AgentLifecycleState::Initializing).is_err());
    }

    #[test]
    fn failed_is_absorbing_from_any_non_terminal_state() {
        for start in [
            AgentLifecycleState::Registered,
            AgentLifecycleState::Initializing,
            AgentLifecycleState::Ready,
            AgentLifecycleState::Stopping,
        ] {
            let mut lc = lifecycle();
            lc.state = start;
            lc.fail("crashed").unwrap();
            assert_eq!(lc.state, AgentLifecycleState::Failed);
        }
    }

    #[test]
    fn no_transitions_out_of_terminal_states() {
        let mut lc = lifecycle();
        lc.state = AgentLifecycleState::Stopped;
        assert!(lc.transition_to(AgentLifecycleState::Ready).is_err());
        assert!(lc.fail("x").is_err());
    }
}
