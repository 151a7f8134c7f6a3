//! Errors surfaced by the support registry.

use thiserror::Error;

use crate::domain_types::AgentId;
use crate::support::lifecycle::IllegalTransition;

/// Errors from [`super::registry::SupportRegistry`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupportError {
    /// An illegal lifecycle transition was attempted.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// The cell's dependency graph contains a cycle.
    #[error("dependency cycle detected involving {agent_id}")]
    CyclicDependency {
        /// An agent participating in the cycle.
        agent_id: AgentId,
    },

    /// `wait_ready` returned because a transitive dependency failed.
    #[error("dependency {dependency} of {agent_id} failed")]
    DependencyFailed {
        /// The agent whose wait was unblocked by a failure.
        agent_id: AgentId,
        /// The dependency that failed.
        dependency: AgentId,
    },

    /// `wait_ready` exceeded its deadline.
    #[error("wait_ready for {agent_id} timed out")]
    Timeout {
        /// The agent whose wait timed out.
        agent_id: AgentId,
    },

    /// `wait_ready` was cancelled via the shared cancellation token.
    #[error("wait_ready for {agent_id} was cancelled")]
    Cancelled {
        /// The agent whose wait was cancelled.
        agent_id: AgentId,
    },

    /// The referenced agent was never registered.
    #[error("no such agent {agent_id}")]
    NoSuchAgent {
        /// The unknown agent id.
        agent_id: AgentId,
    },
}
