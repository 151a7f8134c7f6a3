//! Errors raised while loading, validating, and running an orchestrator.

use thiserror::Error;

use crate::domain_types::AgentId;
use crate::support::SupportError;

/// Errors surfaced by [`super::config::OrchestratorConfig`] loading and
/// validation, and by [`super::orchestrator::Orchestrator::run`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A config file failed to read or parse.
    #[error("failed to load config from {path}: {source}")]
    ConfigLoad {
        /// The file that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file's YAML failed to deserialize.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        /// The file that failed to parse.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A cell agent names a pool entry that does not exist.
    #[error("cell agent {agent_id} references unknown agent type {agent_type:?}")]
    UnknownAgentType {
        /// The agent instance with the bad reference.
        agent_id: AgentId,
        /// The unresolvable type name.
        agent_type: String,
    },

    /// A `spawn`/`call` pool entry has no (or a nonexistent) binary path.
    #[error("agent type {agent_type:?} has no usable binary at {path:?}")]
    MissingBinary {
        /// The pool entry missing a binary.
        agent_type: String,
        /// The path that was checked, if any was configured.
        path: Option<String>,
    },

    /// A cell's dependency graph contains a cycle.
    #[error(transparent)]
    CyclicDependency(#[from] SupportError),

    /// An `await` agent did not register within `await_timeout_seconds`.
    #[error("agent {agent_id} did not register within the await timeout")]
    AwaitTimeout {
        /// The agent that never registered.
        agent_id: AgentId,
    },

    /// A `spawn`/`call` process could not be launched.
    #[error("failed to launch {agent_id} ({binary}): {source}")]
    SpawnFailed {
        /// The agent instance that failed to launch.
        agent_id: AgentId,
        /// The binary path that was executed.
        binary: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `call` agent's process exited non-zero.
    #[error("call agent {agent_id} exited with status {status}")]
    CallFailed {
        /// The agent instance that failed.
        agent_id: AgentId,
        /// The process's exit status, in prose.
        status: String,
    },

    /// The broker, support, or admin listener failed to bind.
    #[error("failed to bind {component} on port {port}: {source}")]
    BindFailed {
        /// `"broker"`, `"support"`, or `"admin"`.
        component: &'static str,
        /// The port that failed to bind.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
