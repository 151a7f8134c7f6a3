//! Errors surfaced by the agent framework's client connections and
//! `run` driver.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::envelope::chunk::ChunkError;
use crate::support::SupportError;

/// Errors an agent binary may observe while running.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Reading `AGEN_*` environment variables failed.
    #[error(transparent)]
    Env(#[from] super::env::AgentEnvError),

    /// The broker connection could not be established.
    #[error("broker unreachable at {address}: {source}")]
    BrokerUnreachable {
        /// The address that was dialed.
        address: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The support registry connection could not be established.
    #[error("support registry unreachable at {address}: {source}")]
    SupportUnreachable {
        /// The address that was dialed.
        address: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The broker connection was lost mid-operation.
    #[error("broker connection lost")]
    ConnectionLost,

    /// A JSON-RPC call returned an application error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// The reserved/application error code.
        code: i32,
        /// Human-readable detail.
        message: String,
    },

    /// A broker-side routing error surfaced through the wire protocol.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A support-registry error surfaced through the wire protocol.
    #[error(transparent)]
    Support(#[from] SupportError),

    /// A chunk group's deadline elapsed before it completed.
    #[error("chunk group {group_id} timed out waiting for {have}/{need} chunks")]
    ChunkTimeout {
        /// The incomplete group's id.
        group_id: String,
        /// Chunks actually received.
        have: usize,
        /// Chunks the group declared.
        need: usize,
    },

    /// Chunk reassembly failed for reasons other than a timeout.
    #[error(transparent)]
    Chunking(#[from] ChunkError),

    /// `Init`, `ProcessMessage`, or `Cleanup` returned an application
    /// error.
    #[error("agent error: {0}")]
    Capability(String),
}

impl AgentError {
    /// Maps this error onto the process exit code spec.md §6.4 assigns an
    /// agent binary: `2` for a broker it could never reach, `1` for any
    /// other startup/runtime failure. `0` (normal exit) and `3` (declared
    /// `FAILED` mid-operation) are not representable as an `AgentError` —
    /// they are returned directly by the caller around [`super::runtime::run`].
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BrokerUnreachable { .. } | Self::SupportUnreachable { .. } | Self::ConnectionLost => 2,
            _ => 1,
        }
    }
}
