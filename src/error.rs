//! Top-level error type aggregating every subsystem's error enum.
//!
//! Grounded on the teacher's `src/error.rs::CaxtonError`: one `thiserror`
//! enum with an `#[from]` variant per subordinate error type, so callers
//! crossing subsystem boundaries (the orchestrator binary, integration
//! tests) can use a single `?`-friendly error.

use thiserror::Error;

use crate::agent::AgentError;
use crate::broker::BrokerError;
use crate::envelope::EnvelopeError;
use crate::envelope::chunk::ChunkError;
use crate::orchestrator::error::OrchestratorError;
use crate::support::SupportError;

/// Umbrella error for anything that can go wrong running AGEN end to end.
#[derive(Debug, Error)]
pub enum AgenError {
    /// A broker routing or transport error.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A support registry lifecycle or dependency error.
    #[error(transparent)]
    Support(#[from] SupportError),

    /// An agent framework client/dispatch error.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// An orchestrator config-load, validation, or supervision error.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// An envelope construction or forwarding error.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A chunk group failed to reassemble.
    #[error(transparent)]
    Chunking(#[from] ChunkError),
}
