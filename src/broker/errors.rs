//! Broker error taxonomy, grounded on
//! `message_router/traits.rs`'s `RouterError`/`DeliveryError` enum shape.

use thiserror::Error;

use crate::envelope::chunk::ChunkError;
use crate::envelope::EnvelopeError;

/// Errors surfaced by [`super::broker::Broker`]'s methods.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// `send_pipe(_envelope)` on a pipe whose buffer is at capacity.
    #[error("pipe {pipe} is full")]
    PipeFull {
        /// The pipe that rejected the send.
        pipe: String,
    },

    /// `receive_pipe` exceeded its deadline.
    #[error("receive_pipe on {pipe} timed out")]
    Timeout {
        /// The pipe being read.
        pipe: String,
    },

    /// A blocking call was cancelled via the shared cancellation token.
    #[error("operation on {pipe} was cancelled")]
    Cancelled {
        /// The pipe being read.
        pipe: String,
    },

    /// A connection's counterpart has disconnected.
    #[error("client {agent_id} is gone")]
    ClientGone {
        /// The agent whose connection was lost.
        agent_id: String,
    },

    /// An unknown JSON-RPC method was requested.
    #[error("no such method {method}")]
    NoSuchMethod {
        /// The requested method name.
        method: String,
    },

    /// Request params failed to deserialize into the method's expected
    /// shape.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        /// The method whose params were invalid.
        method: String,
        /// Deserialization failure detail.
        reason: String,
    },

    /// `destination` did not parse as `pub:`/`sub:`/`pipe:`.
    #[error("invalid topic expression {destination:?}")]
    InvalidTopicExpression {
        /// The unparseable destination string.
        destination: String,
    },

    /// An envelope's hop count reached `max_hops`.
    #[error(transparent)]
    TooManyHops(#[from] EnvelopeError),

    /// Chunk reassembly failed.
    #[error(transparent)]
    Chunking(#[from] ChunkError),
}
