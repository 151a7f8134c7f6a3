//! The typed message record carrying routing metadata, payload, and chunk
//! headers, plus its legacy sibling [`SimpleMessage`] and the tagged wire
//! frame [`Frame`] both ride inside.

pub mod budget;
pub mod chunk;

use std::collections::HashMap;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain_types::{AgentId, MessageType};

/// Default loop guard: an envelope whose `hop_count` reaches this is
/// dropped rather than forwarded.
pub const DEFAULT_MAX_HOPS: u32 = 32;

/// Header key for the shared id of a chunk group.
pub const HEADER_CHUNK_ID: &str = "X-Chunk-Id";
/// Header key for a chunk's 0-based position within its group.
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";
/// Header key for the total number of chunks in a group.
pub const HEADER_CHUNK_TOTAL: &str = "X-Chunk-Total";
/// Header key for the id of the envelope that was split.
pub const HEADER_ORIGINAL_ID: &str = "X-Original-Id";
/// Header key for the strategy used to split the payload.
pub const HEADER_CHUNK_STRATEGY: &str = "X-Chunk-Strategy";

/// Globally unique envelope identifier. Never changes after creation.
#[nutype(derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef))]
pub struct EnvelopeId(String);

impl EnvelopeId {
    /// Generate a fresh, random envelope id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

/// Errors produced while constructing or forwarding an envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `add_hop` was called when `hop_count` already equals `max_hops`.
    #[error("envelope {id} exceeded max_hops ({max_hops})")]
    TooManyHops {
        /// The envelope that was about to be forwarded past its hop limit.
        id: EnvelopeId,
        /// The configured loop guard.
        max_hops: u32,
    },
}

/// Strategy used to split an oversized payload into chunks, and to
/// reassemble it on merge. Mirrored in the `X-Chunk-Strategy` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    /// Payload is a JSON array; split on element boundaries.
    JsonArray,
    /// Payload is text; split on paragraph, then sentence, then hard cut.
    Text,
    /// Payload is opaque bytes; split into fixed-size windows.
    Binary,
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::JsonArray => "json-array",
            Self::Text => "text",
            Self::Binary => "binary",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json-array" => Ok(Self::JsonArray),
            "text" => Ok(Self::Text),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown chunk strategy {other:?}")),
        }
    }
}

/// Immutable-after-send message record.
///
/// `id` never changes after creation. `route.len() == hop_count as usize`.
/// If any `X-Chunk-*` header is present, all four chunk headers must be
/// present and consistent, and `0 <= X-Chunk-Index < X-Chunk-Total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque, globally unique id. Immutable after creation.
    pub id: EnvelopeId,
    /// Agent identifier of the sender.
    pub source: AgentId,
    /// Topic (`pub:<topic>` / `sub:<topic>`) or pipe name (`pipe:<name>`).
    pub destination: String,
    /// Free-form type tag the receiver dispatches on.
    pub message_type: MessageType,
    /// Send time, monotonic-safe wall clock, milliseconds since epoch.
    pub timestamp: u64,
    /// JSON-serializable payload.
    pub payload: Value,
    /// Reserved keys: the five `X-Chunk-*`/`X-Original-Id` headers above.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Arbitrary JSON properties, not used for routing.
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Hop trail; an agent identifier is appended on each forward.
    #[serde(default)]
    pub route: Vec<AgentId>,
    /// Number of hops so far. Equal to `route.len()`.
    #[serde(default)]
    pub hop_count: u32,
    /// Loop guard; forwarding stops once `hop_count == max_hops`.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
}

fn default_max_hops() -> u32 {
    DEFAULT_MAX_HOPS
}

impl Envelope {
    /// Create a fresh envelope with a new id and the current timestamp.
    #[must_use]
    pub fn new(source: AgentId, destination: impl Into<String>, message_type: MessageType, payload: Value) -> Self {
        Self {
            id: EnvelopeId::generate(),
            source,
            destination: destination.into(),
            message_type,
            timestamp: now_millis(),
            payload,
            headers: HashMap::new(),
            properties: HashMap::new(),
            route: Vec::new(),
            hop_count: 0,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Append `agent_id` to the hop trail and increment `hop_count`.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::TooManyHops`] when `hop_count` already
    /// equals `max_hops`; the caller is expected to discard the envelope
    /// rather than forward it.
    pub fn add_hop(&mut self, agent_id: AgentId) -> Result<(), EnvelopeError> {
        if self.hop_count >= self.max_hops {
            return Err(EnvelopeError::TooManyHops {
                id: self.id.clone(),
                max_hops: self.max_hops,
            });
        }
        self.route.push(agent_id);
        self.hop_count += 1;
        Ok(())
    }

    /// `true` if this envelope carries any of the five chunk headers.
    #[must_use]
    pub fn is_chunk(&self) -> bool {
        self.headers.contains_key(HEADER_CHUNK_ID)
    }

    /// Validate that, if any chunk header is present, all five are present
    /// and mutually consistent.
    ///
    /// # Errors
    /// Returns a human-readable message describing the inconsistency.
    pub fn validate_chunk_headers(&self) -> Result<(), String> {
        let keys = [
            HEADER_CHUNK_ID,
            HEADER_CHUNK_INDEX,
            HEADER_CHUNK_TOTAL,
            HEADER_ORIGINAL_ID,
            HEADER_CHUNK_STRATEGY,
        ];
        let present: Vec<bool> = keys.iter().map(|k| self.headers.contains_key(*k)).collect();
        let any = present.iter().any(|p| *p);
        let all = present.iter().all(|p| *p);
        if !any {
            return Ok(());
        }
        if !all {
            return Err("partial chunk header set".to_string());
        }
        let index: u64 = self.headers[HEADER_CHUNK_INDEX]
            .parse()
            .map_err(|_| "X-Chunk-Index is not a number".to_string())?;
        let total: u64 = self.headers[HEADER_CHUNK_TOTAL]
            .parse()
            .map_err(|_| "X-Chunk-Total is not a number".to_string())?;
        if index >= total {
            return Err(format!("X-Chunk-Index {index} out of range for total {total}"));
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Legacy lightweight message form: `{id, type, target, payload, meta,
/// timestamp}`. Coexists with [`Envelope`] for clients that don't need
/// headers, route, or properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleMessage {
    /// Opaque message id.
    pub id: EnvelopeId,
    /// Message type tag.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Destination topic or pipe name.
    pub target: String,
    /// JSON-serializable payload.
    pub payload: Value,
    /// Arbitrary metadata, analogous to `Envelope::properties`.
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    /// Send time, milliseconds since epoch.
    pub timestamp: u64,
}

impl SimpleMessage {
    /// Create a fresh simple message with a new id and current timestamp.
    #[must_use]
    pub fn new(message_type: MessageType, target: impl Into<String>, payload: Value) -> Self {
        Self {
            id: EnvelopeId::generate(),
            message_type,
            target: target.into(),
            payload,
            meta: HashMap::new(),
            timestamp: now_millis(),
        }
    }
}

/// A JSON-RPC request frame: `{id, method, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Per-connection monotonic request id, used to route the response.
    pub id: u64,
    /// Method name (`connect`, `publish`, `subscribe`, ...).
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC response frame: `{id, result|error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// The request id this response answers.
    pub id: u64,
    /// Successful result, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Application error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// `{code, message}` error shape for [`ResponseFrame::error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Reserved: `-32601` method not found, `-32602` invalid params,
    /// `-32603` internal, `-32000..-32099` application-defined.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// `-32601` method not found.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// `-32602` invalid params.
    pub const INVALID_PARAMS: i32 = -32602;
    /// `-32603` internal error.
    pub const INTERNAL: i32 = -32603;
    /// Application-defined: pipe full.
    pub const PIPE_FULL: i32 = -32010;
    /// Application-defined: operation timed out.
    pub const TIMEOUT: i32 = -32011;
    /// Application-defined: the addressed client has disconnected.
    pub const CLIENT_GONE: i32 = -32012;

    /// Build an `{code, message}` error value.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Tagged wire union replacing the teacher's structurally-discriminated
/// frames: every frame AGEN reads or emits carries an explicit `kind`
/// (`crate::wire::read_frame` deserializes directly against this type, so
/// a line missing `kind` fails to parse and the connection is dropped per
/// spec.md §4.2's malformed-frame policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// A JSON-RPC request.
    Request(RequestFrame),
    /// A JSON-RPC response.
    Response(ResponseFrame),
    /// An envelope push (publish fan-out or pipe delivery).
    Envelope(Box<Envelope>),
    /// A simple-message push.
    Simple(SimpleMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn new_envelope_has_zero_hops_and_default_max_hops() {
        let env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        assert_eq!(env.hop_count, 0);
        assert_eq!(env.max_hops, DEFAULT_MAX_HOPS);
        assert!(env.route.is_empty());
    }

    #[test]
    fn add_hop_appends_and_increments() {
        let mut env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        env.add_hop(agent("b")).unwrap();
        assert_eq!(env.hop_count, 1);
        assert_eq!(env.route.len(), 1);
    }

    #[test]
    fn add_hop_fails_at_max_hops() {
        let mut env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        env.max_hops = 1;
        env.add_hop(agent("b")).unwrap();
        let err = env.add_hop(agent("c")).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::TooManyHops {
                id: env.id.clone(),
                max_hops: 1,
            }
        );
    }

    #[test]
    fn chunk_headers_partial_set_is_rejected() {
        let mut env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        env.headers.insert(HEADER_CHUNK_ID.to_string(), "g1".to_string());
        assert!(env.validate_chunk_headers().is_err());
    }

    #[test]
    fn chunk_headers_index_out_of_range_is_rejected() {
        let mut env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        env.headers.insert(HEADER_CHUNK_ID.to_string(), "g1".to_string());
        env.headers.insert(HEADER_CHUNK_INDEX.to_string(), "3".to_string());
        env.headers.insert(HEADER_CHUNK_TOTAL.to_string(), "3".to_string());
        env.headers.insert(HEADER_ORIGINAL_ID.to_string(), "orig".to_string());
        env.headers.insert(HEADER_CHUNK_STRATEGY.to_string(), "text".to_string());
        assert!(env.validate_chunk_headers().is_err());
    }

    #[test]
    fn frame_round_trips_through_tagged_kind() {
        let env = Envelope::new(agent("a"), "pub:topic1", MessageType::try_new("greet").unwrap(), Value::Null);
        let frame = Frame::Envelope(Box::new(env));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"kind\":\"envelope\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        matches!(back, Frame::Envelope(_));
    }
}
