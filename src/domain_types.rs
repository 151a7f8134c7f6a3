//! Domain types shared across every subsystem.
//!
//! Following the teacher's "illegal states unrepresentable" convention,
//! identifiers that cross module boundaries are validated `nutype` newtypes
//! rather than bare `String`.

use nutype::nutype;

/// Identifier of an agent instance, as declared in a cell's agent list.
///
/// Non-empty, trimmed, at most 255 characters — the same bound the teacher
/// applies to `AgentName`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct AgentId(String);

/// Free-form message type tag used by the receiver to dispatch.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRef)
)]
pub struct MessageType(String);
