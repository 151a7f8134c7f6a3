//! Bounded numeric types and the topic/pipe destination grammar, following
//! the teacher's `nutype` range-validated newtype catalogue in
//! `message_router/domain_types.rs` (`ChannelCapacity`, `MessageTimeoutMs`,
//! ...), renamed to the pub/sub + pipe vocabulary spec.md uses.

use nutype::nutype;

/// Capacity of a subscriber's bounded delivery channel. Default 100 per
/// spec.md §5.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 100,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct ChannelCapacity(u32);

/// Capacity of a named pipe's bounded buffer. Default 100 per spec.md §5.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    default = 100,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct PipeCapacity(u32);

/// Default JSON-RPC call timeout, milliseconds. Default 30s per spec.md §5.
#[nutype(
    validate(greater_or_equal = 1),
    default = 30_000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct RpcTimeoutMs(u64);

/// Default chunk-group assembly timeout, milliseconds. Default 30s.
#[nutype(
    validate(greater_or_equal = 1),
    default = 30_000,
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)
)]
pub struct ChunkTimeoutMs(u64);

/// Destination grammar for envelopes and simple messages:
/// `pub:<topic>`/`sub:<topic>` both address topic `<topic>`; `pipe:<name>`
/// addresses a named pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A pub/sub topic.
    Topic(String),
    /// A named point-to-point pipe.
    Pipe(String),
}

impl Destination {
    /// Parse `pub:<topic>`, `sub:<topic>`, or `pipe:<name>`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(topic) = raw.strip_prefix("pub:").or_else(|| raw.strip_prefix("sub:")) {
            return Some(Self::Topic(topic.to_string()));
        }
        raw.strip_prefix("pipe:").map(|name| Self::Pipe(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pub_and_sub_to_the_same_topic() {
        assert_eq!(Destination::parse("pub:topic1"), Some(Destination::Topic("topic1".to_string())));
        assert_eq!(Destination::parse("sub:topic1"), Some(Destination::Topic("topic1".to_string())));
    }

    #[test]
    fn parses_pipe() {
        assert_eq!(Destination::parse("pipe:results"), Some(Destination::Pipe("results".to_string())));
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert_eq!(Destination::parse("file:foo"), None);
    }
}
