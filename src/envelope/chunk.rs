//! Splitting an oversized envelope into a chunk group and reassembling it.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;

use super::{
    ChunkStrategy, Envelope, EnvelopeId, HEADER_CHUNK_ID, HEADER_CHUNK_INDEX, HEADER_CHUNK_STRATEGY,
    HEADER_CHUNK_TOTAL, HEADER_ORIGINAL_ID,
};

/// Errors produced while reassembling a chunk group.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Fewer chunks were supplied than `X-Chunk-Total` declares.
    #[error("chunk group {group_id} incomplete: have {have}, need {need}")]
    IncompleteGroup {
        /// The group's `X-Chunk-Id`.
        group_id: String,
        /// Number of chunks actually supplied.
        have: usize,
        /// `X-Chunk-Total` declared by the group.
        need: usize,
    },
    /// Two chunks in the same group declared the same `X-Chunk-Index`.
    #[error("chunk group {group_id} has duplicate index {index}")]
    DuplicateIndex {
        /// The group's `X-Chunk-Id`.
        group_id: String,
        /// The repeated index.
        index: u64,
    },
    /// Chunks disagree on `X-Chunk-Total`, strategy, destination, or type.
    #[error("chunk group {group_id} has mismatched group metadata")]
    MismatchedGroup {
        /// The group's `X-Chunk-Id`.
        group_id: String,
    },
}

/// Pick the chunk strategy implied by a payload's JSON shape: arrays split
/// element-wise, strings split as text, everything else is chunked as
/// opaque bytes.
#[must_use]
pub fn strategy_for_payload(payload: &Value) -> ChunkStrategy {
    match payload {
        Value::Array(_) => ChunkStrategy::JsonArray,
        Value::String(_) => ChunkStrategy::Text,
        _ => ChunkStrategy::Binary,
    }
}

/// Split `env` into `chunk_count` child envelopes under `strategy`, each
/// tagged with the five chunk headers and sharing `destination`/
/// `message_type`/`source` with the original.
///
/// `chunk_count` is expected to come from [`super::budget::ChunkPlan::suggested_chunks`].
#[must_use]
pub fn chunk(env: &Envelope, strategy: ChunkStrategy, chunk_count: u64) -> Vec<Envelope> {
    let chunk_count = chunk_count.max(1) as usize;
    let group_id = EnvelopeId::generate();
    let pieces = split_payload(&env.payload, strategy, chunk_count);
    let total = pieces.len() as u64;

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let mut child = env.clone();
            child.id = EnvelopeId::generate();
            child.payload = piece;
            child.headers.insert(HEADER_CHUNK_ID.to_string(), group_id.to_string());
            child
                .headers
                .insert(HEADER_CHUNK_INDEX.to_string(), index.to_string());
            child.headers.insert(HEADER_CHUNK_TOTAL.to_string(), total.to_string());
            child
                .headers
                .insert(HEADER_ORIGINAL_ID.to_string(), env.id.to_string());
            child
                .headers
                .insert(HEADER_CHUNK_STRATEGY.to_string(), strategy.to_string());
            child
        })
        .collect()
}

fn split_payload(payload: &Value, strategy: ChunkStrategy, chunk_count: usize) -> Vec<Value> {
    match strategy {
        ChunkStrategy::JsonArray => {
            let Value::Array(items) = payload else {
                return vec![payload.clone()];
            };
            split_evenly(items.len(), chunk_count)
                .into_iter()
                .map(|(start, end)| Value::Array(items[start..end].to_vec()))
                .collect()
        }
        ChunkStrategy::Text => {
            let Value::String(text) = payload else {
                return vec![payload.clone()];
            };
            split_text(text, chunk_count).into_iter().map(Value::String).collect()
        }
        ChunkStrategy::Binary => {
            let bytes = serde_json::to_vec(payload).unwrap_or_default();
            split_evenly(bytes.len(), chunk_count)
                .into_iter()
                .map(|(start, end)| {
                    let window: Vec<Value> = bytes[start..end].iter().map(|b| Value::from(*b)).collect();
                    Value::Array(window)
                })
                .collect()
        }
    }
}

/// Partition `len` items into `n` contiguous, roughly equal ranges.
fn split_evenly(len: usize, n: usize) -> Vec<(usize, usize)> {
    let n = n.max(1).min(len.max(1));
    let base = len / n;
    let rem = len % n;
    let mut ranges = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let size = base + usize::from(i < rem);
        let end = (start + size).min(len);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// Split `text` into `n` pieces, preferring paragraph breaks (`\n\n`), then
/// sentence breaks (`. `), falling back to a hard character cut.
fn split_text(text: &str, n: usize) -> Vec<String> {
    if n <= 1 || text.is_empty() {
        return vec![text.to_string()];
    }
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    if paragraphs.len() >= n {
        return group_join(&paragraphs, n, "\n\n");
    }
    let sentences: Vec<&str> = text.split_inclusive(". ").collect();
    if sentences.len() >= n {
        return group_join(&sentences, n, "");
    }
    let chars: Vec<char> = text.chars().collect();
    split_evenly(chars.len(), n)
        .into_iter()
        .map(|(start, end)| chars[start..end].iter().collect())
        .collect()
}

fn group_join(pieces: &[&str], n: usize, sep: &str) -> Vec<String> {
    split_evenly(pieces.len(), n)
        .into_iter()
        .map(|(start, end)| pieces[start..end].join(sep))
        .collect()
}

/// Reassemble a chunk group, verifying that the group is complete,
/// index-unique, and mutually consistent before concatenating payloads
/// under the declared strategy.
///
/// # Errors
/// Returns [`ChunkError::IncompleteGroup`], [`ChunkError::DuplicateIndex`],
/// or [`ChunkError::MismatchedGroup`] per spec.
pub fn merge(mut chunks: Vec<Envelope>) -> Result<Envelope, ChunkError> {
    let Some(first) = chunks.first() else {
        return Err(ChunkError::IncompleteGroup {
            group_id: String::new(),
            have: 0,
            need: 0,
        });
    };
    let group_id = first.headers.get(HEADER_CHUNK_ID).cloned().unwrap_or_default();
    let total: usize = first
        .headers
        .get(HEADER_CHUNK_TOTAL)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let strategy: ChunkStrategy = first
        .headers
        .get(HEADER_CHUNK_STRATEGY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(ChunkStrategy::Text);
    let original_id = first.headers.get(HEADER_ORIGINAL_ID).cloned().unwrap_or_default();

    let mut seen_indices = HashSet::new();
    for c in &chunks {
        let this_total: usize = c.headers.get(HEADER_CHUNK_TOTAL).and_then(|v| v.parse().ok()).unwrap_or(0);
        let this_group = c.headers.get(HEADER_CHUNK_ID).cloned().unwrap_or_default();
        let this_original = c.headers.get(HEADER_ORIGINAL_ID).cloned().unwrap_or_default();
        if this_total != total || this_group != group_id || this_original != original_id
            || c.destination != first.destination
            || c.message_type != first.message_type
        {
            return Err(ChunkError::MismatchedGroup { group_id });
        }
        let index: u64 = c
            .headers
            .get(HEADER_CHUNK_INDEX)
            .and_then(|v| v.parse().ok())
            .unwrap_or(u64::MAX);
        if !seen_indices.insert(index) {
            return Err(ChunkError::DuplicateIndex { group_id, index });
        }
    }

    if chunks.len() != total {
        return Err(ChunkError::IncompleteGroup {
            group_id,
            have: chunks.len(),
            need: total,
        });
    }

    chunks.sort_by_key(|c| {
        c.headers
            .get(HEADER_CHUNK_INDEX)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    });

    let payload = concat_payloads(&chunks, strategy);

    let mut merged = chunks.swap_remove(0);
    merged.id = EnvelopeId::new(original_id);
    merged.payload = payload;
    for key in [
        HEADER_CHUNK_ID,
        HEADER_CHUNK_INDEX,
        HEADER_CHUNK_TOTAL,
        HEADER_ORIGINAL_ID,
        HEADER_CHUNK_STRATEGY,
    ] {
        merged.headers.remove(key);
    }
    Ok(merged)
}

fn concat_payloads(chunks: &[Envelope], strategy: ChunkStrategy) -> Value {
    match strategy {
        ChunkStrategy::JsonArray => {
            let mut items = Vec::new();
            for c in chunks {
                if let Value::Array(piece) = &c.payload {
                    items.extend(piece.clone());
                }
            }
            Value::Array(items)
        }
        ChunkStrategy::Text => {
            let mut text = String::new();
            for c in chunks {
                if let Value::String(piece) = &c.payload {
                    text.push_str(piece);
                }
            }
            Value::String(text)
        }
        ChunkStrategy::Binary => {
            let mut bytes = Vec::new();
            for c in chunks {
                if let Value::Array(window) = &c.payload {
                    for b in window {
                        if let Some(n) = b.as_u64() {
                            bytes.push(n as u8);
                        }
                    }
                }
            }
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{AgentId, MessageType};

    fn envelope(payload: Value) -> Envelope {
        Envelope::new(
            AgentId::try_new("a").unwrap(),
            "pub:big",
            MessageType::try_new("data").unwrap(),
            payload,
        )
    }

    #[test]
    fn id_preservation_text_round_trip() {
        let original = envelope(Value::String("x".repeat(10_000)));
        let chunks = chunk(&original, ChunkStrategy::Text, 4);
        assert_eq!(chunks.len(), 4);
        let merged = merge(chunks).unwrap();
        assert_eq!(merged.id, original.id);
        assert_eq!(merged.payload, original.payload);
    }

    #[test]
    fn chunk_monotonic_indices() {
        let original = envelope(Value::String("hello world ".repeat(500)));
        let chunks = chunk(&original, ChunkStrategy::Text, 5);
        let indices: Vec<u64> = chunks
            .iter()
            .map(|c| c.headers[HEADER_CHUNK_INDEX].parse().unwrap())
            .collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..chunks.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn out_of_order_merge_reassembles_in_index_order() {
        let original = envelope(Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]));
        let mut chunks = chunk(&original, ChunkStrategy::JsonArray, 3);
        chunks.swap(0, 2);
        let merged = merge(chunks).unwrap();
        assert_eq!(merged.payload, original.payload);
    }

    #[test]
    fn missing_chunk_is_incomplete_group() {
        let original = envelope(Value::String("abcdefgh".repeat(100)));
        let mut chunks = chunk(&original, ChunkStrategy::Text, 3);
        chunks.truncate(2);
        assert!(matches!(merge(chunks), Err(ChunkError::IncompleteGroup { .. })));
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let original = envelope(Value::String("abcdefgh".repeat(100)));
        let mut chunks = chunk(&original, ChunkStrategy::Text, 3);
        chunks[1].headers.insert(
            HEADER_CHUNK_INDEX.to_string(),
            chunks[0].headers[HEADER_CHUNK_INDEX].clone(),
        );
        assert!(matches!(merge(chunks), Err(ChunkError::DuplicateIndex { .. })));
    }

    #[test]
    fn mismatched_group_id_is_rejected() {
        let original = envelope(Value::String("abcdefgh".repeat(100)));
        let mut chunks = chunk(&original, ChunkStrategy::Text, 3);
        chunks[0].headers.insert(HEADER_CHUNK_ID.to_string(), "other-group".to_string());
        assert!(matches!(merge(chunks), Err(ChunkError::MismatchedGroup { .. })));
    }

    #[test]
    fn binary_payload_round_trips() {
        let original = envelope(serde_json::json!({"n": 42, "tag": "t"}));
        let chunks = chunk(&original, ChunkStrategy::Binary, 2);
        let merged = merge(chunks).unwrap();
        assert_eq!(merged.payload, original.payload);
    }
}
