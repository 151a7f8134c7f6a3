//! Token-budget helper: per-provider token estimation and chunk planning.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How a provider's tokenizer estimates token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenizerKind {
    /// Real BPE encoder, OpenAI family.
    BpeOpenAi,
    /// `ceil(chars / 3.5)`.
    HeuristicAnthropic,
    /// `ceil(chars / 4)`, with the safety margin doubled.
    HeuristicFallback,
}

/// Estimates token counts for a payload or message list.
///
/// Pure computation, no I/O — a plain trait rather than `async_trait`,
/// matching the teacher's split between sync value-level traits
/// (`MetricsCollector`) and async I/O traits (`MessageRouter`).
pub trait TokenCounter: Send + Sync + std::fmt::Debug {
    /// Estimate the token count of a single string of text.
    fn count(&self, text: &str) -> u64;

    /// Estimate the token count of a role-tagged list of messages.
    fn count_messages(&self, messages: &[(String, String)]) -> u64 {
        messages.iter().map(|(role, text)| self.count(role) + self.count(text)).sum()
    }
}

/// `ceil(chars / 3.5)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicHeuristicCounter;

impl TokenCounter for AnthropicHeuristicCounter {
    fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count() as f64;
        (chars / 3.5).ceil() as u64
    }
}

/// `ceil(chars / 4)`. Used with a doubled safety margin in
/// [`ProviderProfile::per_chunk_budget`] because it is the least precise
/// estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackHeuristicCounter;

impl TokenCounter for FallbackHeuristicCounter {
    fn count(&self, text: &str) -> u64 {
        let chars = text.chars().count() as f64;
        (chars / 4.0).ceil() as u64
    }
}

/// OpenAI-family BPE estimator, backed by `tiktoken-rs`'s `cl100k_base`
/// encoder (the same one GPT-3.5/GPT-4 use).
///
/// Falls back to the `chars/4` heuristic if the encoder's bundled ranks
/// fail to load, which should not happen in practice but keeps `count`
/// infallible rather than panicking mid-chunk-plan.
#[derive(Clone)]
pub struct BpeOpenAiCounter {
    bpe: Option<Arc<tiktoken_rs::CoreBPE>>,
}

impl std::fmt::Debug for BpeOpenAiCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeOpenAiCounter").field("bpe", &self.bpe.is_some()).finish()
    }
}

impl Default for BpeOpenAiCounter {
    fn default() -> Self {
        let bpe = tiktoken_rs::cl100k_base().ok().map(Arc::new);
        Self { bpe }
    }
}

impl TokenCounter for BpeOpenAiCounter {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&self, text: &str) -> u64 {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            None => {
                let chars = text.chars().count() as f64;
                (chars / 4.0).ceil() as u64
            }
        }
    }
}

/// Build the counter for a [`TokenizerKind`].
#[must_use]
pub fn counter_for(kind: TokenizerKind) -> Arc<dyn TokenCounter> {
    match kind {
        TokenizerKind::BpeOpenAi => Arc::new(BpeOpenAiCounter::default()),
        TokenizerKind::HeuristicAnthropic => Arc::new(AnthropicHeuristicCounter),
        TokenizerKind::HeuristicFallback => Arc::new(FallbackHeuristicCounter),
    }
}

/// `{max_context, max_output, safety_margin, tokenizer_kind}` for one
/// provider, plus the chunking strategy it implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Human-readable name this profile is registered under.
    pub name: String,
    /// Total context window, in tokens.
    pub max_context: u64,
    /// Reserved tokens for the model's own output.
    pub max_output: u64,
    /// Fraction of `max_context` reserved as a safety margin (typically 0.1).
    pub safety_margin: f64,
    /// Which tokenizer this provider uses.
    pub tokenizer_kind: TokenizerKind,
    /// Tokens reserved for system/context overhead outside the payload.
    pub reserved_system_context: u64,
}

impl ProviderProfile {
    /// The per-chunk token budget: `max_context - reserved_system_context -
    /// safety_margin`, with the safety margin doubled for the fallback
    /// heuristic (it is the least precise estimator).
    #[must_use]
    pub fn per_chunk_budget(&self) -> u64 {
        let margin_fraction = match self.tokenizer_kind {
            TokenizerKind::HeuristicFallback => self.safety_margin * 2.0,
            _ => self.safety_margin,
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let margin = (self.max_context as f64 * margin_fraction) as u64;
        self.max_context
            .saturating_sub(self.reserved_system_context)
            .saturating_sub(margin)
    }

    /// A small OpenAI-like development profile.
    #[must_use]
    pub fn development() -> Self {
        Self {
            name: "development".to_string(),
            max_context: 8_192,
            max_output: 1_024,
            safety_margin: 0.1,
            tokenizer_kind: TokenizerKind::BpeOpenAi,
            reserved_system_context: 512,
        }
    }

    /// A large Anthropic-like production profile.
    #[must_use]
    pub fn production() -> Self {
        Self {
            name: "production".to_string(),
            max_context: 200_000,
            max_output: 8_192,
            safety_margin: 0.1,
            tokenizer_kind: TokenizerKind::HeuristicAnthropic,
            reserved_system_context: 2_048,
        }
    }

    /// A tiny profile that forces chunking with small payloads, for tests.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            name: "testing".to_string(),
            max_context: 1_000,
            max_output: 100,
            safety_margin: 0.1,
            tokenizer_kind: TokenizerKind::HeuristicFallback,
            reserved_system_context: 0,
        }
    }
}

/// Registry of named provider profiles, with a configured default.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    profiles: HashMap<String, ProviderProfile>,
    default_name: String,
}

impl ProviderRegistry {
    /// Build a registry containing the three built-in presets, defaulting
    /// to `default_name`.
    ///
    /// # Panics
    /// Panics if `default_name` names none of the built-in presets; callers
    /// needing custom profiles should use [`Self::with_profiles`] instead.
    #[must_use]
    pub fn with_defaults(default_name: &str) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("development".to_string(), ProviderProfile::development());
        profiles.insert("production".to_string(), ProviderProfile::production());
        profiles.insert("testing".to_string(), ProviderProfile::testing());
        assert!(
            profiles.contains_key(default_name),
            "unknown default provider profile {default_name:?}"
        );
        Self {
            profiles,
            default_name: default_name.to_string(),
        }
    }

    /// Build a registry from an explicit profile set.
    #[must_use]
    pub fn with_profiles(profiles: Vec<ProviderProfile>, default_name: &str) -> Self {
        let profiles = profiles.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self {
            profiles,
            default_name: default_name.to_string(),
        }
    }

    /// Look up a profile by name, falling back to the configured default
    /// when `name` is `None`.
    #[must_use]
    pub fn resolve(&self, name: Option<&str>) -> Option<&ProviderProfile> {
        self.profiles.get(name.unwrap_or(&self.default_name))
    }
}

/// Output of [`calculate_budget`]: whether a payload needs chunking and, if
/// so, how many chunks it should become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Estimated tokens spent on envelope metadata (headers, routing).
    pub metadata_tokens: u64,
    /// Estimated tokens spent on the payload itself.
    pub payload_tokens: u64,
    /// Remaining budget after metadata and payload, if positive.
    pub headroom: i64,
    /// Whether the payload exceeds the per-chunk budget.
    pub needs_chunking: bool,
    /// Number of chunks to split into; 1 when `needs_chunking` is false.
    pub suggested_chunks: u64,
}

/// Estimate metadata and payload token counts against `profile` and decide
/// whether chunking is needed.
///
/// `suggested_chunks` is `ceil(payload_tokens / per_chunk_budget)`, with a
/// minimum of 1, per spec.
#[must_use]
pub fn calculate_budget(payload_text: &str, metadata_text: &str, profile: &ProviderProfile) -> ChunkPlan {
    let counter = counter_for(profile.tokenizer_kind);
    let metadata_tokens = counter.count(metadata_text);
    let payload_tokens = counter.count(payload_text);
    let budget = profile.per_chunk_budget();
    let used = metadata_tokens + payload_tokens;
    #[allow(clippy::cast_possible_wrap)]
    let headroom = budget as i64 - used as i64;
    let needs_chunking = payload_tokens > budget;
    let suggested_chunks = if needs_chunking {
        payload_tokens.div_ceil(budget.max(1)).max(1)
    } else {
        1
    };
    ChunkPlan {
        metadata_tokens,
        payload_tokens,
        headroom,
        needs_chunking,
        suggested_chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_heuristic_doubles_safety_margin() {
        let profile = ProviderProfile {
            name: "t".into(),
            max_context: 1000,
            max_output: 0,
            safety_margin: 0.1,
            tokenizer_kind: TokenizerKind::HeuristicFallback,
            reserved_system_context: 0,
        };
        assert_eq!(profile.per_chunk_budget(), 800);
    }

    #[test]
    fn small_payload_does_not_need_chunking() {
        let profile = ProviderProfile::production();
        let plan = calculate_budget("hello", "", &profile);
        assert!(!plan.needs_chunking);
        assert_eq!(plan.suggested_chunks, 1);
    }

    #[test]
    fn oversized_payload_is_flagged_and_counted() {
        let profile = ProviderProfile::testing();
        let big = "x".repeat(10_000);
        let plan = calculate_budget(&big, "", &profile);
        assert!(plan.needs_chunking);
        assert!(plan.suggested_chunks >= 4);
    }

    #[test]
    fn registry_resolves_named_and_default_profiles() {
        let registry = ProviderRegistry::with_defaults("production");
        assert_eq!(registry.resolve(None).unwrap().name, "production");
        assert_eq!(registry.resolve(Some("development")).unwrap().name, "development");
        assert!(registry.resolve(Some("nope")).is_none());
    }
}
