//! `BrokerConfig`: named presets, validating builder, `serde` round trip.
//! Grounded directly on `message_router/config.rs::RouterConfig`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::domain_types::{ChannelCapacity, ChunkTimeoutMs, PipeCapacity, RpcTimeoutMs};

/// What the broker does when a subscriber's bounded delivery channel is
/// full. Spec.md §4.2/§9 default is `Drop`; `Block` is available for
/// deployments that need lossless delivery at the cost of stalling the
/// publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriberFullPolicy {
    /// Drop the delivery and log a structured warning (spec.md default).
    #[default]
    Drop,
    /// Block the publisher until the subscriber's channel has room.
    Block,
}

/// Configuration errors raised by [`BrokerConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field was outside its documented legal range.
    #[error("{field} must be {constraint}, got {value}")]
    OutOfRange {
        /// The offending field's name.
        field: &'static str,
        /// The violated constraint, in prose.
        constraint: &'static str,
        /// The value that was rejected.
        value: u64,
    },
}

/// Broker configuration: queue sizes, default timeouts, the
/// subscriber-full policy, and the default token-budget provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// TCP port the broker listens on.
    pub port: u16,
    /// Capacity of each subscriber's bounded delivery channel.
    pub subscriber_channel_capacity: ChannelCapacity,
    /// Default capacity for newly created pipes.
    pub default_pipe_capacity: PipeCapacity,
    /// Default JSON-RPC call timeout.
    pub rpc_timeout_ms: RpcTimeoutMs,
    /// Default chunk-group assembly timeout.
    pub chunk_timeout_ms: ChunkTimeoutMs,
    /// What to do when a subscriber's channel is full.
    pub subscriber_full_policy: SubscriberFullPolicy,
    /// Name of the token-budget provider profile used when a
    /// `publish_envelope` call does not specify one.
    pub default_provider_profile: String,
}

impl BrokerConfig {
    /// Small limits, verbose defaults, suited to running on a laptop.
    #[must_use]
    pub fn development() -> Self {
        Self {
            port: 7331,
            subscriber_channel_capacity: ChannelCapacity::try_new(100).unwrap(),
            default_pipe_capacity: PipeCapacity::try_new(100).unwrap(),
            rpc_timeout_ms: RpcTimeoutMs::try_new(30_000).unwrap(),
            chunk_timeout_ms: ChunkTimeoutMs::try_new(30_000).unwrap(),
            subscriber_full_policy: SubscriberFullPolicy::Drop,
            default_provider_profile: "development".to_string(),
        }
    }

    /// Larger queues, longer timeouts, the production token-budget
    /// profile.
    #[must_use]
    pub fn production() -> Self {
        Self {
            port: 7331,
            subscriber_channel_capacity: ChannelCapacity::try_new(1_000).unwrap(),
            default_pipe_capacity: PipeCapacity::try_new(1_000).unwrap(),
            rpc_timeout_ms: RpcTimeoutMs::try_new(30_000).unwrap(),
            chunk_timeout_ms: ChunkTimeoutMs::try_new(30_000).unwrap(),
            subscriber_full_policy: SubscriberFullPolicy::Drop,
            default_provider_profile: "production".to_string(),
        }
    }

    /// Tiny queues and short timeouts so property tests run fast.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            port: 0,
            subscriber_channel_capacity: ChannelCapacity::try_new(8).unwrap(),
            default_pipe_capacity: PipeCapacity::try_new(4).unwrap(),
            rpc_timeout_ms: RpcTimeoutMs::try_new(1_000).unwrap(),
            chunk_timeout_ms: ChunkTimeoutMs::try_new(200).unwrap(),
            subscriber_full_policy: SubscriberFullPolicy::Drop,
            default_provider_profile: "testing".to_string(),
        }
    }

    /// A fluent builder seeded from [`Self::development`].
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder {
            config: Self::development(),
        }
    }

    /// Cross-field sanity checks beyond the per-field `nutype` bounds.
    ///
    /// # Errors
    /// Returns [`ConfigError::OutOfRange`] if the chunk timeout exceeds the
    /// RPC timeout (a chunk group should not outlive the call that
    /// produced it).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_timeout_ms.into_inner() > self.rpc_timeout_ms.into_inner() * 10 {
            return Err(ConfigError::OutOfRange {
                field: "chunk_timeout_ms",
                constraint: "at most 10x rpc_timeout_ms",
                value: self.chunk_timeout_ms.into_inner(),
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`BrokerConfig`], finishing with a validating
/// `build()`.
#[derive(Debug, Clone)]
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    /// Override the listen port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Override the subscriber channel capacity.
    #[must_use]
    pub fn subscriber_channel_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.subscriber_channel_capacity = capacity;
        self
    }

    /// Override the subscriber-full policy.
    #[must_use]
    pub fn subscriber_full_policy(mut self, policy: SubscriberFullPolicy) -> Self {
        self.config.subscriber_full_policy = policy;
        self
    }

    /// Override the default token-budget provider profile name.
    #[must_use]
    pub fn default_provider_profile(mut self, name: impl Into<String>) -> Self {
        self.config.default_provider_profile = name.into();
        self
    }

    /// Validate and finish.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the assembled config fails
    /// [`BrokerConfig::validate`].
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        assert!(BrokerConfig::development().validate().is_ok());
        assert!(BrokerConfig::production().validate().is_ok());
        assert!(BrokerConfig::testing().validate().is_ok());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = BrokerConfig::builder()
            .port(9000)
            .subscriber_full_policy(SubscriberFullPolicy::Block)
            .build()
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.subscriber_full_policy, SubscriberFullPolicy::Block);
    }

    #[test]
    fn json_round_trip() {
        let config = BrokerConfig::production();
        let json = serde_json::to_string(&config).unwrap();
        let back: BrokerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, config.port);
    }
}
