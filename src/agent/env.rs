//! Typed view of the `AGEN_*` environment variables a spawned agent
//! receives at the process boundary (spec.md §6.4).
//!
//! Grounded on `runtime.rs::CaxtonConfig`'s typed-config-from-environment
//! shape in the teacher.

use serde_json::Value;
use thiserror::Error;

use crate::domain_types::AgentId;

/// A required `AGEN_*` environment variable was missing or failed to
/// parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentEnvError {
    /// The named variable was not set.
    #[error("missing environment variable {name}")]
    Missing {
        /// The variable that was required.
        name: &'static str,
    },
    /// The variable was set but not valid for its field.
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid {
        /// The variable that failed to parse.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Everything an agent binary needs to join its cell, read straight from
/// the process environment spec.md §6.4 defines.
#[derive(Debug, Clone)]
pub struct AgentEnv {
    /// This agent's identifier, as declared in the cells config.
    pub agent_id: AgentId,
    /// `host:port` of the broker.
    pub broker_address: String,
    /// `host:port` of the support registry.
    pub support_address: String,
    /// This agent's ingress address (`sub:<topic>` or `pipe:<name>`).
    pub ingress: String,
    /// This agent's egress address (`pub:<topic>` or `pipe:<name>`).
    pub egress: String,
    /// Per-agent config block, already-parsed JSON.
    pub config: Value,
    /// Root directory for this agent's own on-disk state.
    pub data_root: String,
    /// Agent ids this one depends on, as declared in the cells config.
    /// Forwarded to the support registry's `register` call so `wait_ready`
    /// can resolve transitive readiness.
    pub dependencies: Vec<AgentId>,
}

impl AgentEnv {
    /// Read `AGEN_AGENT_ID`, `AGEN_BROKER_ADDR`, `AGEN_SUPPORT_ADDR`,
    /// `AGEN_INGRESS`, `AGEN_EGRESS`, `AGEN_CONFIG`, `AGEN_DATA_ROOT`, and
    /// the optional `AGEN_DEPENDENCIES` from the process environment.
    ///
    /// # Errors
    /// Returns [`AgentEnvError`] if a required variable is missing or
    /// `AGEN_CONFIG` is not valid JSON.
    pub fn from_process_env() -> Result<Self, AgentEnvError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_process_env`] but sourced from an arbitrary
    /// lookup function, so tests can exercise parsing without mutating
    /// the real process environment.
    ///
    /// # Errors
    /// Returns [`AgentEnvError`] if a required variable is missing or
    /// `AGEN_CONFIG` is not valid JSON.
    pub fn from_vars(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, AgentEnvError> {
        let agent_id_raw = required(&lookup, "AGEN_AGENT_ID")?;
        let agent_id = AgentId::try_new(agent_id_raw).map_err(|e| AgentEnvError::Invalid {
            name: "AGEN_AGENT_ID",
            reason: e.to_string(),
        })?;
        let config_raw = required(&lookup, "AGEN_CONFIG")?;
        let config: Value = serde_json::from_str(&config_raw).map_err(|e| AgentEnvError::Invalid {
            name: "AGEN_CONFIG",
            reason: e.to_string(),
        })?;
        let dependencies = match lookup("AGEN_DEPENDENCIES") {
            None => Vec::new(),
            Some(raw) if raw.trim().is_empty() => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|id| {
                    AgentId::try_new(id).map_err(|e| AgentEnvError::Invalid {
                        name: "AGEN_DEPENDENCIES",
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self {
            agent_id,
            broker_address: required(&lookup, "AGEN_BROKER_ADDR")?,
            support_address: required(&lookup, "AGEN_SUPPORT_ADDR")?,
            ingress: required(&lookup, "AGEN_INGRESS")?,
            egress: required(&lookup, "AGEN_EGRESS")?,
            config,
            data_root: required(&lookup, "AGEN_DATA_ROOT")?,
            dependencies,
        })
    }
}

fn required(lookup: &impl Fn(&'static str) -> Option<String>, name: &'static str) -> Result<String, AgentEnvError> {
    lookup(name).ok_or(AgentEnvError::Missing { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn parses_a_complete_environment() {
        let map = vars(&[
            ("AGEN_AGENT_ID", "ner"),
            ("AGEN_BROKER_ADDR", "127.0.0.1:7331"),
            ("AGEN_SUPPORT_ADDR", "127.0.0.1:7332"),
            ("AGEN_INGRESS", "sub:topic1"),
            ("AGEN_EGRESS", "pub:topic2"),
            ("AGEN_CONFIG", "{\"threshold\": 0.5}"),
            ("AGEN_DATA_ROOT", "/var/lib/agen/ner"),
        ]);
        let env = AgentEnv::from_vars(|name| map.get(name).cloned()).unwrap();
        assert_eq!(env.agent_id.as_ref(), "ner");
        assert_eq!(env.config["threshold"], 0.5);
        assert!(env.dependencies.is_empty());
    }

    #[test]
    fn parses_comma_separated_dependencies() {
        let mut map = vars(&[
            ("AGEN_AGENT_ID", "rag"),
            ("AGEN_BROKER_ADDR", "a"),
            ("AGEN_SUPPORT_ADDR", "b"),
            ("AGEN_INGRESS", "sub:t"),
            ("AGEN_EGRESS", "pub:t2"),
            ("AGEN_CONFIG", "{}"),
            ("AGEN_DATA_ROOT", "/tmp"),
        ]);
        map.insert("AGEN_DEPENDENCIES".to_string(), "ner,ocr".to_string());
        let env = AgentEnv::from_vars(|name| map.get(name).cloned()).unwrap();
        assert_eq!(env.dependencies.iter().map(AsRef::as_ref).collect::<Vec<_>>(), ["ner", "ocr"]);
    }

    #[test]
    fn missing_variable_is_reported() {
        let map = vars(&[("AGEN_AGENT_ID", "ner")]);
        let err = AgentEnv::from_vars(|name| map.get(name).cloned()).unwrap_err();
        assert!(matches!(err, AgentEnvError::Missing { name: "AGEN_BROKER_ADDR" }));
    }

    #[test]
    fn invalid_config_json_is_reported() {
        let map = vars(&[
            ("AGEN_AGENT_ID", "ner"),
            ("AGEN_BROKER_ADDR", "a"),
            ("AGEN_SUPPORT_ADDR", "b"),
            ("AGEN_INGRESS", "sub:t"),
            ("AGEN_EGRESS", "pub:t2"),
            ("AGEN_CONFIG", "not json"),
            ("AGEN_DATA_ROOT", "/tmp"),
        ]);
        let err = AgentEnv::from_vars(|name| map.get(name).cloned()).unwrap_err();
        assert!(matches!(err, AgentEnvError::Invalid { name: "AGEN_CONFIG", .. }));
    }
}
