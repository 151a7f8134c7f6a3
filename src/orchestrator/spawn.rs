//! Launching one cell agent: environment assembly and `spawn`/`call`/`await`
//! operator execution (spec.md §6.2/§6.4).
//!
//! Grounded on `agent_loader.rs`'s process-launch-with-assembled-env idiom
//! in the teacher.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, instrument};

use crate::domain_types::AgentId;
use crate::support::registry::topological_order;

use super::descriptor::{AgentDescriptor, CellAgent, Operator};
use super::error::OrchestratorError;

/// Compute the order in which `agents` must be realized so every agent's
/// dependencies are already spawned first.
///
/// # Errors
/// Returns [`OrchestratorError::CyclicDependency`] if the dependency graph
/// contains a cycle.
pub fn spawn_order(agents: &[CellAgent]) -> Result<Vec<AgentId>, OrchestratorError> {
    let pairs: Vec<_> = agents.iter().map(|a| (a.id.clone(), a.dependencies.clone())).collect();
    Ok(topological_order(&pairs)?)
}

/// Build the `AGEN_*` environment map a spawned agent's process will read
/// via `AgentEnv::from_process_env`.
#[must_use]
pub fn build_env(agent: &CellAgent, broker_address: &str, support_address: &str, data_root: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("AGEN_AGENT_ID".to_string(), agent.id.as_ref().to_string());
    vars.insert("AGEN_BROKER_ADDR".to_string(), broker_address.to_string());
    vars.insert("AGEN_SUPPORT_ADDR".to_string(), support_address.to_string());
    vars.insert("AGEN_INGRESS".to_string(), agent.ingress.clone());
    vars.insert("AGEN_EGRESS".to_string(), agent.egress.clone());
    vars.insert("AGEN_CONFIG".to_string(), agent.config.to_string());
    vars.insert("AGEN_DATA_ROOT".to_string(), format!("{data_root}/{}", agent.id.as_ref()));
    vars.insert(
        "AGEN_DEPENDENCIES".to_string(),
        agent.dependencies.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(","),
    );
    vars
}

/// Launch `agent`'s process per `descriptor.operator`. `Await` agents are
/// not launched here; the caller is expected to skip straight to
/// `wait_ready` for them.
///
/// # Errors
/// Returns [`OrchestratorError::SpawnFailed`] if the process could not be
/// started.
#[instrument(skip(descriptor, env_vars), fields(agent_id = %agent.id, agent_type = %agent.agent_type))]
pub fn spawn_agent(
    agent: &CellAgent,
    descriptor: &AgentDescriptor,
    env_vars: &HashMap<String, String>,
) -> Result<Option<Child>, OrchestratorError> {
    if descriptor.operator == Operator::Await {
        info!("awaiting externally started agent");
        return Ok(None);
    }

    let binary = descriptor
        .binary_path
        .as_ref()
        .expect("validated during config load: spawn/call entries carry a binary path");

    let mut command = Command::new(binary);
    command.envs(env_vars).stdin(Stdio::null()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

    let child = command.spawn().map_err(|source| OrchestratorError::SpawnFailed {
        agent_id: agent.id.clone(),
        binary: binary.display().to_string(),
        source,
    })?;
    info!(operator = ?descriptor.operator, "agent process launched");
    Ok(Some(child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent(id: &str, deps: &[&str]) -> CellAgent {
        CellAgent {
            id: AgentId::try_new(id).unwrap(),
            agent_type: "t".to_string(),
            dependencies: deps.iter().map(|d| AgentId::try_new(*d).unwrap()).collect(),
            ingress: "sub:in".to_string(),
            egress: "pub:out".to_string(),
            config: json!({"k": 1}),
        }
    }

    #[test]
    fn spawn_order_respects_dependencies() {
        let agents = vec![agent("a", &["b"]), agent("b", &[])];
        let order = spawn_order(&agents).unwrap();
        let pos = |id: &str| order.iter().position(|x| x.as_ref() == id).unwrap();
        assert!(pos("b") < pos("a"));
    }

    #[test]
    fn build_env_includes_every_required_variable() {
        let agent = agent("ner", &[]);
        let vars = build_env(&agent, "127.0.0.1:1", "127.0.0.1:2", "/data");
        assert_eq!(vars["AGEN_AGENT_ID"], "ner");
        assert_eq!(vars["AGEN_DATA_ROOT"], "/data/ner");
        assert_eq!(vars["AGEN_CONFIG"], "{\"k\":1}");
        assert_eq!(vars["AGEN_DEPENDENCIES"], "");
    }

    #[test]
    fn build_env_joins_dependencies_with_commas() {
        let agent = agent("rag", &["ner", "ocr"]);
        let vars = build_env(&agent, "a", "b", "/data");
        assert_eq!(vars["AGEN_DEPENDENCIES"], "ner,ocr");
    }
}
