//! `AgentDescriptor` (pool) and `CellAgent` (cells), spec.md §3/§6.3.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain_types::AgentId;

/// How the orchestrator realizes an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Launch a fresh process.
    Spawn,
    /// Invoke an existing process/endpoint and wait for completion.
    Call,
    /// Wait for an externally started process to register.
    Await,
}

/// Catalog entry: one agent type's launch metadata, from the pool config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// The type name cell agents reference.
    pub agent_type: String,
    /// Path to the agent's binary. Required for `spawn`/`call`; ignored
    /// for `await`.
    pub binary_path: Option<PathBuf>,
    /// How this agent type is realized.
    pub operator: Operator,
    /// Free-form capability tags, for observability/selection.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// One agent instance within a cell, from the cells config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellAgent {
    /// This instance's unique id within the cell.
    pub id: AgentId,
    /// Which pool entry to realize.
    pub agent_type: String,
    /// Agents this one depends on; the orchestrator spawns dependencies
    /// first and this agent's `wait_ready` blocks on them transitively.
    #[serde(default)]
    pub dependencies: Vec<AgentId>,
    /// Ingress address: `sub:<topic>`, `pipe:<name>`, or `file:<glob>`
    /// (the last consumed by the agent itself, not the broker).
    pub ingress: String,
    /// Egress address: `pub:<topic>` or `pipe:<name>`.
    pub egress: String,
    /// Per-agent config block, passed through as `AGEN_CONFIG`.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A named set of agents forming one processing graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// The cell's name.
    pub id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Verbose per-cell logging.
    #[serde(default)]
    pub debug: bool,
    /// The cell's agent instances.
    pub agents: Vec<CellAgent>,
}
