//! Typed orchestrator/pool/cells configuration records (spec.md §6.3) plus
//! the YAML loader and cross-reference validation.
//!
//! Grounded on `message_router/config.rs::RouterConfig`'s
//! builder+validate()+load-from-file pattern, swapping JSON for YAML — no
//! YAML story exists in the teacher itself, so `serde_yaml` is learned from
//! the wider pack's config-loading conventions (see DESIGN.md).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orchestrator::descriptor::{AgentDescriptor, Cell, Operator};
use crate::support::registry::topological_order;

use super::error::OrchestratorError;

fn default_await_timeout_seconds() -> u64 {
    300
}

fn default_support_reboot_seconds() -> u64 {
    300
}

/// Top-level orchestrator settings (spec.md §6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// TCP port the support registry listens on.
    pub support_port: u16,
    /// TCP port the broker listens on.
    pub broker_port: u16,
    /// TCP port the `/health`/`/stats` admin HTTP surface listens on.
    /// `None` disables the admin surface entirely.
    #[serde(default)]
    pub health_port: Option<u16>,
    /// Search roots for relative pool/cells references.
    #[serde(default)]
    pub base_dir: Vec<PathBuf>,
    /// Pool config file paths (relative to `base_dir` entries).
    #[serde(default)]
    pub pool_refs: Vec<PathBuf>,
    /// Cells config file paths (relative to `base_dir` entries).
    #[serde(default)]
    pub cells_refs: Vec<PathBuf>,
    /// How long an `await` operator waits for external registration.
    #[serde(default = "default_await_timeout_seconds")]
    pub await_timeout_seconds: u64,
    /// Grace period granted to a cell during teardown before force-kill.
    #[serde(default = "default_support_reboot_seconds")]
    pub support_reboot_seconds: u64,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

/// The pool: every known agent type's launch metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolConfig(pub Vec<AgentDescriptor>);

impl PoolConfig {
    /// Look up a pool entry by `agent_type`.
    #[must_use]
    pub fn find(&self, agent_type: &str) -> Option<&AgentDescriptor> {
        self.0.iter().find(|d| d.agent_type == agent_type)
    }
}

/// Every cell this orchestrator instance manages.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CellsConfig(pub Vec<Cell>);

/// The fully loaded and validated configuration bundle passed to
/// [`super::orchestrator::Orchestrator::new`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Top-level orchestrator settings.
    pub orchestrator: OrchestratorConfig,
    /// The agent-type catalog.
    pub pool: PoolConfig,
    /// The cells to run.
    pub cells: CellsConfig,
}

impl LoadedConfig {
    /// Load and validate `orchestrator_path`, every path in `pool_paths`,
    /// and every path in `cells_paths` (each already-YAML, one document
    /// per file; pool/cells documents are concatenated).
    ///
    /// # Errors
    /// Returns [`OrchestratorError::ConfigLoad`]/`ConfigParse` on I/O or
    /// YAML failure, or any of the cross-reference validation errors from
    /// [`Self::validate`].
    pub fn load_from_paths(
        orchestrator_path: impl AsRef<Path>,
        pool_paths: &[impl AsRef<Path>],
        cells_paths: &[impl AsRef<Path>],
    ) -> Result<Self, OrchestratorError> {
        let orchestrator: OrchestratorConfig = load_yaml(orchestrator_path.as_ref())?;

        let mut pool = Vec::new();
        for path in pool_paths {
            let mut entries: Vec<AgentDescriptor> = load_yaml(path.as_ref())?;
            pool.append(&mut entries);
        }

        let mut cells = Vec::new();
        for path in cells_paths {
            let mut entries: Vec<Cell> = load_yaml(path.as_ref())?;
            cells.append(&mut entries);
        }

        let config = Self {
            orchestrator,
            pool: PoolConfig(pool),
            cells: CellsConfig(cells),
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference validation: every cell agent's `agent_type` must
    /// resolve in the pool, `spawn`/`call` entries must carry a binary
    /// path, and every cell's dependency graph must be acyclic.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::UnknownAgentType`],
    /// [`OrchestratorError::MissingBinary`], or
    /// [`OrchestratorError::CyclicDependency`].
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        for cell in &self.cells.0 {
            for agent in &cell.agents {
                let Some(descriptor) = self.pool.find(&agent.agent_type) else {
                    return Err(OrchestratorError::UnknownAgentType {
                        agent_id: agent.id.clone(),
                        agent_type: agent.agent_type.clone(),
                    });
                };
                if matches!(descriptor.operator, Operator::Spawn | Operator::Call) {
                    let usable = descriptor.binary_path.as_ref().is_some_and(|p| p.exists());
                    if !usable {
                        return Err(OrchestratorError::MissingBinary {
                            agent_type: descriptor.agent_type.clone(),
                            path: descriptor.binary_path.as_ref().map(|p| p.display().to_string()),
                        });
                    }
                }
            }

            let pairs: Vec<_> = cell.agents.iter().map(|a| (a.id.clone(), a.dependencies.clone())).collect();
            topological_order(&pairs)?;
        }
        Ok(())
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, OrchestratorError> {
    let text = std::fs::read_to_string(path).map_err(|source| OrchestratorError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| OrchestratorError::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::AgentId;
    use crate::orchestrator::descriptor::CellAgent;

    fn descriptor(agent_type: &str, operator: Operator) -> AgentDescriptor {
        AgentDescriptor {
            agent_type: agent_type.to_string(),
            binary_path: None,
            operator,
            capabilities: vec![],
            description: String::new(),
        }
    }

    fn cell_agent(id: &str, agent_type: &str, deps: &[&str]) -> CellAgent {
        CellAgent {
            id: AgentId::try_new(id).unwrap(),
            agent_type: agent_type.to_string(),
            dependencies: deps.iter().map(|d| AgentId::try_new(*d).unwrap()).collect(),
            ingress: "sub:in".to_string(),
            egress: "pub:out".to_string(),
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn unknown_agent_type_is_rejected() {
        let config = LoadedConfig {
            orchestrator: OrchestratorConfig {
                support_port: 1,
                broker_port: 2,
                health_port: None,
                base_dir: vec![],
                pool_refs: vec![],
                cells_refs: vec![],
                await_timeout_seconds: 300,
                support_reboot_seconds: 300,
                debug: false,
            },
            pool: PoolConfig(vec![]),
            cells: CellsConfig(vec![Cell {
                id: "c1".to_string(),
                description: String::new(),
                debug: false,
                agents: vec![cell_agent("a", "ner", &[])],
            }]),
        };
        assert!(matches!(config.validate(), Err(OrchestratorError::UnknownAgentType { .. })));
    }

    #[test]
    fn await_operator_does_not_require_a_binary() {
        let config = LoadedConfig {
            orchestrator: OrchestratorConfig {
                support_port: 1,
                broker_port: 2,
                health_port: None,
                base_dir: vec![],
                pool_refs: vec![],
                cells_refs: vec![],
                await_timeout_seconds: 300,
                support_reboot_seconds: 300,
                debug: false,
            },
            pool: PoolConfig(vec![descriptor("external", Operator::Await)]),
            cells: CellsConfig(vec![Cell {
                id: "c1".to_string(),
                description: String::new(),
                debug: false,
                agents: vec![cell_agent("a", "external", &[])],
            }]),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cyclic_dependency_is_rejected() {
        let config = LoadedConfig {
            orchestrator: OrchestratorConfig {
                support_port: 1,
                broker_port: 2,
                health_port: None,
                base_dir: vec![],
                pool_refs: vec![],
                cells_refs: vec![],
                await_timeout_seconds: 300,
                support_reboot_seconds: 300,
                debug: false,
            },
            pool: PoolConfig(vec![descriptor("x", Operator::Await)]),
            cells: CellsConfig(vec![Cell {
                id: "c1".to_string(),
                description: String::new(),
                debug: false,
                agents: vec![cell_agent("a", "x", &["b"]), cell_agent("b", "x", &["a"])],
            }]),
        };
        assert!(matches!(config.validate(), Err(OrchestratorError::CyclicDependency(_))));
    }
}
