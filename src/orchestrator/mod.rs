//! Orchestrator: typed pool/cells configuration, dependency-ordered
//! spawning, and supervised teardown (spec.md §4.5/§6).

pub mod config;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod spawn;
pub mod supervisor;

pub use config::LoadedConfig;
pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
