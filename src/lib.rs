//! AGEN orchestration core.
//!
//! A cell-oriented agent orchestration runtime: a broker routes envelopes
//! over pub/sub topics and point-to-point pipes, a support registry tracks
//! agent lifecycles and dependency readiness, an agent framework gives every
//! agent binary a uniform client runtime, and an orchestrator loads pool and
//! cell configuration, spawns the agent graph in dependency order, and tears
//! it down cleanly on exit or signal.
//!
//! ## Architecture
//!
//! Functional core, imperative shell: [`envelope`] and [`support::lifecycle`]
//! are pure data/state-machine modules with no I/O; [`broker`], [`support`],
//! [`agent`], and [`orchestrator`] are the imperative shells that drive them
//! over real connections, processes, and clocks.
//!
//! ```no_run
//! use agen::orchestrator::{LoadedConfig, Orchestrator};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = LoadedConfig::load_from_paths(
//!     "orchestrator.yaml",
//!     &["pool.yaml"],
//!     &["cells.yaml"],
//! )?;
//! let orchestrator = Orchestrator::new(config).await?;
//! orchestrator.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod broker;
pub mod domain_types;
pub mod envelope;
pub mod error;
pub mod observability;
pub mod orchestrator;
pub mod support;
pub mod time_provider;
pub mod wire;

pub use error::AgenError;
