//! Agent framework: the client-side runtime linked into every agent
//! binary — broker and support connections, the chunk collector, and the
//! `run(impl, agent_id)` driver that implements spec.md §4.4.

pub mod chunk_collector;
pub mod client;
pub mod env;
pub mod error;
pub mod runtime;
pub mod support_client;

pub use client::BrokerClient;
pub use env::AgentEnv;
pub use error::AgentError;
pub use runtime::{run_process, Capability, CapabilityContext};
pub use support_client::SupportClient;
