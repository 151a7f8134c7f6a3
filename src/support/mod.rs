//! Support registry: agent lifecycle state machine, dependency resolver,
//! readiness gating.

pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use errors::SupportError;
pub use lifecycle::{AgentLifecycle, AgentLifecycleState};
pub use registry::SupportRegistry;
