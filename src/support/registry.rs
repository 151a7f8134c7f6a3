//! `SupportRegistry`: tracks every agent's lifecycle state, resolves
//! dependencies, and gates readiness.
//!
//! Grounded on `agent_lifecycle_manager.rs`'s `Arc<RwLock<HashMap<AgentId,
//! _>>>` manager pattern and its drain/timeout polling loop, adapted to
//! spec's `wait_ready` semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain_types::AgentId;
use crate::support::errors::SupportError;
use crate::support::lifecycle::{AgentLifecycle, AgentLifecycleState};
use crate::time_provider::SharedTimeProvider;

/// Default interval at which `wait_ready` re-checks dependency state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Compute a topological order over `agents`, each paired with the ids it
/// depends on.
///
/// Shared between the support registry (to validate registrations) and the
/// orchestrator's spawn-order computation, so the DAG logic lives in one
/// place.
///
/// # Errors
/// Returns [`SupportError::CyclicDependency`] naming one agent on the cycle.
pub fn topological_order(agents: &[(AgentId, Vec<AgentId>)]) -> Result<Vec<AgentId>, SupportError> {
    let mut in_degree: HashMap<AgentId, usize> = HashMap::new();
    let mut dependents: HashMap<AgentId, Vec<AgentId>> = HashMap::new();

    for (id, _) in agents {
        in_degree.entry(id.clone()).or_insert(0);
    }
    for (id, deps) in agents {
        for dep in deps {
            *in_degree.entry(id.clone()).or_insert(0) += 1;
            dependents.entry(dep.clone()).or_default().push(id.clone());
        }
    }

    let mut queue: Vec<AgentId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    queue.sort();

    let mut order = Vec::with_capacity(agents.len());
    while let Some(next) = queue.pop() {
        order.push(next.clone());
        if let Some(dependents_of_next) = dependents.get(&next) {
            for dependent in dependents_of_next.clone() {
                let deg = in_degree.get_mut(&dependent).expect("tracked in-degree");
                *deg -= 1;
                if *deg == 0 {
                    queue.push(dependent);
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let stuck = in_degree
            .iter()
            .find(|(id, deg)| **deg > 0 && !order.contains(id))
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| agents[0].0.clone());
        return Err(SupportError::CyclicDependency { agent_id: stuck });
    }

    Ok(order)
}

/// Snapshot of one agent's status, as returned by `list_status`.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    /// The agent this status describes.
    pub agent_id: AgentId,
    /// Its current lifecycle state.
    pub state: AgentLifecycleState,
    /// Its declared dependencies.
    pub dependencies: Vec<AgentId>,
    /// Set when `state == Failed`.
    pub failure_reason: Option<String>,
}

/// Tracks every agent's lifecycle, resolves dependency ordering, and gates
/// readiness at first use.
#[derive(Debug, Clone)]
pub struct SupportRegistry {
    agents: Arc<RwLock<HashMap<AgentId, AgentLifecycle>>>,
    time_provider: SharedTimeProvider,
    poll_interval: Duration,
}

impl SupportRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new(time_provider: SharedTimeProvider) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            time_provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Enter `REGISTERED` and record `dependencies`. Idempotent: calling
    /// this again for an already-registered agent resets its record.
    pub async fn register(&self, agent_id: AgentId, dependencies: Vec<AgentId>) {
        let mut agents = self.agents.write().await;
        info!(agent_id = %agent_id, "agent registered");
        agents.insert(agent_id.clone(), AgentLifecycle::new(agent_id, dependencies));
    }

    /// `REGISTERED -> INITIALIZING`.
    ///
    /// # Errors
    /// Returns [`SupportError::NoSuchAgent`] or
    /// [`SupportError::IllegalTransition`].
    pub async fn declare_initializing(&self, agent_id: &AgentId) -> Result<(), SupportError> {
        self.transition(agent_id, AgentLifecycleState::Initializing).await
    }

    /// `INITIALIZING -> READY`.
    ///
    /// # Errors
    /// Returns [`SupportError::NoSuchAgent`] or
    /// [`SupportError::IllegalTransition`].
    pub async fn declare_ready(&self, agent_id: &AgentId) -> Result<(), SupportError> {
        self.transition(agent_id, AgentLifecycleState::Ready).await
    }

    /// `READY -> STOPPING`.
    ///
    /// # Errors
    /// Returns [`SupportError::NoSuchAgent`] or
    /// [`SupportError::IllegalTransition`].
    pub async fn declare_stopping(&self, agent_id: &AgentId) -> Result<(), SupportError> {
        self.transition(agent_id, AgentLifecycleState::Stopping).await
    }

    /// `STOPPING -> STOPPED`.
    ///
    /// # Errors
    /// Returns [`SupportError::NoSuchAgent`] or
    /// [`SupportError::IllegalTransition`].
    pub async fn declare_stopped(&self, agent_id: &AgentId) -> Result<(), SupportError> {
        self.transition(agent_id, AgentLifecycleState::Stopped).await
    }

    /// `any -> FAILED`. Used both for explicit failure declarations and by
    /// the orchestrator when a child process exits unexpectedly.
    ///
    /// # Errors
    /// Returns [`SupportError::NoSuchAgent`] if the agent was never
    /// registered, or [`SupportError::IllegalTransition`] if it is already
    /// terminal.
    pub async fn declare_failed(&self, agent_id: &AgentId, reason: impl Into<String>) -> Result<(), SupportError> {
        let mut agents = self.agents.write().await;
        let lifecycle = agents
            .get_mut(agent_id)
            .ok_or_else(|| SupportError::NoSuchAgent { agent_id: agent_id.clone() })?;
        warn!(agent_id = %agent_id, "agent failed");
        lifecycle.fail(reason).map_err(SupportError::IllegalTransition)
    }

    async fn transition(&self, agent_id: &AgentId, next: AgentLifecycleState) -> Result<(), SupportError> {
        let mut agents = self.agents.write().await;
        let lifecycle = agents
            .get_mut(agent_id)
            .ok_or_else(|| SupportError::NoSuchAgent { agent_id: agent_id.clone() })?;
        lifecycle.transition_to(next).map_err(SupportError::IllegalTransition)
    }

    /// Block until `agent_id` and every transitive dependency is `READY`.
    ///
    /// # Errors
    /// Returns [`SupportError::DependencyFailed`] if any transitive
    /// dependency (or the agent itself) becomes `FAILED`,
    /// [`SupportError::Timeout`] if `timeout` elapses first, or
    /// [`SupportError::Cancelled`] if `cancellation` fires first.
    pub async fn wait_ready(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<(), SupportError> {
        let deadline = self.time_provider.instant() + timeout;
        loop {
            {
                let agents = self.agents.read().await;
                match self.check_ready(agent_id, &agents) {
                    ReadyCheck::Ready => return Ok(()),
                    ReadyCheck::Failed(dependency) => {
                        return Err(SupportError::DependencyFailed {
                            agent_id: agent_id.clone(),
                            dependency,
                        });
                    }
                    ReadyCheck::Pending => {}
                }
            }
            if self.time_provider.instant() >= deadline {
                return Err(SupportError::Timeout { agent_id: agent_id.clone() });
            }
            tokio::select! {
                () = cancellation.cancelled() => {
                    return Err(SupportError::Cancelled { agent_id: agent_id.clone() });
                }
                () = self.time_provider.sleep(self.poll_interval) => {}
            }
        }
    }

    fn check_ready(&self, agent_id: &AgentId, agents: &HashMap<AgentId, AgentLifecycle>) -> ReadyCheck {
        let mut seen = HashSet::new();
        let mut stack = vec![agent_id.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(lifecycle) = agents.get(&current) else {
                return ReadyCheck::Pending;
            };
            if lifecycle.state == AgentLifecycleState::Failed {
                return ReadyCheck::Failed(current);
            }
            if !lifecycle.state.is_ready() {
                return ReadyCheck::Pending;
            }
            stack.extend(lifecycle.dependencies.iter().cloned());
        }
        ReadyCheck::Ready
    }

    /// Whether `agent_id` has registered at all, regardless of state.
    /// Used by the orchestrator's `await` operator, which only needs to
    /// know that an externally managed process showed up in time, not
    /// that it has reached `READY`.
    pub async fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// Snapshot every registered agent's status, for observability.
    pub async fn list_status(&self) -> Vec<AgentStatus> {
        let agents = self.agents.read().await;
        let mut statuses: Vec<AgentStatus> = agents
            .values()
            .map(|lc| AgentStatus {
                agent_id: lc.agent_id.clone(),
                state: lc.state,
                dependencies: lc.dependencies.clone(),
                failure_reason: lc.failure_reason.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.agent_id.as_ref().cmp(b.agent_id.as_ref()));
        statuses
    }
}

enum ReadyCheck {
    Ready,
    Pending,
    Failed(AgentId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::test_time_provider;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let agents = vec![
            (agent("a"), vec![agent("b")]),
            (agent("b"), vec![agent("c")]),
            (agent("c"), vec![]),
        ];
        let order = topological_order(&agents).unwrap();
        let pos = |id: &AgentId| order.iter().position(|x| x == id).unwrap();
        assert!(pos(&agent("c")) < pos(&agent("b")));
        assert!(pos(&agent("b")) < pos(&agent("a")));
    }

    #[test]
    fn topological_order_rejects_cycles() {
        let agents = vec![(agent("a"), vec![agent("b")]), (agent("b"), vec![agent("a")])];
        assert!(matches!(
            topological_order(&agents),
            Err(SupportError::CyclicDependency { .. })
        ));
    }

    #[tokio::test]
    async fn wait_ready_blocks_until_dependency_chain_is_ready() {
        let registry = SupportRegistry::new(test_time_provider());
        registry.register(agent("c"), vec![]).await;
        registry.register(agent("b"), vec![agent("c")]).await;
        registry.register(agent("a"), vec![agent("b")]).await;

        let token = CancellationToken::new();
        let wait = tokio::time::timeout(
            Duration::from_millis(200),
            registry.wait_ready(&agent("a"), Duration::from_secs(5), &token),
        );

        for id in ["c", "b", "a"] {
            registry.declare_initializing(&agent(id)).await.unwrap();
            registry.declare_ready(&agent(id)).await.unwrap();
        }

        assert!(wait.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_ready_returns_dependency_failed_when_a_dependency_fails() {
        let registry = SupportRegistry::new(test_time_provider());
        registry.register(agent("c"), vec![]).await;
        registry.register(agent("a"), vec![agent("c")]).await;
        registry.declare_failed(&agent("c"), "boom").await.unwrap();

        let token = CancellationToken::new();
        let result = registry.wait_ready(&agent("a"), Duration::from_secs(5), &token).await;
        assert!(matches!(result, Err(SupportError::DependencyFailed { .. })));
    }

    #[tokio::test]
    async fn wait_ready_times_out_when_dependency_never_becomes_ready() {
        let registry = SupportRegistry::new(test_time_provider());
        registry.register(agent("a"), vec![]).await;
        let token = CancellationToken::new();
        let result = registry.wait_ready(&agent("a"), Duration::from_millis(10), &token).await;
        assert!(matches!(result, Err(SupportError::Timeout { .. })));
    }

    #[tokio::test]
    async fn is_registered_reflects_registration_regardless_of_state() {
        let registry = SupportRegistry::new(test_time_provider());
        assert!(!registry.is_registered(&agent("a")).await);
        registry.register(agent("a"), vec![]).await;
        assert!(registry.is_registered(&agent("a")).await);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let registry = SupportRegistry::new(test_time_provider());
        registry.register(agent("a"), vec![]).await;
        let result = registry.declare_ready(&agent("a")).await;
        assert!(matches!(result, Err(SupportError::IllegalTransition(_))));
    }
}
