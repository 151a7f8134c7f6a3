//! Process supervision: watches spawned children for unexpected exit and
//! tears the cell down in reverse dependency order on shutdown.
//!
//! Grounded on `process_supervisor.rs`'s exit-monitoring loop in the
//! teacher; the graceful-SIGTERM-then-SIGKILL teardown itself has no
//! teacher precedent (`tokio::process::Child` only exposes `start_kill`,
//! which is SIGKILL), so it is learned from the wider pack's use of `nix`
//! for POSIX signal delivery (see DESIGN.md).

use std::collections::HashMap;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain_types::AgentId;
use crate::support::registry::SupportRegistry;

/// A child process under supervision: either it exits on its own (crash,
/// declared `FAILED`) or its owning task is cancelled and tears it down
/// itself. The `Child` has exactly one owner throughout, the task spawned
/// by [`Supervisor::watch`] — there is no separate teardown path that also
/// needs to touch it.
pub struct SupervisedAgent {
    /// The agent this process realizes.
    pub agent_id: AgentId,
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl SupervisedAgent {
    /// Signal the watcher task to terminate its child (SIGTERM, then
    /// SIGKILL after its grace period) and wait for it to finish.
    pub async fn stop(self) {
        self.cancellation.cancel();
        let _ = self.handle.await;
    }
}

/// Watches every supervised child for unexpected exit, declaring the
/// owning agent `FAILED` in the support registry when one happens and
/// triggering cell-wide teardown so the rest of the graph does not keep
/// running against a dead dependency (spec.md §4.5 step 5).
#[derive(Clone)]
pub struct Supervisor {
    registry: SupportRegistry,
    teardown_cancellation: CancellationToken,
}

impl Supervisor {
    /// Build a supervisor reporting exits against `registry`. `teardown_cancellation`
    /// is the orchestrator's cell-wide token: an unexpected exit cancels it, which
    /// is what wakes `Orchestrator::run`'s shutdown race and starts teardown.
    #[must_use]
    pub fn new(registry: SupportRegistry, teardown_cancellation: CancellationToken) -> Self {
        Self { registry, teardown_cancellation }
    }

    /// Start watching `child` for exit under `agent_id`. If the returned
    /// [`SupervisedAgent`] is [`SupervisedAgent::stop`]ped before the
    /// child exits on its own, it is sent SIGTERM and given `grace` to
    /// exit before SIGKILL. If the child exits on its own instead, the
    /// agent is declared `FAILED` and the orchestrator's cell-wide
    /// cancellation token is cancelled, triggering teardown of every other
    /// agent in the cell.
    #[must_use]
    pub fn watch(&self, agent_id: AgentId, mut child: Child, grace: Duration) -> SupervisedAgent {
        let registry = self.registry.clone();
        let teardown_cancellation = self.teardown_cancellation.clone();
        let cancellation = CancellationToken::new();
        let task_cancellation = cancellation.clone();
        let task_agent_id = agent_id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_cancellation.cancelled() => {
                    info!(agent_id = %task_agent_id, "tearing down agent");
                    terminate(&mut child, grace).await;
                }
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => {
                            info!(agent_id = %task_agent_id, "agent process exited cleanly");
                        }
                        Ok(status) => {
                            warn!(agent_id = %task_agent_id, %status, "agent process exited non-zero, declaring failed");
                            let _ = registry.declare_failed(&task_agent_id, format!("process exited with {status}")).await;
                            teardown_cancellation.cancel();
                        }
                        Err(error) => {
                            error!(agent_id = %task_agent_id, %error, "failed to wait on agent process");
                            let _ = registry.declare_failed(&task_agent_id, error.to_string()).await;
                            teardown_cancellation.cancel();
                        }
                    }
                }
            }
        });
        SupervisedAgent { agent_id, cancellation, handle }
    }
}

/// Send SIGTERM to `pid`, then SIGKILL if it has not exited within `grace`.
/// A no-op on non-Unix targets beyond the `start_kill` fallback.
pub async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if let Err(error) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                warn!(%error, pid = pid.as_raw(), "failed to send SIGTERM");
            }
        }
    }

    let waited = tokio::time::timeout(grace, child.wait()).await;
    if waited.is_err() {
        warn!("agent did not exit within grace period, force-killing");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Tear every supervised process down in `order.reverse()`, one at a time,
/// each already carrying its own grace period from [`Supervisor::watch`].
/// Agents realized with the `await` operator never appear in `supervised`
/// and are silently skipped.
pub async fn teardown(mut supervised: HashMap<AgentId, SupervisedAgent>, order: &[AgentId]) {
    for agent_id in order.iter().rev() {
        if let Some(entry) = supervised.remove(agent_id) {
            entry.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_provider::production_time_provider;
    use tokio::process::Command;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    #[tokio::test]
    async fn unexpected_exit_cancels_the_cell_wide_teardown_token() {
        let registry = SupportRegistry::new(production_time_provider());
        registry.register(agent("crasher"), vec![]).await;

        let teardown_cancellation = CancellationToken::new();
        let supervisor = Supervisor::new(registry.clone(), teardown_cancellation.clone());

        let child = Command::new("false").spawn().expect("spawning /bin/false should not fail");
        let _supervised = supervisor.watch(agent("crasher"), child, Duration::from_secs(1));

        tokio::time::timeout(Duration::from_secs(5), teardown_cancellation.cancelled())
            .await
            .expect("the crash must cancel the teardown token");

        let statuses = registry.list_status().await;
        let crasher = statuses.iter().find(|s| s.agent_id == agent("crasher")).unwrap();
        assert_eq!(crasher.state, crate::support::AgentLifecycleState::Failed);
    }
}
