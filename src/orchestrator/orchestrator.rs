//! `Orchestrator`: owns the broker and support servers, realizes every
//! cell's agent graph in dependency order, and tears the whole thing down
//! on signal or unrecoverable failure (spec.md §4.5/§6).
//!
//! Grounded on `src/server.rs::serve_with_graceful_shutdown`'s
//! cancellation-token-driven shutdown in the teacher, generalized from one
//! `axum::Router` to a broker server, a support server, and a supervised
//! tree of agent processes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::health;
use crate::broker::{Broker, BrokerConfig, BrokerServer};
use crate::domain_types::AgentId;
use crate::support::registry::SupportRegistry;
use crate::support::server::SupportServer;
use crate::time_provider::production_time_provider;

use super::config::LoadedConfig;
use super::descriptor::Operator;
use super::error::OrchestratorError;
use super::spawn::{build_env, spawn_agent, spawn_order};
use super::supervisor::{teardown, Supervisor, SupervisedAgent};

/// Runs every configured cell to completion: binds the broker and support
/// listeners, spawns/calls/awaits each cell's agents in dependency order,
/// then blocks until `SIGINT`/`SIGTERM`, tearing the whole graph down in
/// reverse dependency order before returning.
pub struct Orchestrator {
    config: LoadedConfig,
    registry: SupportRegistry,
    broker_listener: TcpListener,
    support_listener: TcpListener,
    health_listener: Option<TcpListener>,
}

impl Orchestrator {
    /// Bind the broker, support, and (if configured) admin HTTP listeners
    /// and build the lifecycle registry. Spawns nothing yet; call
    /// [`Self::run`] for that.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::BindFailed`] if any configured listener
    /// fails to bind.
    pub async fn new(config: LoadedConfig) -> Result<Self, OrchestratorError> {
        let broker_listener = bind(config.orchestrator.broker_port, "broker").await?;
        let support_listener = bind(config.orchestrator.support_port, "support").await?;
        let health_listener = match config.orchestrator.health_port {
            Some(port) => Some(bind(port, "admin").await?),
            None => None,
        };
        let registry = SupportRegistry::new(production_time_provider());

        Ok(Self {
            config,
            registry,
            broker_listener,
            support_listener,
            health_listener,
        })
    }

    /// Serve the broker and support registries, realize every cell's agent
    /// graph, and block until a shutdown signal arrives, tearing every
    /// spawned process down in reverse dependency order before returning.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::AwaitTimeout`] if an `await` agent
    /// never registers, [`OrchestratorError::CallFailed`] if a `call`
    /// agent exits non-zero, or [`OrchestratorError::SpawnFailed`] if a
    /// `spawn`/`call` process could not be started.
    pub async fn run(self) -> Result<(), OrchestratorError> {
        let cancellation = CancellationToken::new();

        let mut broker_config = if self.config.orchestrator.debug {
            BrokerConfig::development()
        } else {
            BrokerConfig::production()
        };
        broker_config.port = self.config.orchestrator.broker_port;
        let broker = Broker::new(broker_config);
        let health_handle = self.health_listener.map(|listener| {
            tokio::spawn(health::serve(broker.clone(), self.registry.clone(), listener, cancellation.clone()))
        });
        let broker_server = BrokerServer::new(broker, cancellation.clone());
        let broker_handle = tokio::spawn(broker_server.serve(self.broker_listener));

        let support_server = SupportServer::new(self.registry.clone(), cancellation.clone());
        let support_handle = tokio::spawn(support_server.serve(self.support_listener));

        let broker_address = format!("127.0.0.1:{}", self.config.orchestrator.broker_port);
        let support_address = format!("127.0.0.1:{}", self.config.orchestrator.support_port);
        let await_timeout = Duration::from_secs(self.config.orchestrator.await_timeout_seconds);
        let grace = Duration::from_secs(self.config.orchestrator.support_reboot_seconds);
        let data_root = self
            .config
            .orchestrator
            .base_dir
            .first()
            .map_or_else(|| "agen-data".to_string(), |p| p.display().to_string());

        let supervisor = Supervisor::new(self.registry.clone(), cancellation.clone());
        let mut supervised: HashMap<AgentId, SupervisedAgent> = HashMap::new();
        let mut full_order: Vec<AgentId> = Vec::new();

        for cell in &self.config.cells.0 {
            info!(cell = %cell.id, "starting cell");
            let order = spawn_order(&cell.agents)?;

            for agent_id in &order {
                let agent = cell
                    .agents
                    .iter()
                    .find(|a| &a.id == agent_id)
                    .expect("spawn_order only returns ids drawn from cell.agents");
                let descriptor = self
                    .config
                    .pool
                    .find(&agent.agent_type)
                    .expect("validated during config load");

                let env_vars = build_env(agent, &broker_address, &support_address, &data_root);

                match descriptor.operator {
                    Operator::Await => {
                        info!(agent_id = %agent.id, "awaiting external registration");
                        wait_for_registration(&self.registry, &agent.id, await_timeout).await?;
                    }
                    Operator::Spawn => {
                        let child = spawn_agent(agent, descriptor, &env_vars)?
                            .expect("spawn operator always launches a process");
                        let handle = supervisor.watch(agent.id.clone(), child, grace);
                        supervised.insert(agent.id.clone(), handle);
                    }
                    Operator::Call => {
                        let mut child =
                            spawn_agent(agent, descriptor, &env_vars)?.expect("call operator always launches a process");
                        let status = child.wait().await.map_err(|source| OrchestratorError::SpawnFailed {
                            agent_id: agent.id.clone(),
                            binary: descriptor.binary_path.as_ref().map_or_else(String::new, |p| p.display().to_string()),
                            source,
                        })?;
                        if !status.success() {
                            return Err(OrchestratorError::CallFailed {
                                agent_id: agent.id.clone(),
                                status: status.to_string(),
                            });
                        }
                    }
                }
            }
            full_order.extend(order);
        }

        info!("cell graph realized, waiting for shutdown signal");
        tokio::select! {
            () = wait_for_shutdown_signal() => {
                info!("shutdown signal received, tearing down");
            }
            () = cancellation.cancelled() => {
                info!("an agent exited unexpectedly, tearing down the cell");
            }
        }

        cancellation.cancel();
        teardown(supervised, &full_order).await;

        broker_handle.abort();
        support_handle.abort();
        if let Some(handle) = health_handle {
            handle.abort();
        }

        Ok(())
    }
}

async fn bind(port: u16, component: &'static str) -> Result<TcpListener, OrchestratorError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| OrchestratorError::BindFailed { component, port, source })
}

async fn wait_for_registration(registry: &SupportRegistry, agent_id: &AgentId, timeout: Duration) -> Result<(), OrchestratorError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if registry.is_registered(agent_id).await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OrchestratorError::AwaitTimeout { agent_id: agent_id.clone() });
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("installing a SIGTERM handler should not fail");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn await_times_out_when_agent_never_registers() {
        let registry = SupportRegistry::new(production_time_provider());
        let agent_id = AgentId::try_new("never").unwrap();
        let result = wait_for_registration(&registry, &agent_id, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(OrchestratorError::AwaitTimeout { .. })));
    }

    #[tokio::test]
    async fn await_succeeds_once_the_agent_registers() {
        let registry = SupportRegistry::new(production_time_provider());
        let agent_id = AgentId::try_new("eventual").unwrap();
        let register_registry = registry.clone();
        let register_id = agent_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            register_registry.register(register_id, vec![]).await;
        });
        let result = wait_for_registration(&registry, &agent_id, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }
}
