//! Minimal `axum` admin surface: `/health` and `/stats`, bound on a port
//! separate from the broker's JSON-RPC TCP listener.
//!
//! SPEC_FULL.md's admin-surface supplement: the Go original exposes broker
//! and support status over HTTP for operators; spec.md drops the wire
//! format as out of scope without naming the surface itself a non-goal.
//! Grounded on `src/server.rs::create_router` (the `/`/`/health` route
//! shape) and `src/rest_api.rs` (JSON response types, `axum::Json`).

use std::net::SocketAddr;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::broker::BrokerStats;
use crate::broker::Broker;
use crate::support::registry::AgentStatus;
use crate::support::registry::SupportRegistry;
use crate::support::AgentLifecycleState;

#[derive(Clone)]
struct AdminState {
    broker: Broker,
    support: SupportRegistry,
}

/// `{"status": "ok"}` — liveness only, no dependency checks. A 200 means
/// the admin HTTP listener itself is up; it says nothing about broker or
/// support health beyond that.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    broker: BrokerStats,
    agents: Vec<AgentStatusResponse>,
}

#[derive(Debug, Serialize)]
struct AgentStatusResponse {
    agent_id: String,
    state: AgentLifecycleState,
    dependencies: Vec<String>,
    failure_reason: Option<String>,
}

impl From<AgentStatus> for AgentStatusResponse {
    fn from(status: AgentStatus) -> Self {
        Self {
            agent_id: status.agent_id.to_string(),
            state: status.state,
            dependencies: status.dependencies.iter().map(ToString::to_string).collect(),
            failure_reason: status.failure_reason,
        }
    }
}

/// Build the admin router over `broker` and `support`.
#[must_use]
pub fn router(broker: Broker, support: SupportRegistry) -> Router {
    let state = AdminState { broker, support };
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn stats(State(state): State<AdminState>) -> Json<StatsResponse> {
    let broker = state.broker.stats().await;
    let agents = state.support.list_status().await.into_iter().map(AgentStatusResponse::from).collect();
    Json(StatsResponse { broker, agents })
}

/// Serve the admin router on `listener` until `cancellation` fires.
///
/// # Errors
/// Returns an error if the underlying `axum::serve` future fails.
pub async fn serve(
    broker: Broker,
    support: SupportRegistry,
    listener: TcpListener,
    cancellation: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "admin HTTP surface listening");
    axum::serve(listener, router(broker, support))
        .with_graceful_shutdown(async move { cancellation.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::domain_types::AgentId;
    use crate::time_provider::test_time_provider;
    use tokio::time::{timeout, Duration};

    async fn serving_router(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        addr
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let broker = Broker::new(BrokerConfig::testing());
        let support = SupportRegistry::new(test_time_provider());
        let addr = serving_router(router(broker, support)).await;

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/health")).send())
            .await
            .unwrap()
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn stats_reports_registered_agents() {
        let broker = Broker::new(BrokerConfig::testing());
        let support = SupportRegistry::new(test_time_provider());
        support.register(AgentId::try_new("ner").unwrap(), vec![]).await;
        let addr = serving_router(router(broker, support)).await;

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(1), client.get(format!("http://{addr}/stats")).send())
            .await
            .unwrap()
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["agents"][0]["agent_id"], "ner");
    }
}
