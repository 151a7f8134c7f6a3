//! End-to-end tests exercising the broker and support registry over real
//! TCP connections rather than the in-process `Broker`/`SupportRegistry`
//! handles the unit tests use directly.
//!
//! Grounded on `tests/message_router_integration_tests.rs`'s
//! whole-file-wrapped-in-a-`tests`-module shape in the teacher.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agen::agent::runtime::{run, Capability, CapabilityContext};
    use agen::agent::{AgentEnv, AgentError, BrokerClient, SupportClient};
    use agen::broker::{Broker, BrokerConfig, BrokerServer};
    use agen::domain_types::{AgentId, MessageType};
    use agen::envelope::{Envelope, Frame};
    use agen::support::SupportRegistry;
    use agen::time_provider::test_time_provider;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    async fn spawn_broker() -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancellation = CancellationToken::new();
        let server = BrokerServer::new(Broker::new(BrokerConfig::testing()), cancellation.clone());
        tokio::spawn(server.serve(listener));
        (addr, cancellation)
    }

    async fn spawn_support() -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancellation = CancellationToken::new();
        let server = agen::support::server::SupportServer::new(SupportRegistry::new(test_time_provider()), cancellation.clone());
        tokio::spawn(server.serve(listener));
        (addr, cancellation)
    }

    fn agent_id(name: &str) -> AgentId {
        AgentId::try_new(name).unwrap()
    }

    struct UppercaseAgent;

    #[async_trait]
    impl Capability for UppercaseAgent {
        async fn init(&mut self, _ctx: &CapabilityContext) -> Result<(), AgentError> {
            Ok(())
        }

        async fn process_message(&mut self, message: Envelope, ctx: &CapabilityContext) -> Result<Option<Envelope>, AgentError> {
            let Value::String(text) = &message.payload else {
                return Ok(None);
            };
            Ok(Some(Envelope::new(
                ctx.env.agent_id.clone(),
                ctx.env.egress.clone(),
                message.message_type.clone(),
                Value::String(text.to_uppercase()),
            )))
        }

        async fn cleanup(&mut self, _ctx: &CapabilityContext) {}
    }

    /// S1 — a publisher ("A") and the real agent-framework driver running
    /// `UppercaseAgent` ("B") over a live TCP broker: publishing `"hello"`
    /// on `topic1` yields exactly one `"HELLO"` envelope on `topic2`, with
    /// no chunk headers on either side.
    #[tokio::test]
    async fn s1_two_agent_pipeline_round_trips_through_the_wire_protocol() {
        let (broker_addr, broker_cancellation) = spawn_broker().await;
        let (support_addr, support_cancellation) = spawn_support().await;

        let b_env = AgentEnv {
            agent_id: agent_id("b"),
            broker_address: broker_addr.clone(),
            support_address: support_addr.clone(),
            ingress: "sub:topic1".to_string(),
            egress: "pub:topic2".to_string(),
            config: Value::Null,
            data_root: std::env::temp_dir().to_string_lossy().to_string(),
            dependencies: vec![],
        };
        let b_handle = tokio::spawn(run(UppercaseAgent, b_env));

        // Give B time to connect, register, and subscribe before A publishes.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let time_provider = test_time_provider();
        let a = BrokerClient::dial(&broker_addr, Duration::from_secs(5), Duration::from_secs(5), &time_provider)
            .await
            .unwrap();
        a.connect(&agent_id("a")).await.unwrap();
        a.subscribe("topic2").await.unwrap();

        let envelope = Envelope::new(agent_id("a"), "pub:topic1", MessageType::try_new("text").unwrap(), Value::String("hello".to_string()));
        a.publish_envelope("topic1", envelope).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), a.recv()).await.unwrap().unwrap();
        let Frame::Envelope(envelope) = received else { panic!("expected an envelope frame") };
        assert_eq!(envelope.payload, Value::String("HELLO".to_string()));
        assert!(!envelope.is_chunk());

        broker_cancellation.cancel();
        support_cancellation.cancel();
        b_handle.abort();
    }

    /// S5 — `wait_ready` on an agent whose dependency never reaches `READY`
    /// (it is declared `FAILED` instead, modelling a killed process) returns
    /// `DependencyFailed` over the real support wire protocol.
    #[tokio::test]
    async fn s5_wait_ready_reports_a_failed_transitive_dependency() {
        let (support_addr, cancellation) = spawn_support().await;
        let time_provider = test_time_provider();
        let client = SupportClient::dial(&support_addr, Duration::from_secs(5), Duration::from_secs(5), &time_provider)
            .await
            .unwrap();

        client.register(&agent_id("c"), &[]).await.unwrap();
        client.register(&agent_id("b"), &[agent_id("c")]).await.unwrap();
        client.register(&agent_id("a"), &[agent_id("b")]).await.unwrap();

        // C is killed before it ever declares ready.
        client.declare_failed(&agent_id("c"), "process killed").await.unwrap();

        let result = client.wait_ready(&agent_id("a"), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(AgentError::Rpc { .. })));

        cancellation.cancel();
    }

    /// S6 — pipe backpressure over the real wire protocol: a pipe with
    /// capacity 2 rejects a third send with `PipeFull` before any receiver
    /// drains it, then accepts sends again once drained.
    #[tokio::test]
    async fn s6_pipe_backpressure_over_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let cancellation = CancellationToken::new();
        let config = BrokerConfig::builder()
            .build()
            .map(|mut c| {
                c.default_pipe_capacity = agen::broker::domain_types::PipeCapacity::try_new(2).unwrap();
                c
            })
            .unwrap();
        let server = BrokerServer::new(Broker::new(config), cancellation.clone());
        tokio::spawn(server.serve(listener));

        let time_provider = test_time_provider();
        let client = BrokerClient::dial(&addr, Duration::from_secs(5), Duration::from_secs(5), &time_provider)
            .await
            .unwrap();
        client.connect(&agent_id("sender")).await.unwrap();

        let msg = |n: i64| agen::envelope::SimpleMessage::new(MessageType::try_new("t").unwrap(), "pipe:p", Value::from(n));
        client.send_pipe("p", msg(1)).await.unwrap();
        client.send_pipe("p", msg(2)).await.unwrap();
        let third = client.send_pipe("p", msg(3)).await;
        assert!(matches!(third, Err(AgentError::Rpc { .. })));

        let first = client.receive_pipe("p", Some(1_000)).await.unwrap();
        assert!(matches!(first, Frame::Simple(_)));
        let second = client.receive_pipe("p", Some(1_000)).await.unwrap();
        assert!(matches!(second, Frame::Simple(_)));

        client.send_pipe("p", msg(4)).await.unwrap();

        cancellation.cancel();
    }
}
