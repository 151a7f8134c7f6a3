//! A minimal agent built on [`agen::agent::runtime`], used as the `B`
//! agent in spec.md §8's S1 scenario: uppercases whatever text payload it
//! receives on its ingress and republishes it on its egress.
//!
//! Grounded on `src/bin/agent_lifecycle_demo.rs`'s role in the teacher as
//! a runnable illustration of the library's client-facing API (the demo
//! itself is WASM-deployment specific and is not reused, only its role).

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use agen::agent::{run_process, AgentEnv, AgentError, Capability, CapabilityContext};
use agen::envelope::Envelope;

struct EchoAgent;

#[async_trait]
impl Capability for EchoAgent {
    async fn init(&mut self, _ctx: &CapabilityContext) -> Result<(), AgentError> {
        info!("echo agent initialized");
        Ok(())
    }

    async fn process_message(&mut self, message: Envelope, ctx: &CapabilityContext) -> Result<Option<Envelope>, AgentError> {
        let uppercased = match &message.payload {
            Value::String(text) => Value::String(text.to_uppercase()),
            other => other.clone(),
        };

        let reply = Envelope::new(
            ctx.env.agent_id.clone(),
            ctx.env.egress.clone(),
            message.message_type.clone(),
            uppercased,
        );
        Ok(Some(reply))
    }

    async fn cleanup(&mut self, _ctx: &CapabilityContext) {
        info!("echo agent cleaning up");
    }
}

#[tokio::main]
async fn main() {
    agen::observability::init_tracing(agen::observability::LogFormat::Text).expect("tracing init should not fail");
    let env = match AgentEnv::from_process_env() {
        Ok(env) => env,
        Err(error) => {
            eprintln!("echo-agent: {error}");
            std::process::exit(1);
        }
    };
    run_process(EchoAgent, env).await
}
