//! `agen` — the orchestrator binary entry point.
//!
//! Loads an orchestrator config plus its referenced pool/cells YAML, starts
//! the broker and support servers, realizes every cell's agent graph, and
//! blocks until a shutdown signal tears it back down.
//!
//! Grounded on `src/main.rs`'s init-then-serve shape (logging first, then
//! build the runtime, then run it to completion) and
//! `src/bin/caxton-cli.rs`'s `clap::Parser`-derived argument struct.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use agen::observability::{init_tracing, LogFormat};
use agen::orchestrator::{LoadedConfig, Orchestrator};

/// Cell-oriented agent orchestration runtime.
#[derive(Parser)]
#[command(name = "agen", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to the orchestrator config YAML (`support_port`, `broker_port`,
    /// `pool_refs`, `cells_refs`, ...).
    #[arg(long = "orchestrator-config", default_value = "orchestrator.yaml")]
    orchestrator_config: PathBuf,

    /// Pool config YAML path(s); concatenated in order.
    #[arg(long = "pool", required = true)]
    pool: Vec<PathBuf>,

    /// Cells config YAML path(s); concatenated in order.
    #[arg(long = "cells", required = true)]
    cells: Vec<PathBuf>,

    /// Log output shape.
    #[arg(long = "log-format", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    info!(
        orchestrator = %args.orchestrator_config.display(),
        "loading orchestrator configuration"
    );
    let config = LoadedConfig::load_from_paths(&args.orchestrator_config, &args.pool, &args.cells)
        .with_context(|| "failed to load orchestrator configuration")?;

    let orchestrator = Orchestrator::new(config).await.with_context(|| "failed to bind broker/support listeners")?;

    orchestrator.run().await.with_context(|| "orchestrator run failed")?;

    info!("agen exited cleanly");
    Ok(())
}
