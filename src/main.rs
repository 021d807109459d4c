//! Dreamwalker server binary.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dreamwalker::{bootstrap, config::DreamwalkerConfig, server, spawn_maintenance};

#[derive(Debug, Parser)]
#[command(name = "dreamwalker", about = "MCP orchestration server", version)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, env = "DREAMWALKER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address.
    #[arg(long, env = "DREAMWALKER_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DreamwalkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DreamwalkerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let state = bootstrap(config).await?;
    spawn_maintenance(&state);

    let router = server::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&state.config.server.bind)
        .await
        .with_context(|| format!("binding {}", state.config.server.bind))?;
    info!(
        bind = %state.config.server.bind,
        "Dreamwalker listening (MCP at /mcp, events at /v1/workflows/{{id}}/events)"
    );

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_state.supervisor.shutdown().await;
        })
        .await?;
    Ok(())
}
