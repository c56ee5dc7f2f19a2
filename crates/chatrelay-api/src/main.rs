//! chatrelay entry point.
//!
//! Binary name: `chatrelay`
//!
//! `chatrelay bridge` runs the chat-facing process (ingest endpoint, duplex
//! client, HTTP fallback, keep-alive). `chatrelay broker` runs the
//! backend-facing process (duplex endpoint, injection endpoint).

mod cli;
mod http;
mod state;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tracing::info;

use chatrelay_infra::config::{apply_env_overrides, load_config};
use cli::{Cli, Commands};
use state::{Background, BridgeState, BrokerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    chatrelay_observe::init_tracing(cli.log_directive(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))?;

    let mut config = load_config(&cli.config).await;
    apply_env_overrides(&mut config);

    let result = match cli.command {
        Commands::Bridge { host, port } => {
            let (state, background) = BridgeState::init(&config).await?;
            serve("bridge", &host, port, http::router::build_bridge_router(state), background).await
        }
        Commands::Broker { host, port } => {
            let (state, background) = BrokerState::init(&config)?;
            serve("broker", &host, port, http::router::build_broker_router(state), background).await
        }
    };

    chatrelay_observe::shutdown_tracing();
    result
}

async fn serve(role: &str, host: &str, port: u16, router: Router, background: Background) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(role, %addr, "listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    background.stop().await;
    info!(role, "stopped");
    served.context("server error")
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
