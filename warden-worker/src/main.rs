//! Warden worker - reference HTTP agent served under the warden supervisor

mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use routes::WorkerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warden_core::descriptor::{AgentKind, DEFAULT_HOST};

#[derive(Parser, Debug)]
#[command(name = "warden-worker")]
#[command(about = "Reference agent worker for the warden supervisor", long_about = None)]
#[command(version)]
struct Args {
    /// Agent name this worker serves
    #[arg(long, env = "WARDEN_AGENT_NAME")]
    agent: String,

    /// Agent kind (defaults to the kind named like the agent)
    #[arg(long)]
    kind: Option<AgentKind>,

    /// Port to listen on
    #[arg(long, env = "WARDEN_AGENT_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let kind = match args.kind {
        Some(kind) => kind,
        None => args
            .agent
            .parse()
            .with_context(|| format!("--kind is required for agent {}", args.agent))?,
    };

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;

    let state = Arc::new(WorkerState::new(args.agent.clone(), kind));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Agent {} ({}) listening on {}", args.agent, kind, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("worker server error")?;

    info!("Agent {} stopped", args.agent);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
