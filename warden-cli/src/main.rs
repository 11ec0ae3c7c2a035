//! Warden CLI - run and inspect the agent supervisor

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use warden_core::config::WardenConfig;
use warden_core::descriptor::DEFAULT_WORKER_PROGRAM;
use warden_core::protocol::QueryRequest;
use warden_supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Agent process supervisor and fault-tolerant router", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to warden.toml or $WARDEN_CONFIG_PATH)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every agent and supervise them until Ctrl-C
    Run,
    /// Print the agent descriptor table
    Agents,
    /// Start every agent, print the system status and stop
    Status,
    /// Start every agent, dispatch one query and stop
    Dispatch {
        /// Query text
        query: String,

        /// Preferred agent
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("warden {}", env!("CARGO_PKG_VERSION"));
            println!("warden-core {}", warden_core::VERSION);
        }
        Commands::Agents => {
            let config = load_config(cli.config.as_deref())?;
            print_agents(&config);
        }
        Commands::Run => {
            let supervisor = build_supervisor(cli.config.as_deref())?;
            supervisor.start_all().await;
            supervisor.start_monitor().await;

            let status = supervisor.system_status().await;
            info!(
                "Supervising {}/{} healthy agents ({:?})",
                status.healthy_agents, status.total_agents, status.status
            );
            info!("{}", serde_json::to_string(&status.agents)?);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            supervisor.shutdown().await;
        }
        Commands::Status => {
            let supervisor = build_supervisor(cli.config.as_deref())?;
            supervisor.start_all().await;

            let status = supervisor.system_status().await;
            supervisor.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Dispatch { query, agent } => {
            let supervisor = build_supervisor(cli.config.as_deref())?;
            supervisor.start_all().await;

            let outcome = supervisor
                .dispatch_traced(&QueryRequest::new(query), agent.as_deref())
                .await;
            supervisor.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            WardenConfig::load_from(path)?
        }
        None => WardenConfig::load()?,
    };
    Ok(config)
}

fn build_supervisor(path: Option<&Path>) -> Result<Supervisor> {
    let mut config = load_config(path)?;
    resolve_worker_program(&mut config, sibling_worker().as_deref());
    Ok(Supervisor::new(config)?)
}

/// `warden-worker` installed next to this binary, if any
fn sibling_worker() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe
        .parent()?
        .join(format!("{}{}", DEFAULT_WORKER_PROGRAM, std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}

/// Point agents launching the bare worker name at `worker`
fn resolve_worker_program(config: &mut WardenConfig, worker: Option<&Path>) {
    let Some(worker) = worker else {
        return;
    };

    for agent in &mut config.agents {
        if agent.launch.program == Path::new(DEFAULT_WORKER_PROGRAM) {
            agent.launch.program = worker.to_path_buf();
        }
    }
}

fn print_agents(config: &WardenConfig) {
    println!(
        "{:<10} {:<8} {:>6} {:>8}  {:<16} LAUNCH",
        "NAME", "KIND", "PORT", "RESTARTS", "FALLBACK"
    );

    for agent in &config.agents {
        let fallback = if agent.fallback.is_empty() {
            "-".to_string()
        } else {
            agent.fallback.join(",")
        };
        println!(
            "{:<10} {:<8} {:>6} {:>8}  {:<16} {} {}",
            agent.name,
            agent.kind,
            agent.port,
            agent.max_restarts,
            fallback,
            agent.launch.program.display(),
            agent.launch_args().join(" ")
        );
    }
}
