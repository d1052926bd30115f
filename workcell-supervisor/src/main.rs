//! Workcell supervisor
//!
//! Runs the robot cell node, the marker node, or both over one in-process
//! bus. Configuration comes from the environment; the command line picks
//! the nodes and can override the peer addresses.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workcell_store::{InMemoryJobStore, JobStore, SqlJobStore};
use workcell_supervisor::Config;
use workcell_supervisor::bus::LocalBus;
use workcell_supervisor::node::{MarkerNode, RobotNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NodeRole {
    Robot,
    Marker,
    All,
}

#[derive(Parser)]
#[command(name = "workcell")]
#[command(about = "Robot cell and laser marker supervisor", long_about = None)]
struct Cli {
    /// Which node(s) to run
    #[arg(long, value_enum, default_value_t = NodeRole::All)]
    role: NodeRole,

    /// Robot controller address, overrides WORKCELL_DEVICE_ADDR
    #[arg(long)]
    device_addr: Option<String>,

    /// Laser marker address, overrides WORKCELL_MARKER_ADDR
    #[arg(long)]
    marker_addr: Option<String>,

    /// Keep jobs in memory instead of the database
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workcell_supervisor=info,workcell_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("Starting workcell supervisor ({:?})", cli.role);

    let config = load_config(&cli)?;
    info!(
        "Loaded configuration: node={}, device={}, marker={}, table={}",
        config.node_name, config.device_addr, config.marker_addr, config.job_table
    );

    let bus = Arc::new(LocalBus::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut nodes: Vec<(&str, JoinHandle<Result<()>>)> = Vec::new();

    if matches!(cli.role, NodeRole::Marker | NodeRole::All) {
        let node = MarkerNode::new(&config, bus.clone());
        nodes.push(("marker", tokio::spawn(node.run(shutdown_rx.clone()))));
    }

    if matches!(cli.role, NodeRole::Robot | NodeRole::All) {
        let store: Arc<dyn JobStore> = if cli.in_memory {
            info!("Using in-memory job store");
            Arc::new(InMemoryJobStore::new())
        } else {
            Arc::new(SqlJobStore::new(
                config.database_url.clone(),
                vec![config.job_table.clone()],
            ))
        };
        let node = RobotNode::new(config.clone(), bus.clone(), bus.clone(), store);
        nodes.push(("robot", tokio::spawn(node.run(shutdown_rx.clone()))));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Ctrl+C detected, stopping nodes");
    shutdown_tx.send(true).ok();

    for (name, handle) in nodes {
        match handle.await {
            Ok(Ok(())) => info!("{} node stopped", name),
            Ok(Err(e)) => error!("{} node failed: {:#}", name, e),
            Err(e) => error!("{} node panicked: {}", name, e),
        }
    }

    Ok(())
}

/// Loads configuration from the environment and applies command line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env();

    if let Some(addr) = &cli.device_addr {
        config.device_addr = addr.clone();
    }
    if let Some(addr) = &cli.marker_addr {
        config.marker_addr = addr.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
