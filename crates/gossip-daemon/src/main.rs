//! gossip-daemon: runs one gossip node over UDP.
//!
//! Joins the cluster through the configured seeds, optionally registers a
//! payload for this node, and logs membership changes until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gossip_core::{Gossip, NodeId, PhiAccrualFactory};
use gossip_daemon::{DaemonConfig, LoggingListener, UdpCommunications};

#[derive(Parser, Debug)]
#[command(name = "gossip-daemon")]
#[command(about = "Epidemic gossip membership daemon")]
struct Args {
    /// Path to a JSON config file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "gossip.json")]
    config: PathBuf,

    /// UDP address to gossip on (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Seed address to join through (repeatable, added to configured seeds)
    #[arg(short, long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Node ID as 16 hex chars (generated if not provided)
    #[arg(long)]
    node_id: Option<NodeId>,

    /// Payload to register for this node on start-up
    #[arg(long)]
    payload: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// How often the membership summary is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,gossip_core=debug,gossip_daemon=debug"
    } else {
        "info,gossip_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting gossip-daemon");

    let mut config = DaemonConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.node_id.is_some() {
        config.gossip.node_id = args.node_id;
    }
    for seed in args.seeds {
        if !config.gossip.seeds.contains(&seed) {
            config.gossip.seeds.push(seed);
        }
    }

    let communications = UdpCommunications::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind gossip socket on {}", config.listen))?;
    let factory = Arc::new(PhiAccrualFactory::new(config.gossip.failure_detector.clone()));
    let gossip = Gossip::new(config.gossip, communications, factory);
    gossip.create(Arc::new(LoggingListener))?;

    info!("Node ID: {}", gossip.id());
    info!("Listen address: {}", gossip.local_address());

    if let Some(payload) = args.payload {
        let id = gossip.register(None, payload.into_bytes())?;
        info!("Registered local payload as {}", id);
    }

    gossip.start().await?;
    info!("Daemon running. Press Ctrl+C to stop.");

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => {
                info!(
                    "Membership: {} live, {} unreachable, {} known",
                    gossip.live_members().len(),
                    gossip.unreachable_members().len(),
                    gossip.endpoint_count()
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    gossip.terminate().await;
    info!("Shutting down");
    Ok(())
}
