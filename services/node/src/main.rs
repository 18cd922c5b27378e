//! Spindle node entry point
//!
//! Boots an actor system from layered configuration, runs a ping/pong
//! exchange and optionally an echo listener, then waits for Ctrl-C.

mod behaviors;

use anyhow::Context;
use clap::Parser;
use config::RuntimeConfig;
use messaging_actors::ActorSystem;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker thread count
    #[arg(short, long)]
    workers: Option<usize>,

    /// Start an echo listener on this port
    #[arg(short, long)]
    port: Option<u16>,

    /// Ping/pong rounds played at startup
    #[arg(long, default_value_t = 5)]
    rounds: u32,

    /// Delay between ping rounds in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RuntimeConfig::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    info!("Starting Spindle node");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        workers = config.workers,
        bind_address = %config.bind_address,
        payload_buckets = config.payload_buckets,
        "Configuration loaded"
    );

    let system = ActorSystem::new(config, behaviors::registry())?;

    let pong = system.spawn("pong", "main", system.new_payload())?;
    let mut ping_args = system.new_payload();
    ping_args.set_opaque("peer", pong)?;
    ping_args.set_number("rounds", f64::from(args.rounds))?;
    ping_args.set_number("interval_ms", args.interval_ms as f64)?;
    system.spawn("ping", "main", ping_args)?;

    if let Some(port) = args.port {
        let mut listener_args = system.new_payload();
        listener_args.set("port", port)?;
        let listener = system.spawn("echo", "listener", listener_args)?;
        info!(actor_id = %listener, port, "Echo listener spawned");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("Shutdown signal received");

    let live = system.actor_count();
    if live > 0 {
        warn!(live, "Stopping with actors still running");
    }
    system.shutdown();

    let stats = serde_json::to_string(&system.stats())?;
    info!(stats = %stats, "Spindle node stopped");
    Ok(())
}
