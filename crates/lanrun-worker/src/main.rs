//! lanrun Worker Daemon

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lanrun_core::PeerId;
use lanrun_worker::{Config, WorkerAgent};

#[derive(Parser)]
#[command(name = "lanrun-worker")]
#[command(about = "Runs work units handed out by a lanrun coordinator")]
#[command(version)]
struct Args {
    /// Peer id (generated when omitted)
    #[arg(long)]
    peer_id: Option<PeerId>,

    /// Port advertised in REGISTER
    #[arg(long, default_value = "11000")]
    peer_port: u16,

    /// Coordinator session address; skips discovery
    #[arg(short, long)]
    coordinator: Option<SocketAddr>,

    /// Address DISCOVER_MASTER is broadcast to
    #[arg(long, default_value = "255.255.255.255")]
    discovery_target: IpAddr,

    /// Port DISCOVER_MASTER is broadcast to
    #[arg(long, default_value = "9999")]
    discovery_port: u16,

    /// Seconds to wait for MASTER_ANNOUNCE
    #[arg(long, default_value = "5")]
    discovery_timeout: u64,

    /// Seconds allowed for each connect, write and read
    #[arg(long, default_value = "10")]
    io_timeout: u64,

    /// Seconds between heartbeats
    #[arg(long, default_value = "10")]
    heartbeat_interval: u64,

    /// Seconds to wait after NO_TASK
    #[arg(long, default_value = "5")]
    idle_backoff: u64,

    /// Maximum random milliseconds added to each backoff
    #[arg(long, default_value = "1000")]
    backoff_jitter_ms: u64,

    /// Seconds between discovery/registration attempts
    #[arg(long, default_value = "5")]
    reconnect_delay: u64,

    /// Parent directory for per-run working directories
    #[arg(long, default_value = "work")]
    work_dir: PathBuf,

    /// Program that runs the entry point
    #[arg(long, default_value = "python")]
    interpreter: String,

    /// Entry point inside each archive
    #[arg(long, default_value = "main.py")]
    entry_point: String,

    /// Seconds a run may take before it is killed
    #[arg(long, default_value = "20")]
    exec_timeout: u64,

    /// Keep working directories after each run
    #[arg(long)]
    keep_workdirs: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let defaults = Config::default();
        Self {
            peer_id: args.peer_id.unwrap_or(defaults.peer_id),
            peer_port: args.peer_port,
            discovery_target: args.discovery_target,
            discovery_port: args.discovery_port,
            discovery_timeout_secs: args.discovery_timeout,
            coordinator: args.coordinator,
            io_timeout_secs: args.io_timeout,
            heartbeat_interval_secs: args.heartbeat_interval,
            idle_backoff_secs: args.idle_backoff,
            backoff_jitter_ms: args.backoff_jitter_ms,
            reconnect_delay_secs: args.reconnect_delay,
            work_dir: args.work_dir,
            interpreter: args.interpreter,
            entry_point: args.entry_point,
            exec_timeout_secs: args.exec_timeout,
            keep_workdirs: args.keep_workdirs,
            max_frame_len: defaults.max_frame_len,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    let args = Args::parse();
    if let Some(peer_id) = &args.peer_id {
        lanrun_core::validate_peer_id(peer_id)?;
    }
    let agent = WorkerAgent::new(Config::from(args));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
        signal.cancel();
    });

    agent.run(shutdown).await;
    Ok(())
}
