//! lanrun coordinator daemon

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lanrun_coordinator::{Config, Coordinator};

#[derive(Parser)]
#[command(name = "lanrun-coordinator")]
#[command(about = "Hands out work units to lanrun workers on the local network")]
#[command(version)]
struct Args {
    /// UDP address for discovery queries
    #[arg(long, default_value = "0.0.0.0:9999")]
    discovery_addr: SocketAddr,

    /// TCP address for worker sessions
    #[arg(long, default_value = "0.0.0.0:10000")]
    session_addr: SocketAddr,

    /// Host announced to workers (detected when omitted)
    #[arg(long)]
    advertise_host: Option<String>,

    /// Directory of pending work units
    #[arg(long, default_value = "tasks")]
    tasks_dir: PathBuf,

    /// Directory results are written to
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Seconds a claimed unit is leased before redelivery (0 deletes on claim)
    #[arg(long, default_value = "120")]
    lease_timeout: u64,

    /// Deliveries before an uncompleted unit is moved aside (0 is unlimited)
    #[arg(long, default_value = "5")]
    max_deliveries: u32,

    /// Directory units that never completed are moved to
    #[arg(long, default_value = "failed")]
    failed_dir: PathBuf,

    /// Seconds of silence before a peer is evicted
    #[arg(long, default_value = "45")]
    peer_timeout: u64,

    /// Seconds between reaper sweeps
    #[arg(long, default_value = "5")]
    reaper_interval: u64,

    /// Seconds a session may sit idle before it is closed
    #[arg(long, default_value = "30")]
    idle_timeout: u64,

    /// Serve /health, /metrics and /v1/peers on this address
    #[arg(long)]
    http_addr: Option<SocketAddr>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            discovery_addr: args.discovery_addr,
            session_addr: args.session_addr,
            advertise_host: args.advertise_host,
            tasks_dir: args.tasks_dir,
            results_dir: args.results_dir,
            lease_timeout_secs: args.lease_timeout,
            max_deliveries: args.max_deliveries,
            failed_dir: args.failed_dir,
            peer_timeout_secs: args.peer_timeout,
            reaper_interval_secs: args.reaper_interval,
            session_idle_timeout_secs: args.idle_timeout,
            http_addr: args.http_addr,
            ..Config::default()
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

    let config = Config::from(Args::parse());
    let coordinator = Coordinator::bind(config).await?;

    info!(
        session_addr = %coordinator.session_addr()?,
        discovery_addr = %coordinator.discovery_addr()?,
        http_addr = ?coordinator.http_addr(),
        announce = %format!("{}:{}", coordinator.announce().host, coordinator.announce().port),
        "Starting lanrun coordinator"
    );

    tokio::select! {
        result = coordinator.run() => {
            if let Err(e) = result {
                error!(error = %e, "Coordinator stopped");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
