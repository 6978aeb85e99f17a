//! Coordinator configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use lanrun_proto::{DEFAULT_MAX_FRAME_LEN, DISCOVERY_PORT, SESSION_PORT};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// UDP address the discovery responder listens on.
    pub discovery_addr: SocketAddr,

    /// TCP address sessions are accepted on.
    pub session_addr: SocketAddr,

    /// Host put in MASTER_ANNOUNCE. Detected from the outbound interface when unset.
    pub advertise_host: Option<String>,

    /// Directory producers drop pending work units into.
    pub tasks_dir: PathBuf,

    /// Directory submitted results are written to.
    pub results_dir: PathBuf,

    /// How long a claimed unit stays leased before it is handed out again.
    /// Zero deletes units on claim (at-most-once delivery).
    pub lease_timeout_secs: u64,

    /// Deliveries a leased unit gets before it is moved to `failed_dir`.
    /// Zero redelivers forever.
    pub max_deliveries: u32,

    /// Where units that were delivered `max_deliveries` times end up.
    pub failed_dir: PathBuf,

    /// Silence after which a peer is evicted from the registry (seconds).
    pub peer_timeout_secs: u64,

    /// How often stale peers and expired leases are swept (seconds).
    pub reaper_interval_secs: u64,

    /// Longest a session may wait for the next request (seconds).
    pub session_idle_timeout_secs: u64,

    /// Largest accepted frame in bytes.
    pub max_frame_len: usize,

    /// Optional HTTP status surface (`/health`, `/metrics`, `/v1/peers`).
    pub http_addr: Option<SocketAddr>,
}

impl Config {
    /// Lease duration, or `None` for delete-on-claim.
    pub fn lease_timeout(&self) -> Option<Duration> {
        (self.lease_timeout_secs > 0).then(|| Duration::from_secs(self.lease_timeout_secs))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)),
            session_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, SESSION_PORT)),
            advertise_host: None,
            tasks_dir: PathBuf::from("tasks"),
            results_dir: PathBuf::from("results"),
            lease_timeout_secs: 120,
            max_deliveries: 5,
            failed_dir: PathBuf::from("failed"),
            peer_timeout_secs: 45,
            reaper_interval_secs: 5,
            session_idle_timeout_secs: 30,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            http_addr: None,
        }
    }
}
