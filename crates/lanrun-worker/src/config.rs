//! Worker configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use lanrun_core::PeerId;
use lanrun_proto::{DEFAULT_MAX_FRAME_LEN, DISCOVERY_PORT};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity presented on every connection.
    pub peer_id: PeerId,

    /// Port advertised in REGISTER.
    pub peer_port: u16,

    /// Where DISCOVER_MASTER is sent.
    pub discovery_target: IpAddr,
    pub discovery_port: u16,

    /// How long to wait for MASTER_ANNOUNCE (seconds).
    pub discovery_timeout_secs: u64,

    /// Coordinator session address. Skips discovery when set.
    pub coordinator: Option<SocketAddr>,

    /// Bound on each connect, write and read (seconds).
    pub io_timeout_secs: u64,

    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,

    /// Sleep after NO_TASK or a failed exchange (seconds).
    pub idle_backoff_secs: u64,

    /// Upper bound of the random delay added to each backoff (milliseconds).
    pub backoff_jitter_ms: u64,

    /// Delay between discovery/registration attempts (seconds).
    pub reconnect_delay_secs: u64,

    /// Parent of the per-run working directories.
    pub work_dir: PathBuf,

    /// Program that runs the entry point.
    pub interpreter: String,

    /// File inside the archive that is executed.
    pub entry_point: String,

    /// Wall-clock limit for one run (seconds).
    pub exec_timeout_secs: u64,

    /// Leave working directories behind after a run.
    pub keep_workdirs: bool,

    pub max_frame_len: usize,
}

impl Config {
    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.discovery_target, self.discovery_port)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: PeerId::generate(),
            peer_port: 11000,
            discovery_target: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_port: DISCOVERY_PORT,
            discovery_timeout_secs: 5,
            coordinator: None,
            io_timeout_secs: 10,
            heartbeat_interval_secs: 10,
            idle_backoff_secs: 5,
            backoff_jitter_ms: 1000,
            reconnect_delay_secs: 5,
            work_dir: PathBuf::from("work"),
            interpreter: "python".to_string(),
            entry_point: "main.py".to_string(),
            exec_timeout_secs: 20,
            keep_workdirs: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}
