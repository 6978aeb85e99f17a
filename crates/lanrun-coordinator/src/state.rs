//! Shared application state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::CoordinatorError;
use crate::queue::WorkQueue;
use crate::registry::PeerRegistry;
use crate::results::ResultStore;

/// Monotonic event counters exposed on `/metrics`.
#[derive(Debug, Default)]
pub struct Counters {
    pub units_claimed: AtomicU64,
    pub no_task_replies: AtomicU64,
    pub results_stored: AtomicU64,
    pub peers_evicted: AtomicU64,
    pub leases_expired: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Shared application state.
///
/// The coordinator exclusively owns the registry, the queue and the result
/// store; workers only reach them through sessions.
pub struct AppState {
    pub config: Config,

    /// Known peers indexed by PeerId.
    pub registry: PeerRegistry,

    /// Pending work units.
    pub queue: WorkQueue,

    /// Submitted results.
    pub results: ResultStore,

    pub counters: Counters,
}

impl AppState {
    /// Open the stores named in `config` and wrap everything in an Arc.
    pub async fn open(config: Config) -> Result<Arc<Self>, CoordinatorError> {
        let queue = WorkQueue::open(&config.tasks_dir, config.lease_timeout())
            .await?
            .with_delivery_limit(config.max_deliveries, &config.failed_dir);
        let results = ResultStore::open(&config.results_dir).await?;

        Ok(Arc::new(Self {
            config,
            registry: PeerRegistry::new(),
            queue,
            results,
            counters: Counters::default(),
        }))
    }

    /// Peer liveness threshold as a chrono duration.
    pub fn peer_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.peer_timeout()).unwrap_or(chrono::Duration::MAX)
    }
}
