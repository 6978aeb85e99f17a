//! Background sweep: evicts silent peers and drops expired leases.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use lanrun_core::PeerId;

use crate::state::{AppState, Counters};

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted_peers: Vec<PeerId>,
    pub expired_leases: Vec<String>,
}

/// Sweep once as of `now`.
pub async fn reap_once(state: &AppState, now: DateTime<Utc>) -> ReapReport {
    let evicted_peers = state
        .registry
        .reap_stale(now, state.peer_timeout())
        .await;
    for peer_id in &evicted_peers {
        warn!(peer_id = %peer_id, "Peer timed out, evicting");
    }

    let expired_leases = state.queue.release_expired(now).await;

    Counters::add(&state.counters.peers_evicted, evicted_peers.len() as u64);
    Counters::add(&state.counters.leases_expired, expired_leases.len() as u64);

    ReapReport {
        evicted_peers,
        expired_leases,
    }
}

/// Sweep every `reaper_interval` until the task is dropped.
pub async fn run_reaper(state: Arc<AppState>) {
    let interval = state.config.reaper_interval();
    let mut interval_timer = tokio::time::interval(interval);

    info!(
        interval_secs = interval.as_secs(),
        peer_timeout_secs = state.config.peer_timeout_secs,
        "Reaper started"
    );

    loop {
        interval_timer.tick().await;

        let report = reap_once(&state, Utc::now()).await;
        if !report.evicted_peers.is_empty() || !report.expired_leases.is_empty() {
            let peers = state.registry.len().await;
            info!(
                evicted = report.evicted_peers.len(),
                expired_leases = report.expired_leases.len(),
                peers,
                "Reaper sweep"
            );
        } else {
            debug!("Reaper sweep found nothing to do");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Duration;
    use lanrun_core::{PeerAddr, WorkUnit};

    #[tokio::test]
    async fn test_reap_once_evicts_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(Config {
            tasks_dir: dir.path().join("tasks"),
            results_dir: dir.path().join("results"),
            lease_timeout_secs: 30,
            peer_timeout_secs: 45,
            ..Config::default()
        })
        .await
        .unwrap();

        let t0 = Utc::now();
        state
            .registry
            .register(PeerId::new("w1"), PeerAddr::new("h", 1), t0)
            .await;
        state
            .queue
            .enqueue(&WorkUnit::new("a.zip", vec![1]))
            .await
            .unwrap();
        state
            .queue
            .claim_one_at(&PeerId::new("w1"), t0)
            .await
            .unwrap();

        let report = reap_once(&state, t0 + Duration::seconds(10)).await;
        assert_eq!(report, ReapReport::default());

        let report = reap_once(&state, t0 + Duration::seconds(60)).await;
        assert_eq!(report.evicted_peers, vec![PeerId::new("w1")]);
        assert_eq!(report.expired_leases, vec!["a.zip".to_string()]);
        assert_eq!(Counters::get(&state.counters.peers_evicted), 1);
        assert_eq!(Counters::get(&state.counters.leases_expired), 1);
    }
}
