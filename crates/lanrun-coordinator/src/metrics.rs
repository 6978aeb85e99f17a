//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use lanrun_core::PeerStatus;

use crate::state::{AppState, Counters};

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_peer_metrics(state, &mut output).await;
    collect_queue_metrics(state, &mut output).await;
    collect_counters(state, &mut output);

    output
}

/// Collect peer metrics by liveness.
async fn collect_peer_metrics(state: &Arc<AppState>, output: &mut String) {
    let now = Utc::now();
    let threshold = state.peer_timeout();

    let peers = state.registry.list().await;

    writeln!(output, "# HELP lanrun_peers Number of registered peers by status").ok();
    writeln!(output, "# TYPE lanrun_peers gauge").ok();
    for status in [PeerStatus::Alive, PeerStatus::Stale] {
        let count = peers
            .iter()
            .filter(|peer| peer.status(now, threshold) == status)
            .count();
        writeln!(output, "lanrun_peers{{status=\"{}\"}} {count}", status.as_label()).ok();
    }
}

/// Collect work queue depth.
async fn collect_queue_metrics(state: &Arc<AppState>, output: &mut String) {
    let (up, pending, leased) = match state.queue.stats().await {
        Ok(stats) => (1, stats.pending, stats.leased),
        Err(e) => {
            warn!(error = %e, "Failed to read work queue for metrics");
            (0, 0, 0)
        }
    };

    writeln!(output).ok();
    writeln!(output, "# HELP lanrun_queue_up Whether the work queue store is readable").ok();
    writeln!(output, "# TYPE lanrun_queue_up gauge").ok();
    writeln!(output, "lanrun_queue_up {up}").ok();
    writeln!(output, "# HELP lanrun_work_units Work units on disk by state").ok();
    writeln!(output, "# TYPE lanrun_work_units gauge").ok();
    writeln!(output, "lanrun_work_units{{state=\"pending\"}} {pending}").ok();
    writeln!(output, "lanrun_work_units{{state=\"leased\"}} {leased}").ok();
}

fn collect_counters(state: &Arc<AppState>, output: &mut String) {
    let counters = &state.counters;
    let rows: [(&str, &str, &AtomicU64); 6] = [
        (
            "lanrun_units_claimed_total",
            "Work units handed to workers",
            &counters.units_claimed,
        ),
        (
            "lanrun_no_task_replies_total",
            "REQUEST_TASK calls answered with NO_TASK",
            &counters.no_task_replies,
        ),
        (
            "lanrun_results_stored_total",
            "Results persisted",
            &counters.results_stored,
        ),
        (
            "lanrun_peers_evicted_total",
            "Peers evicted for silence",
            &counters.peers_evicted,
        ),
        (
            "lanrun_leases_expired_total",
            "Leases that expired before a result arrived",
            &counters.leases_expired,
        ),
        (
            "lanrun_protocol_errors_total",
            "Sessions closed on undecodable or invalid requests",
            &counters.protocol_errors,
        ),
    ];

    for (name, help, counter) in rows {
        writeln!(output).ok();
        writeln!(output, "# HELP {name} {help}").ok();
        writeln!(output, "# TYPE {name} counter").ok();
        writeln!(output, "{name} {}", Counters::get(counter)).ok();
    }
}
