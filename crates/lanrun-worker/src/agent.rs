//! Worker agent lifecycle: discover, register, then run.
//!
//! Once registered the agent runs two independent loops until shutdown:
//! a fixed-interval heartbeat and the task loop (request, execute, submit).
//! Neither loop stops on a failed exchange; it logs and tries again.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{advertised_address, ClientError, CoordinatorClient, TaskReply};
use crate::discovery::{discover, DiscoveryError};
use crate::executor::SandboxExecutor;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub struct WorkerAgent {
    config: Arc<Config>,
    executor: SandboxExecutor,
}

impl WorkerAgent {
    pub fn new(config: Config) -> Self {
        let executor = SandboxExecutor::new(&config);
        Self {
            config: Arc::new(config),
            executor,
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            peer_id = %self.config.peer_id,
            coordinator = ?self.config.coordinator,
            "Starting lanrun worker"
        );

        let Some(client) = self.connect(&shutdown).await else {
            info!("Shutdown before registration");
            return;
        };

        tokio::join!(
            heartbeat_loop(
                client.clone(),
                self.config.heartbeat_interval(),
                shutdown.clone()
            ),
            task_loop(
                client,
                self.executor.clone(),
                self.config.clone(),
                shutdown.clone()
            ),
        );

        info!("Worker stopped");
    }

    /// Retry discovery and registration until one succeeds or shutdown.
    async fn connect(&self, shutdown: &CancellationToken) -> Option<CoordinatorClient> {
        loop {
            match self.try_connect().await {
                Ok(client) => return Some(client),
                Err(e) => {
                    warn!(error = %e, "Failed to reach coordinator");
                }
            }

            info!(
                delay_secs = self.config.reconnect_delay_secs,
                "Retrying in {} seconds...", self.config.reconnect_delay_secs
            );
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }
    }

    async fn try_connect(&self) -> Result<CoordinatorClient, AgentError> {
        let addr = match self.config.coordinator {
            Some(addr) => addr,
            None => discover(&self.config).await?,
        };

        let client = CoordinatorClient::new(addr, &self.config);
        let address = advertised_address(addr, self.config.peer_port);
        client.register(address.clone()).await?;

        info!(coordinator = %client.addr(), advertised = %address, "Registered with coordinator");
        Ok(client)
    }
}

/// Send HEARTBEAT every `interval`, whatever the outcome of the last one.
pub async fn heartbeat_loop(
    client: CoordinatorClient,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        match client.heartbeat().await {
            Ok(()) => debug!("Heartbeat acknowledged"),
            Err(e) => warn!(error = %e, "Heartbeat failed"),
        }
    }
}

/// Request, execute and submit work units until shutdown.
///
/// Backs off after NO_TASK or a failed request; goes straight to the next
/// request after handling a unit.
pub async fn task_loop(
    client: CoordinatorClient,
    executor: SandboxExecutor,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let back_off = match client.request_task().await {
            Ok(TaskReply::Package(unit)) => {
                info!(unit = %unit.name, bytes = unit.payload.len(), "Work unit received");

                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    outcome = executor.execute(&unit) => outcome,
                };

                match outcome {
                    Ok(result) => {
                        let name = result.name.clone();
                        match client.submit_result(result).await {
                            Ok(()) => info!(unit = %name, "Result submitted"),
                            Err(e) => warn!(unit = %name, error = %e, "Failed to submit result"),
                        }
                    }
                    Err(e) => warn!(unit = %unit.name, error = %e, "Run failed, no result to submit"),
                }
                false
            }
            Ok(TaskReply::Empty) => {
                debug!("No work available");
                true
            }
            Err(e) => {
                warn!(error = %e, "Task request failed");
                true
            }
        };

        if back_off {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff(&config)) => {}
            }
        }
    }
}

/// Idle backoff plus a random jitter so restarted workers spread out.
fn backoff(config: &Config) -> Duration {
    let jitter = if config.backoff_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=config.backoff_jitter_ms)
    } else {
        0
    };
    config.idle_backoff() + Duration::from_millis(jitter)
}
