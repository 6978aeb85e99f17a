//! Coordinator wiring: session accept loop plus the background activities.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::{advertise_host, Announce, DiscoveryResponder};
use crate::error::CoordinatorError;
use crate::reaper::run_reaper;
use crate::session::handle_connection;
use crate::state::AppState;

/// Accept sessions forever, one task per connection.
///
/// The loop never waits on a handler.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    handle_connection(state, stream, remote).await;
                });
            }
            Err(e) => {
                // Usually fd exhaustion; give handlers a moment to finish.
                warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// A bound, ready-to-run coordinator.
pub struct Coordinator {
    state: Arc<AppState>,
    sessions: TcpListener,
    discovery: DiscoveryResponder,
    http: Option<TcpListener>,
}

impl Coordinator {
    /// Open the stores and bind every socket named in `config`.
    pub async fn bind(config: Config) -> Result<Self, CoordinatorError> {
        let sessions = TcpListener::bind(config.session_addr)
            .await
            .map_err(|source| CoordinatorError::Bind {
                what: "session listener",
                addr: config.session_addr,
                source,
            })?;
        let session_addr = sessions.local_addr()?;

        let announce = Announce {
            host: advertise_host(config.advertise_host.as_deref(), session_addr),
            port: session_addr.port(),
        };
        let discovery = DiscoveryResponder::bind(config.discovery_addr, announce).await?;

        let http = match config.http_addr {
            Some(addr) => Some(crate::http::bind(addr).await?),
            None => None,
        };

        let state = AppState::open(config).await?;

        Ok(Self {
            state,
            sessions,
            discovery,
            http,
        })
    }

    pub fn session_addr(&self) -> std::io::Result<SocketAddr> {
        self.sessions.local_addr()
    }

    pub fn discovery_addr(&self) -> std::io::Result<SocketAddr> {
        self.discovery.local_addr()
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn announce(&self) -> &Announce {
        self.discovery.announce()
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run until one of the activities stops.
    pub async fn run(self) -> Result<(), CoordinatorError> {
        let Self {
            state,
            sessions,
            discovery,
            http,
        } = self;

        info!(
            session_addr = ?sessions.local_addr().ok(),
            tasks_dir = %state.config.tasks_dir.display(),
            results_dir = %state.config.results_dir.display(),
            "Coordinator running"
        );

        let http_server = {
            let state = state.clone();
            async move {
                match http {
                    Some(listener) => crate::http::serve(listener, state).await,
                    None => std::future::pending().await,
                }
            }
        };

        tokio::select! {
            _ = serve(sessions, state.clone()) => {
                error!("Session accept loop stopped");
            }
            _ = discovery.run() => {
                error!("Discovery responder stopped");
            }
            _ = run_reaper(state.clone()) => {
                error!("Reaper stopped");
            }
            result = http_server => {
                if let Err(e) = result {
                    error!(error = %e, "HTTP server error");
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_can_be_spawned() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::bind(Config {
            discovery_addr: "127.0.0.1:0".parse().unwrap(),
            session_addr: "127.0.0.1:0".parse().unwrap(),
            tasks_dir: dir.path().join("tasks"),
            results_dir: dir.path().join("results"),
            ..Config::default()
        })
        .await
        .unwrap();

        let run = coordinator.run();
        assert_send(&run);

        let handle = tokio::spawn(run);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
