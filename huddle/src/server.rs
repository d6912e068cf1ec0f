//! Server lifecycle management
//!
//! Starts the HTTP/WebSocket server and tears everything down on
//! SIGINT/SIGTERM: stop accepting, let connections drain for a grace
//! period, then close the media router.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use huddle_api::http::{create_router, AppState};
use huddle_core::Config;
use huddle_sfu::{LocalRouter, Registry};

/// Huddle server - owns the shared services for its lifetime
pub struct HuddleServer {
    config: Config,
    registry: Arc<Registry>,
    router: Arc<LocalRouter>,
}

impl HuddleServer {
    pub const fn new(config: Config, registry: Arc<Registry>, router: Arc<LocalRouter>) -> Self {
        Self {
            config,
            registry,
            router,
        }
    }

    /// Start serving and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(
            Arc::clone(&self.registry),
            self.router.clone(),
            self.config.clone(),
        );
        let http_handle = self.start_http_server(state.clone(), shutdown_rx).await?;

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
        self.shutdown(&state).await;

        Ok(())
    }

    async fn shutdown(&self, state: &AppState) {
        info!("Shutting down Huddle server...");

        // 1. Give open connections a moment to leave on their own
        let drain_timeout = Duration::from_secs(self.config.server.shutdown_grace_seconds);
        let drain_poll_interval = Duration::from_millis(200);
        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            let remaining = state.dispatcher.connection_count();
            if remaining == 0 {
                info!("All connections drained");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Drain timeout reached with {} connection(s) still active, proceeding with shutdown",
                    remaining
                );
                break;
            }
            tokio::time::sleep(drain_poll_interval).await;
        }

        // 2. Close the media router; every transport goes with it
        let stats = self.registry.stats();
        info!(
            rooms = stats.rooms,
            peers = stats.peers,
            "Closing media router"
        );
        self.router.shutdown();

        info!("Huddle server shut down complete");
    }

    async fn start_http_server(
        &self,
        state: AppState,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_addr: std::net::SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let http_router = create_router(state);
        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, http_router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
