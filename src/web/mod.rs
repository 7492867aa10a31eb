//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::probe::Prober;

use axum::{routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tower_http::trace::TraceLayer;

/// How long in-flight requests may keep running after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub prober: Arc<Prober>,
    pub scrape_permits: Arc<Semaphore>,
    pub shutdown: broadcast::Sender<()>,
    /// Set before the shutdown broadcast so late subscribers still see it.
    pub shutting_down: Arc<AtomicBool>,
}

impl AppState {
    /// Cancel running rounds and refuse new ones.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Web server for the exporter.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, prober: Arc<Prober>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            state: AppState {
                config,
                prober,
                scrape_permits: Arc::new(Semaphore::new(1)),
                shutdown,
                shutting_down: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        Router::new()
            .route("/", get(handlers::handle_index))
            .route("/health", get(handlers::handle_health))
            .route(
                &self.state.config.telemetry_path,
                get(handlers::handle_metrics),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until an interrupt signal.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.state.config.listen_address).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for interrupt signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Received exit signal");
        })
        .await
    }

    /// Serve on `listener` until `signal` completes, then drain within the grace period.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        signal: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.routes();
        let mut drain = self.state.shutdown.subscribe();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = drain.recv().await;
                })
                .await
        });

        signal.await;
        // Wakes the graceful shutdown and cancels running probe rounds
        self.state.begin_shutdown();

        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(joined) => joined??,
            Err(_) => tracing::warn!(
                "Server did not drain within {:?}; exiting anyway",
                SHUTDOWN_GRACE
            ),
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}
