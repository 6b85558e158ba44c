//! Axum server setup.
//!
//! Graceful shutdown on SIGINT/SIGTERM: in-flight requests get
//! [`GRACEFUL_TIMEOUT`] to finish (a second signal cuts that short), then the
//! connection provider is closed.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::routes;
use crate::db::{ConnectionProvider, CursorAggregator, ProcedureExecutor, QueryExecutor};

pub const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub provider: ConnectionProvider,
    pub queries: QueryExecutor,
    pub procedures: ProcedureExecutor,
    pub cursors: CursorAggregator,
}

impl AppState {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self {
            queries: QueryExecutor::new(provider.clone()),
            procedures: ProcedureExecutor::new(provider.clone()),
            cursors: CursorAggregator::new(provider.clone()),
            provider,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::port_calls::router())
        .merge(routes::ships::router())
        .merge(routes::crew::router())
        .merge(routes::service_requests::router())
        .merge(routes::invoices::router())
        .merge(routes::directory::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve the API until a shutdown signal arrives, then close the provider.
pub async fn run_server(provider: ConnectionProvider, bind_addr: &str) -> Result<(), ServerError> {
    let state = Arc::new(AppState::new(provider.clone()));
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
    info!(addr = %bind_addr, targets = ?provider.target_names(), "Server listening");

    let shutdown_notify = Arc::new(tokio::sync::Notify::new());
    let notify = shutdown_notify.clone();
    let shutdown_signal = async move {
        wait_for_signal().await;
        notify.notify_one();
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

    let result = tokio::select! {
        result = server => {
            match &result {
                Ok(()) => info!("HTTP server stopped"),
                Err(e) => error!(error = %e, "HTTP server error"),
            }
            result
        }
        _ = async {
            shutdown_notify.notified().await;
            info!(
                timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                "Waiting for in-flight requests (send signal again to force exit)..."
            );
            tokio::select! {
                _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                    warn!("Graceful shutdown timeout, forcing exit");
                }
                _ = wait_for_signal() => {
                    warn!("Received second signal, forcing immediate exit");
                }
            }
        } => Ok(()),
    };

    info!("Closing database pools");
    provider.close().await;

    result.map_err(ServerError::from)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
