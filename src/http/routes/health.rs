//! Liveness banner and database health.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::http::server::AppState;
use crate::models::{Params, ProviderStats};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub pools: ProviderStats,
}

/// GET / - plain banner
async fn banner() -> &'static str {
    "Port-call API is running"
}

/// GET /health - probe the first reachable target
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let probe = state.queries.query("SELECT 1 AS ok", &Params::new()).await;
    let pools = state.provider.stats();

    match probe {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                error: None,
                pools,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                error: Some(e.to_string()),
                pools,
            }),
        ),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
}
