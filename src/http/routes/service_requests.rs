//! Service requests raised against a port call.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::models::{Params, Row};

const CREATE_REQUEST: &str = "\
INSERT INTO service_requests (port_call_id, service_id, user_id, notes) \
VALUES (:port_call_id, :service_id, :user_id, :notes) \
RETURNING request_id";

const LIST_SERVICES: &str = "\
SELECT service_id, service_type, description \
FROM services \
ORDER BY service_type";

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub port_call_id: i64,
    pub service_id: i64,
    pub user_id: i64,
    pub notes: Option<String>,
}

/// POST /api/service-requests
async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateServiceRequest>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    let params = Params::new()
        .with("port_call_id", req.port_call_id)
        .with("service_id", req.service_id)
        .with("user_id", req.user_id)
        .with("notes", req.notes);
    let summary = state.procedures.execute(CREATE_REQUEST, &params).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Service request created",
            "request_id": summary.scalar("request_id").cloned().unwrap_or(JsonValue::Null),
        })),
    ))
}

/// GET /api/services - catalogue of bookable services
async fn list_services(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    Ok(Json(state.queries.query(LIST_SERVICES, &Params::new()).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/service-requests", post(create_request))
        .route("/api/services", get(list_services))
}
