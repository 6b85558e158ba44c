//! Crew endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::message;
use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::models::{Params, Row};

const LIST_CREW: &str = "\
SELECT cm.crew_id, cm.full_name, cm.role, cm.nationality, s.name AS ship_name \
FROM crew cm \
JOIN ships s ON cm.ship_id = s.ship_id \
ORDER BY cm.crew_id DESC";

const ASSIGN_CREW: &str = "CALL assign_crew_member(:1, :2, :3, :4, :5)";

const UPDATE_CREW: &str =
    "CALL update_crew_member(:crew_id, :full_name, :role, :nationality)";

/// `deleted` is an OUT parameter holding the number of removed rows.
const DELETE_CREW: &str = "CALL delete_crew_member(:crew_id, NULL)";

#[derive(Debug, Deserialize)]
pub struct AssignCrewRequest {
    pub ship_id: i64,
    pub full_name: String,
    pub role: String,
    pub passport: Option<String>,
    pub nationality: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCrewRequest {
    pub full_name: String,
    pub role: String,
    pub nationality: Option<String>,
}

/// GET /api/crew
async fn list_crew(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    Ok(Json(state.queries.query(LIST_CREW, &Params::new()).await?))
}

/// POST /api/crew - assign a crew member to a ship
async fn assign_crew(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssignCrewRequest>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    if req.full_name.trim().is_empty() {
        return Err(ApiError::bad_request("'full_name' must not be empty"));
    }

    let params = Params::new()
        .push(req.ship_id)
        .push(req.full_name.trim())
        .push(req.role)
        .push(req.passport)
        .push(req.nationality);
    state.procedures.execute(ASSIGN_CREW, &params).await?;

    Ok((StatusCode::CREATED, Json(message("Crew member assigned"))))
}

/// PUT /api/crew/{id}
async fn update_crew(
    State(state): State<Arc<AppState>>,
    Path(crew_id): Path<i64>,
    Json(req): Json<UpdateCrewRequest>,
) -> ApiResult<Json<JsonValue>> {
    let params = Params::new()
        .with("crew_id", crew_id)
        .with("full_name", req.full_name)
        .with("role", req.role)
        .with("nationality", req.nationality);
    state.procedures.execute(UPDATE_CREW, &params).await?;

    Ok(Json(message(format!("Crew member {} updated", crew_id))))
}

/// DELETE /api/crew/{id}
async fn delete_crew(
    State(state): State<Arc<AppState>>,
    Path(crew_id): Path<i64>,
) -> ApiResult<Json<JsonValue>> {
    let params = Params::new().with("crew_id", crew_id);
    let summary = state.procedures.execute(DELETE_CREW, &params).await?;

    let deleted = summary
        .scalar("deleted")
        .and_then(JsonValue::as_i64)
        .unwrap_or(summary.rows_affected as i64);
    if deleted == 0 {
        return Err(ApiError::not_found("crew member", crew_id));
    }

    Ok(Json(message(format!("Crew member {} deleted", crew_id))))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/crew", get(list_crew).post(assign_crew))
        .route("/api/crew/{id}", put(update_crew).delete(delete_crew))
}
