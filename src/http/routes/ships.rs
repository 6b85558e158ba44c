//! Ship endpoints.
//!
//! Writes go through the ship procedures; the detail view is assembled from
//! the three cursors `get_ship_details` opens.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};

use super::message;
use crate::db::CursorSpec;
use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::models::{Params, Row};

const LIST_SHIPS: &str = "\
SELECT ship_id, name, imo_number, ship_type_id, flag_country_id, owner_id \
FROM ships \
ORDER BY name";

const SHIP_DETAILS: &str =
    "SELECT c_details, c_crew, c_port_calls FROM get_ship_details(:ship_id)";

const CREATE_SHIP: &str =
    "CALL create_ship(:name, :imo_number, :ship_type_id, :flag_country_id, :client_id, NULL)";

const UPDATE_SHIP: &str =
    "CALL update_ship(:ship_id, :name, :ship_type_id, :flag_country_id, :client_id)";

const DELETE_SHIP: &str = "CALL delete_ship(:ship_id)";

const SHIP_PORT_CALLS: &str = "\
SELECT pc.port_call_id, pc.port_id, p.name AS port_name, pc.arrival_at, pc.departure_at, pc.berth \
FROM port_calls pc \
JOIN ports p ON pc.port_id = p.port_id \
WHERE pc.ship_id = :ship_id \
ORDER BY pc.arrival_at DESC";

const SHIP_SERVICE_REQUESTS: &str = "\
SELECT sr.request_id, sr.status, sr.requested_at, sr.notes, \
       sv.service_type, pc.arrival_at, p.name AS port_name \
FROM service_requests sr \
JOIN services sv ON sr.service_id = sv.service_id \
JOIN port_calls pc ON sr.port_call_id = pc.port_call_id \
JOIN ports p ON pc.port_id = p.port_id \
WHERE pc.ship_id = :ship_id \
ORDER BY sr.requested_at DESC";

fn detail_cursors() -> [CursorSpec; 3] {
    [
        CursorSpec::single("c_details", "details"),
        CursorSpec::many("c_crew", "crew"),
        CursorSpec::many("c_port_calls", "port_call_history"),
    ]
}

#[derive(Debug, Deserialize)]
pub struct CreateShipRequest {
    pub name: String,
    pub imo_number: String,
    pub ship_type_id: i64,
    pub flag_country_id: i64,
    pub client_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateShipRequest {
    pub name: String,
    pub ship_type_id: i64,
    pub flag_country_id: i64,
    pub client_id: i64,
}

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

/// GET /api/ships
async fn list_ships(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    Ok(Json(state.queries.query(LIST_SHIPS, &Params::new()).await?))
}

/// GET /api/ships/{id} - details, crew and port-call history
async fn get_ship(
    State(state): State<Arc<AppState>>,
    Path(ship_id): Path<i64>,
) -> ApiResult<Json<Map<String, JsonValue>>> {
    let params = Params::new().with("ship_id", ship_id);
    let aggregate = state
        .cursors
        .aggregate(SHIP_DETAILS, &params, &detail_cursors())
        .await?;

    if aggregate.get("details").is_none_or(JsonValue::is_null) {
        return Err(ApiError::not_found("ship", ship_id));
    }
    Ok(Json(aggregate))
}

/// POST /api/ships
async fn create_ship(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateShipRequest>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    require("name", &req.name)?;
    require("imo_number", &req.imo_number)?;

    let params = Params::new()
        .with("name", req.name.trim())
        .with("imo_number", req.imo_number.trim())
        .with("ship_type_id", req.ship_type_id)
        .with("flag_country_id", req.flag_country_id)
        .with("client_id", req.client_id);
    let summary = state.procedures.execute(CREATE_SHIP, &params).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Ship created",
            "ship_id": summary.scalar("ship_id").cloned().unwrap_or(JsonValue::Null),
        })),
    ))
}

/// PUT /api/ships/{id}
async fn update_ship(
    State(state): State<Arc<AppState>>,
    Path(ship_id): Path<i64>,
    Json(req): Json<UpdateShipRequest>,
) -> ApiResult<Json<JsonValue>> {
    require("name", &req.name)?;

    let params = Params::new()
        .with("ship_id", ship_id)
        .with("name", req.name.trim())
        .with("ship_type_id", req.ship_type_id)
        .with("flag_country_id", req.flag_country_id)
        .with("client_id", req.client_id);
    state.procedures.execute(UPDATE_SHIP, &params).await?;

    Ok(Json(message(format!("Ship {} updated", ship_id))))
}

/// DELETE /api/ships/{id} - refused while crew or port calls reference it
async fn delete_ship(
    State(state): State<Arc<AppState>>,
    Path(ship_id): Path<i64>,
) -> ApiResult<Json<JsonValue>> {
    let params = Params::new().with("ship_id", ship_id);
    state.procedures.execute(DELETE_SHIP, &params).await?;
    Ok(Json(message(format!("Ship {} deleted", ship_id))))
}

/// GET /api/ships/{id}/port-calls
async fn list_ship_port_calls(
    State(state): State<Arc<AppState>>,
    Path(ship_id): Path<i64>,
) -> ApiResult<Json<Vec<Row>>> {
    let params = Params::new().with("ship_id", ship_id);
    Ok(Json(state.queries.query(SHIP_PORT_CALLS, &params).await?))
}

/// GET /api/ships/{id}/service-requests
async fn list_ship_service_requests(
    State(state): State<Arc<AppState>>,
    Path(ship_id): Path<i64>,
) -> ApiResult<Json<Vec<Row>>> {
    let params = Params::new().with("ship_id", ship_id);
    Ok(Json(state.queries.query(SHIP_SERVICE_REQUESTS, &params).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/ships", get(list_ships).post(create_ship))
        .route(
            "/api/ships/{id}",
            get(get_ship).put(update_ship).delete(delete_ship),
        )
        .route("/api/ships/{id}/port-calls", get(list_ship_port_calls))
        .route(
            "/api/ships/{id}/service-requests",
            get(list_ship_service_requests),
        )
}
