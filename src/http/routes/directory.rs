//! Read-only reference listings.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::models::{Params, Row};

const LIST_CLIENTS: &str = "SELECT client_id, name, email, phone FROM clients ORDER BY name";

const LIST_PORTS: &str = "SELECT port_id, name, country, un_locode FROM ports ORDER BY name";

const LIST_ROLES: &str = "SELECT role_id, role_name FROM roles ORDER BY role_id";

// Never select the password hash
const LIST_USERS: &str = "\
SELECT u.user_id, u.name, u.ship_id, r.role_name \
FROM users u \
JOIN roles r ON u.role_id = r.role_id \
ORDER BY u.name";

async fn list(state: &AppState, sql: &str) -> ApiResult<Json<Vec<Row>>> {
    Ok(Json(state.queries.query(sql, &Params::new()).await?))
}

/// GET /api/clients
async fn list_clients(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    list(&state, LIST_CLIENTS).await
}

/// GET /api/ports
async fn list_ports(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    list(&state, LIST_PORTS).await
}

/// GET /api/roles
async fn list_roles(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    list(&state, LIST_ROLES).await
}

/// GET /api/users
async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Row>>> {
    list(&state, LIST_USERS).await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/clients", get(list_clients))
        .route("/api/ports", get(list_ports))
        .route("/api/roles", get(list_roles))
        .route("/api/users", get(list_users))
}
