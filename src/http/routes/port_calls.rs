//! Port-call listing and per-call invoices.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use super::PageQuery;
use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::models::{Page, Params, Row};

const COUNT_PORT_CALLS: &str = "SELECT COUNT(*) AS total FROM port_calls";

const LIST_PORT_CALLS: &str = "\
SELECT pc.port_call_id, s.ship_id, pc.arrival_at, pc.departure_at, \
       s.name AS ship_name, s.imo_number, c.name AS client_name, \
       p.name AS port_name, p.country AS port_country, pc.berth \
FROM port_calls pc \
JOIN ships s ON pc.ship_id = s.ship_id \
JOIN clients c ON s.owner_id = c.client_id \
JOIN ports p ON pc.port_id = p.port_id \
ORDER BY pc.arrival_at DESC, pc.port_call_id DESC \
LIMIT :limit OFFSET :offset";

const LIST_INVOICES: &str = "\
SELECT invoice_id, invoice_number, issued_on, due_on, total_amount, status \
FROM invoices \
WHERE port_call_id = :port_call_id \
ORDER BY issued_on DESC, invoice_id DESC";

/// GET /api/port-calls - paged, newest arrival first
async fn list_port_calls(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Page>> {
    let result = state
        .queries
        .query_page(
            COUNT_PORT_CALLS,
            LIST_PORT_CALLS,
            &Params::new(),
            page.limit(),
            page.offset(),
        )
        .await?;
    Ok(Json(result))
}

/// GET /api/port-calls/{id}/invoices
async fn list_invoices(
    State(state): State<Arc<AppState>>,
    Path(port_call_id): Path<i64>,
) -> ApiResult<Json<Vec<Row>>> {
    let params = Params::new().with("port_call_id", port_call_id);
    Ok(Json(state.queries.query(LIST_INVOICES, &params).await?))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/port-calls", get(list_port_calls))
        .route("/api/port-calls/{id}/invoices", get(list_invoices))
}
