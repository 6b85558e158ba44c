//! Invoice creation.
//!
//! The header, its lines and the recomputed total are written in one
//! transaction; a failing line leaves no header behind.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::error::DbError;
use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::models::Params;

const INSERT_HEADER: &str = "\
INSERT INTO invoices (port_call_id, invoice_number, issued_on, due_on, total_amount, status) \
VALUES (:port_call_id, :invoice_number, CURRENT_DATE, \
        COALESCE(CAST(:due_on AS DATE), CURRENT_DATE + 30), 0, 'ISSUED') \
RETURNING invoice_id";

const INSERT_LINE: &str = "\
INSERT INTO invoice_lines (invoice_id, service_id, description, quantity, unit_price) \
VALUES (:invoice_id, :service_id, :description, :quantity, :unit_price)";

const UPDATE_TOTAL: &str = "\
UPDATE invoices \
SET total_amount = (SELECT COALESCE(SUM(quantity * unit_price), 0) \
                    FROM invoice_lines WHERE invoice_id = :invoice_id) \
WHERE invoice_id = :invoice_id \
RETURNING total_amount";

#[derive(Debug, Deserialize)]
pub struct InvoiceLineRequest {
    pub service_id: i64,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub port_call_id: i64,
    pub invoice_number: String,
    /// ISO date; thirty days after issue when absent.
    pub due_on: Option<String>,
    pub lines: Vec<InvoiceLineRequest>,
}

/// POST /api/invoices
async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateInvoiceRequest>,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    if req.lines.is_empty() {
        return Err(ApiError::bad_request("An invoice needs at least one line"));
    }
    if req.invoice_number.trim().is_empty() {
        return Err(ApiError::bad_request("'invoice_number' must not be empty"));
    }
    let line_count = req.lines.len();

    let (invoice_id, total_amount) = state
        .procedures
        .transaction(move |tx| {
            Box::pin(async move {
                let header = tx
                    .execute(
                        INSERT_HEADER,
                        &Params::new()
                            .with("port_call_id", req.port_call_id)
                            .with("invoice_number", req.invoice_number)
                            .with("due_on", req.due_on),
                    )
                    .await?;
                let invoice_id = header.scalar("invoice_id").cloned().ok_or_else(|| {
                    DbError::execution(
                        "Invoice insert returned no invoice_id",
                        None,
                        "The header INSERT must return the generated id",
                    )
                })?;

                for line in req.lines {
                    let params = Params::new()
                        .with("invoice_id", invoice_id.clone())
                        .with("service_id", line.service_id)
                        .with("description", line.description)
                        .with("quantity", line.quantity)
                        .with("unit_price", line.unit_price);
                    tx.execute(INSERT_LINE, &params).await?;
                }

                let totals = tx
                    .execute(
                        UPDATE_TOTAL,
                        &Params::new().with("invoice_id", invoice_id.clone()),
                    )
                    .await?;
                let total = totals.scalar("total_amount").cloned().unwrap_or(JsonValue::Null);

                Ok((invoice_id, total))
            })
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "invoice_id": invoice_id,
            "total_amount": total_amount,
            "lines": line_count,
        })),
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/invoices", post(create_invoice))
}
