//! Multi-cursor aggregation.
//!
//! Some procedures return several result sets as cursor output values
//! (`get_ship_details` hands back the ship, its crew and its port-call
//! history). [`CursorAggregator`] calls the procedure, drains every cursor,
//! closes all of them and folds the rows into one labelled JSON object.
//!
//! Server-side cursors only live inside the transaction that opened them, so
//! the call, the drains and the closes all run in one transaction on one
//! lease.

use crate::db::pool::{ConnectionLease, ConnectionProvider};
use crate::error::{DbError, DbResult};
use crate::models::{CursorHandle, OutValue, Params, Row};
use serde_json::{Map, Value as JsonValue};
use std::time::Instant;
use tracing::{debug, info, warn};

const DRAIN_SAVEPOINT: &str = "cursor_drain";

/// How a drained cursor appears in the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    /// First row as an object, or `null` when the cursor is empty.
    Single,
    /// Every row, as an array.
    Many,
}

/// Maps one cursor output of the procedure to a field of the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSpec {
    /// Output column holding the cursor.
    pub out_name: String,
    /// Field name in the aggregate.
    pub label: String,
    pub shape: CursorShape,
}

impl CursorSpec {
    pub fn single(out_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            out_name: out_name.into(),
            label: label.into(),
            shape: CursorShape::Single,
        }
    }

    pub fn many(out_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            out_name: out_name.into(),
            label: label.into(),
            shape: CursorShape::Many,
        }
    }

    fn shape_rows(&self, rows: Vec<Row>) -> JsonValue {
        match self.shape {
            CursorShape::Single => rows
                .into_iter()
                .next()
                .map(JsonValue::Object)
                .unwrap_or(JsonValue::Null),
            CursorShape::Many => JsonValue::Array(rows.into_iter().map(JsonValue::Object).collect()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CursorAggregator {
    provider: ConnectionProvider,
}

impl CursorAggregator {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self { provider }
    }

    /// Call a cursor-returning procedure and assemble its result sets.
    ///
    /// Errors raised by the call itself are returned as they are. Any cursor
    /// that is missing or fails to drain turns into
    /// [`DbError::Aggregation`]; every cursor the call returned is closed
    /// first either way.
    pub async fn aggregate(
        &self,
        sql: &str,
        params: &Params,
        specs: &[CursorSpec],
    ) -> DbResult<Map<String, JsonValue>> {
        let start = Instant::now();
        let mut lease = self.provider.acquire().await?;
        let result = aggregate_on(&mut lease, sql, params, specs).await;
        let lease_id = lease.id().to_string();
        lease.release().await;

        match &result {
            Ok(_) => info!(
                lease_id = %lease_id,
                cursors = specs.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Aggregate assembled"
            ),
            Err(e) => warn!(lease_id = %lease_id, error = %e, "Aggregation failed"),
        }
        result
    }
}

async fn aggregate_on(
    lease: &mut ConnectionLease,
    sql: &str,
    params: &Params,
    specs: &[CursorSpec],
) -> DbResult<Map<String, JsonValue>> {
    lease.begin().await?;

    let summary = match lease.execute(sql, params).await {
        Ok(summary) => summary,
        Err(e) => {
            rollback_quietly(lease).await;
            return Err(e);
        }
    };

    let mut aggregate = Map::new();
    let mut failure = None;

    for spec in specs {
        let Some(handle) = summary.cursor(&spec.out_name) else {
            failure = Some(DbError::aggregation(
                &spec.out_name,
                "procedure did not return this cursor",
            ));
            break;
        };
        match drain(lease, handle).await {
            Ok(rows) => {
                debug!(cursor = %spec.out_name, rows = rows.len(), "Cursor drained");
                aggregate.insert(spec.label.clone(), spec.shape_rows(rows));
            }
            Err(e) => {
                failure = Some(DbError::aggregation(&spec.out_name, e.to_string()));
                break;
            }
        }
    }

    // Close every cursor the call returned, drained or not
    let handles: Vec<(&String, &CursorHandle)> = summary
        .out_values
        .iter()
        .filter_map(|(name, value)| match value {
            OutValue::Cursor(handle) => Some((name, handle)),
            OutValue::Scalar(_) => None,
        })
        .collect();
    for (name, handle) in handles {
        match lease.close_cursor(handle).await {
            Ok(()) => debug!(cursor = %name, "Cursor closed"),
            Err(e) => warn!(cursor = %name, error = %e, "Cursor close failed"),
        }
    }

    if let Some(e) = failure {
        rollback_quietly(lease).await;
        return Err(e);
    }

    lease.commit().await?;
    Ok(aggregate)
}

/// Fetch one cursor under a savepoint.
///
/// A failed fetch aborts the enclosing transaction on PostgreSQL; rolling
/// back to the savepoint makes it usable again so the remaining cursors can
/// still be closed.
async fn drain(lease: &mut ConnectionLease, handle: &CursorHandle) -> DbResult<Vec<Row>> {
    lease.savepoint(DRAIN_SAVEPOINT).await?;
    match lease.fetch_cursor(handle).await {
        Ok(rows) => {
            lease.release_savepoint(DRAIN_SAVEPOINT).await?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(undo) = lease.rollback_to_savepoint(DRAIN_SAVEPOINT).await {
                warn!(cursor = %handle.name, error = %undo, "Rollback to savepoint failed");
            }
            Err(e)
        }
    }
}

async fn rollback_quietly(lease: &mut ConnectionLease) {
    if let Err(e) = lease.rollback().await {
        warn!(lease_id = %lease.id(), error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|i| {
                let mut r = Row::new();
                r.insert("id".into(), json!(i));
                r
            })
            .collect()
    }

    #[test]
    fn test_single_shape_collapses_to_first_row() {
        let spec = CursorSpec::single("c_details", "details");
        assert_eq!(spec.shape_rows(rows(2)), json!({"id": 1}));
        assert_eq!(spec.shape_rows(Vec::new()), JsonValue::Null);
    }

    #[test]
    fn test_many_shape_keeps_every_row() {
        let spec = CursorSpec::many("c_crew", "crew");
        assert_eq!(spec.shape_rows(rows(2)), json!([{"id": 1}, {"id": 2}]));
        assert_eq!(spec.shape_rows(Vec::new()), json!([]));
    }
}
