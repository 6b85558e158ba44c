//! Read-side execution.
//!
//! Every call borrows its own lease, runs one statement and releases the
//! lease before returning, whether the statement succeeded or not. There are
//! no implicit retries: target fallback happens only while acquiring.

use crate::db::pool::ConnectionProvider;
use crate::error::{DbError, DbResult};
use crate::models::{Page, Params, Row};
use std::time::Instant;
use tracing::{debug, warn};

/// Largest page `query_page` will return.
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Query executor that handles read statements.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    provider: ConnectionProvider,
}

impl QueryExecutor {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self { provider }
    }

    /// Run a read statement and return all matching rows.
    pub async fn query(&self, sql: &str, params: &Params) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let mut lease = self.provider.acquire().await?;
        let result = lease.query(sql, params).await;
        let lease_id = lease.id().to_string();
        lease.release().await;

        match &result {
            Ok(rows) => debug!(
                lease_id = %lease_id,
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Query completed"
            ),
            Err(e) => warn!(lease_id = %lease_id, error = %e, "Query failed"),
        }
        result
    }

    /// First row of the result, if any.
    pub async fn query_one(&self, sql: &str, params: &Params) -> DbResult<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run a count statement and a page statement concurrently, each on its
    /// own lease.
    ///
    /// `page_sql` receives `:limit` and `:offset` on top of `params`, so
    /// `params` must be named (or empty). The first column of the count
    /// statement's first row is the total.
    pub async fn query_page(
        &self,
        count_sql: &str,
        page_sql: &str,
        params: &Params,
        limit: i64,
        offset: i64,
    ) -> DbResult<Page> {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.max(0);
        let page_params = params
            .clone()
            .with("limit", limit)
            .with("offset", offset);

        // join! rather than try_join! so neither lease is dropped mid-flight
        let (count, items) = tokio::join!(
            self.query_one(count_sql, params),
            self.query(page_sql, &page_params)
        );

        Ok(Page {
            total: extract_count(count?)?,
            limit,
            offset,
            items: items?,
        })
    }
}

fn extract_count(row: Option<Row>) -> DbResult<i64> {
    let value = row.and_then(|r| r.into_iter().next().map(|(_, v)| v));
    let total = match &value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        // NUMERIC counts come back as exact strings
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    total.ok_or_else(|| {
        DbError::execution(
            format!("Count statement returned {:?} instead of an integer", value),
            None,
            "Make the count statement select a single integer column",
        )
    })
}
