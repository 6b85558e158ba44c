//! Write-side execution: single auto-committed statements and explicit
//! transactions that span several statements on one lease.

use crate::db::pool::{ConnectionLease, ConnectionProvider};
use crate::error::DbResult;
use crate::models::{ExecutionSummary, Params, Row};
use futures_util::future::BoxFuture;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ProcedureExecutor {
    provider: ConnectionProvider,
}

impl ProcedureExecutor {
    pub fn new(provider: ConnectionProvider) -> Self {
        Self { provider }
    }

    /// Run one DML statement or procedure call in auto-commit mode.
    ///
    /// No transaction block is opened around the statement, so a procedure
    /// may issue its own `COMMIT`/`ROLLBACK`. A failing statement leaves no
    /// partial effects.
    pub async fn execute(&self, sql: &str, params: &Params) -> DbResult<ExecutionSummary> {
        let start = Instant::now();
        let mut lease = self.provider.acquire().await?;
        let result = lease.execute(sql, params).await;
        let lease_id = lease.id().to_string();
        lease.release().await;

        match &result {
            Ok(summary) => debug!(
                lease_id = %lease_id,
                rows_affected = summary.rows_affected,
                out_values = summary.out_values.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Statement committed"
            ),
            Err(e) => warn!(lease_id = %lease_id, error = %e, "Statement failed"),
        }
        result
    }

    /// Start an explicit transaction on a fresh lease.
    pub async fn begin(&self) -> DbResult<TransactionScope> {
        let mut lease = self.provider.acquire().await?;
        if let Err(e) = lease.begin().await {
            lease.release().await;
            return Err(e);
        }

        let scope = TransactionScope {
            id: generate_transaction_id(),
            lease,
            started_at: Instant::now(),
        };
        info!(
            transaction_id = %scope.id,
            lease_id = %scope.lease.id(),
            target = %scope.lease.target(),
            "Transaction started"
        );
        Ok(scope)
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`. When it returns `Err` the transaction is
    /// rolled back and `f`'s error is returned, even if the rollback itself
    /// fails.
    pub async fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut TransactionScope) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        let mut scope = self.begin().await?;
        match f(&mut scope).await {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let id = scope.id.clone();
                if let Err(rollback_err) = scope.rollback().await {
                    error!(
                        transaction_id = %id,
                        error = %e,
                        rollback_error = %rollback_err,
                        "Rollback failed after transaction error"
                    );
                }
                Err(e)
            }
        }
    }
}

fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// An open transaction holding one lease until it is committed or rolled
/// back.
///
/// Dropping a scope without finishing it releases the lease, which rolls the
/// transaction back.
#[derive(Debug)]
pub struct TransactionScope {
    id: String,
    lease: ConnectionLease,
    started_at: Instant,
}

impl TransactionScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        self.lease.target()
    }

    pub async fn execute(&mut self, sql: &str, params: &Params) -> DbResult<ExecutionSummary> {
        self.lease.execute(sql, params).await
    }

    pub async fn query(&mut self, sql: &str, params: &Params) -> DbResult<Vec<Row>> {
        self.lease.query(sql, params).await
    }

    pub async fn query_one(&mut self, sql: &str, params: &Params) -> DbResult<Option<Row>> {
        Ok(self.lease.query(sql, params).await?.into_iter().next())
    }

    pub async fn commit(self) -> DbResult<()> {
        let Self {
            id,
            mut lease,
            started_at,
        } = self;
        let result = lease.commit().await;
        match &result {
            Ok(()) => info!(
                transaction_id = %id,
                duration_ms = started_at.elapsed().as_millis() as u64,
                "Transaction committed"
            ),
            Err(e) => error!(transaction_id = %id, error = %e, "Commit failed"),
        }
        // A failed commit leaves the transaction open; release rolls it back
        lease.release().await;
        result
    }

    pub async fn rollback(self) -> DbResult<()> {
        let Self {
            id,
            mut lease,
            started_at,
        } = self;
        let result = lease.rollback().await;
        match &result {
            Ok(()) => info!(
                transaction_id = %id,
                duration_ms = started_at.elapsed().as_millis() as u64,
                "Transaction rolled back"
            ),
            Err(e) => warn!(transaction_id = %id, error = %e, "Rollback failed"),
        }
        lease.release().await;
        result
    }
}
