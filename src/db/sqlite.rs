//! SQLite backend, used for local development and the integration suites.
//!
//! SQLite has no stored procedures and no server-side cursors; calls that
//! need either surface as execution errors. Foreign keys are enforced on
//! every connection.

use crate::config::{Dialect, TargetConfig};
use crate::db::driver::{Driver, Session, connect_error, timed};
use crate::db::params::{PreparedStatement, bind_sqlite_param};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{CursorHandle, ExecutionSummary, PoolStats, Row};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Either, Executor, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub struct SqliteDriver {
    name: String,
    pool: SqlitePool,
    max_connections: u32,
    statement_timeout: Duration,
}

impl SqliteDriver {
    pub async fn connect(target: &TargetConfig, statement_timeout: Duration) -> DbResult<Self> {
        let options = Self::connect_options(target)?;
        let pool = Self::pool_options(target)
            .connect_with(options)
            .await
            .map_err(|e| connect_error(&target.name, Dialect::Sqlite, &e))?;
        info!(target = %target.name, url = %target.masked_url(), "Opened SQLite database");
        Ok(Self::from_pool(target, pool, statement_timeout))
    }

    pub fn connect_lazy(target: &TargetConfig, statement_timeout: Duration) -> DbResult<Self> {
        let options = Self::connect_options(target)?;
        let pool = Self::pool_options(target).connect_lazy_with(options);
        Ok(Self::from_pool(target, pool, statement_timeout))
    }

    fn from_pool(target: &TargetConfig, pool: SqlitePool, statement_timeout: Duration) -> Self {
        Self {
            name: target.name.clone(),
            pool,
            max_connections: target
                .pool_options
                .max_connections_or_default(Dialect::Sqlite),
            statement_timeout,
        }
    }

    fn connect_options(target: &TargetConfig) -> DbResult<SqliteConnectOptions> {
        let options = SqliteConnectOptions::from_str(&target.connection_string).map_err(|e| {
            DbError::connectivity(
                format!("Invalid SQLite URL for target '{}': {}", target.name, e),
                "Check the target URL format: sqlite:path/to/db.sqlite",
            )
        })?;
        Ok(options.create_if_missing(true).foreign_keys(true))
    }

    fn pool_options(target: &TargetConfig) -> SqlitePoolOptions {
        let opts = &target.pool_options;
        SqlitePoolOptions::new()
            .min_connections(opts.min_connections_or_default())
            .max_connections(opts.max_connections_or_default(Dialect::Sqlite))
            .acquire_timeout(Duration::from_secs(opts.acquire_timeout_or_default()))
            .idle_timeout(Some(Duration::from_secs(opts.idle_timeout_or_default())))
            .test_before_acquire(opts.test_before_acquire_or_default())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn open(&self) -> DbResult<Box<dyn Session>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| connect_error(&self.name, Dialect::Sqlite, &e))?;
        Ok(Box::new(SqliteSession {
            conn,
            in_transaction: false,
            statement_timeout: self.statement_timeout,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
            closed: self.pool.is_closed(),
            ..PoolStats::new(&self.name, Dialect::Sqlite, self.max_connections)
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct SqliteSession {
    conn: PoolConnection<Sqlite>,
    in_transaction: bool,
    statement_timeout: Duration,
}

impl SqliteSession {
    async fn run_control(&mut self, sql: &str) -> DbResult<()> {
        let conn = &mut *self.conn;
        timed(self.statement_timeout, sql, conn.execute(sql))
            .await
            .map(|_| ())
    }
}

fn build_query(stmt: &PreparedStatement) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(&stmt.sql);
    for value in &stmt.values {
        query = bind_sqlite_param(query, value);
    }
    query
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn no_cursors(cursor: &CursorHandle) -> DbError {
    DbError::execution(
        format!("SQLite has no server-side cursors (asked for '{}')", cursor.name),
        None,
        "Cursor-returning procedures need a PostgreSQL target",
    )
}

#[async_trait]
impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch_all(&mut self, stmt: &PreparedStatement) -> DbResult<Vec<Row>> {
        let conn = &mut *self.conn;
        let rows = timed(self.statement_timeout, "query", conn.fetch_all(build_query(stmt))).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    async fn execute(&mut self, stmt: &PreparedStatement) -> DbResult<ExecutionSummary> {
        let conn = &mut *self.conn;
        let run = async move {
            let mut stream = conn.fetch_many(build_query(stmt));
            let mut rows_affected = 0u64;
            let mut first_row = None;
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(result) => rows_affected += result.rows_affected(),
                    Either::Right(row) => {
                        if first_row.is_none() {
                            first_row = Some(row);
                        }
                    }
                }
            }
            Ok::<_, sqlx::Error>((rows_affected, first_row))
        };
        let (rows_affected, first_row) = timed(self.statement_timeout, "execute", run).await?;

        Ok(ExecutionSummary {
            rows_affected,
            out_values: first_row
                .map(|row| row.to_out_values())
                .unwrap_or_default(),
        })
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.run_control("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.run_control("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let result = self.run_control("ROLLBACK").await;
        self.in_transaction = false;
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        self.run_control(&format!("SAVEPOINT {}", quote_ident(name))).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.run_control(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.run_control(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn fetch_cursor(&mut self, cursor: &CursorHandle) -> DbResult<Vec<Row>> {
        Err(no_cursors(cursor))
    }

    async fn close_cursor(&mut self, cursor: &CursorHandle) -> DbResult<()> {
        Err(no_cursors(cursor))
    }

    async fn release(self: Box<Self>, discard: bool) -> DbResult<()> {
        let mut session = self;
        let mut discard = discard;
        let mut result = Ok(());

        if !discard && session.in_transaction {
            warn!("Session released inside an open transaction, rolling back");
            if let Err(e) = session.rollback().await {
                discard = true;
                result = Err(e);
            }
        }

        if discard {
            drop(session.conn.detach());
        }
        result
    }
}
