//! Scripted backend shared by the integration suites.
//!
//! A [`MockDriver`] answers statements from a rule list (first rule whose
//! needle occurs in the prepared SQL wins) and counts every open, release,
//! transaction step and cursor close so tests can check lease accounting.
//!
//! Sessions mimic PostgreSQL's aborted-transaction state: once a statement
//! fails inside a transaction, cursor fetches and closes fail with 25P02
//! until the transaction or a savepoint is rolled back.

#![allow(dead_code)]

use async_trait::async_trait;
use portcall_api::config::Dialect;
use portcall_api::db::{ConnectionProvider, Driver, PreparedStatement, Session};
use portcall_api::error::{DbError, DbResult};
use portcall_api::models::{CursorHandle, ExecutionSummary, OutValue, PoolStats, Row};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Connectivity,
    Execution,
    Duplicate,
    ForeignKey,
    Timeout,
}

impl Failure {
    pub fn to_error(self) -> DbError {
        match self {
            Self::Connectivity => DbError::connectivity("connection reset by peer", "reconnect"),
            Self::Execution => DbError::execution(
                "relation \"nowhere\" does not exist",
                Some("42P01".to_string()),
                "check the statement",
            ),
            Self::Duplicate => DbError::duplicate_key(
                "duplicate key value violates unique constraint \"ships_imo_number_key\"",
                Some("ships_imo_number_key".to_string()),
            ),
            Self::ForeignKey => DbError::referential_integrity(
                "update or delete on table \"ships\" violates foreign key constraint",
                Some("crew_ship_id_fkey".to_string()),
            ),
            Self::Timeout => DbError::statement_timeout("query", 1),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Rows(Vec<Row>),
    Summary(ExecutionSummary),
    Fail(Failure),
}

/// State shared by a driver and every session it opened.
#[derive(Default)]
pub struct MockBackend {
    fail_open: AtomicBool,
    fail_release: AtomicBool,
    fail_close: AtomicBool,
    pool_closed: AtomicBool,
    opens: AtomicUsize,
    open_failures: AtomicUsize,
    releases: AtomicUsize,
    discards: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    rules: Mutex<Vec<(String, Reply)>>,
    cursors: Mutex<HashMap<String, Reply>>,
    statements: Mutex<Vec<String>>,
    closed_cursors: Mutex<Vec<String>>,
    journal: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.rules.lock().unwrap().push((needle.to_string(), reply));
        self
    }

    pub fn cursor(&self, name: &str, reply: Reply) -> &Self {
        self.cursors.lock().unwrap().insert(name.to_string(), reply);
        self
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make every session release report an error after counting it.
    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Make every cursor close report an error after recording it.
    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_failures(&self) -> usize {
        self.open_failures.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn pool_closed(&self) -> bool {
        self.pool_closed.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn closed_cursors(&self) -> Vec<String> {
        self.closed_cursors.lock().unwrap().clone()
    }

    /// Transaction control and cursor events, in the order they succeeded.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.journal.lock().unwrap().push(event);
    }

    fn reply_for(&self, sql: &str) -> Option<Reply> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

pub struct MockDriver {
    name: String,
    backend: Arc<MockBackend>,
}

impl MockDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: Arc::new(MockBackend::default()),
        }
    }

    pub fn backend(&self) -> Arc<MockBackend> {
        Arc::clone(&self.backend)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn open(&self) -> DbResult<Box<dyn Session>> {
        if self.backend.fail_open.load(Ordering::SeqCst) {
            self.backend.open_failures.fetch_add(1, Ordering::SeqCst);
            return Err(DbError::connectivity(
                format!("Target '{}' unavailable: connection refused", self.name),
                "start the database",
            ));
        }
        self.backend.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            backend: Arc::clone(&self.backend),
            in_transaction: false,
            aborted: false,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            closed: self.backend.pool_closed(),
            ..PoolStats::new(&self.name, Dialect::Postgres, 4)
        }
    }

    async fn close(&self) {
        self.backend.pool_closed.store(true, Ordering::SeqCst);
    }
}

struct MockSession {
    backend: Arc<MockBackend>,
    in_transaction: bool,
    aborted: bool,
}

impl MockSession {
    fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if result.is_err() && self.in_transaction {
            self.aborted = true;
        }
        result
    }

    fn check_not_aborted(&self) -> DbResult<()> {
        if self.aborted {
            return Err(DbError::execution(
                "current transaction is aborted, commands ignored until end of transaction block",
                Some("25P02".to_string()),
                "roll back the transaction",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch_all(&mut self, stmt: &PreparedStatement) -> DbResult<Vec<Row>> {
        let result = match self.backend.reply_for(&stmt.sql) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Summary(_)) | None => Ok(Vec::new()),
            Some(Reply::Fail(f)) => Err(f.to_error()),
        };
        self.observe(result)
    }

    async fn execute(&mut self, stmt: &PreparedStatement) -> DbResult<ExecutionSummary> {
        let result = match self.backend.reply_for(&stmt.sql) {
            Some(Reply::Summary(summary)) => Ok(summary),
            Some(Reply::Rows(rows)) => Ok(ExecutionSummary::write_result(rows.len() as u64)),
            Some(Reply::Fail(f)) => Err(f.to_error()),
            None => Ok(ExecutionSummary::write_result(1)),
        };
        self.observe(result)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.backend.begins.fetch_add(1, Ordering::SeqCst);
        self.backend.record("BEGIN".to_string());
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.check_not_aborted()?;
        self.backend.commits.fetch_add(1, Ordering::SeqCst);
        self.backend.record("COMMIT".to_string());
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.backend.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.backend.record("ROLLBACK".to_string());
        self.in_transaction = false;
        self.aborted = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        self.check_not_aborted()?;
        self.backend.record(format!("SAVEPOINT {name}"));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.backend.record(format!("ROLLBACK TO SAVEPOINT {name}"));
        self.aborted = false;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        self.check_not_aborted()?;
        self.backend.record(format!("RELEASE SAVEPOINT {name}"));
        Ok(())
    }

    async fn fetch_cursor(&mut self, cursor: &CursorHandle) -> DbResult<Vec<Row>> {
        self.check_not_aborted()?;
        let reply = self.backend.cursors.lock().unwrap().get(&cursor.name).cloned();
        let result = match reply {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(f)) => Err(f.to_error()),
            _ => Err(DbError::execution(
                format!("cursor \"{}\" does not exist", cursor.name),
                Some("34000".to_string()),
                "check the cursor name",
            )),
        };
        if result.is_ok() {
            self.backend.record(format!("FETCH {}", cursor.name));
        }
        self.observe(result)
    }

    async fn close_cursor(&mut self, cursor: &CursorHandle) -> DbResult<()> {
        self.backend
            .closed_cursors
            .lock()
            .unwrap()
            .push(cursor.name.clone());
        self.check_not_aborted()?;
        if self.backend.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::execution(
                format!("cursor \"{}\" does not exist", cursor.name),
                Some("34000".to_string()),
                "check the cursor name",
            ));
        }
        self.backend.record(format!("CLOSE {}", cursor.name));
        Ok(())
    }

    async fn release(self: Box<Self>, discard: bool) -> DbResult<()> {
        if self.in_transaction {
            self.backend.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        self.backend.releases.fetch_add(1, Ordering::SeqCst);
        if discard {
            self.backend.discards.fetch_add(1, Ordering::SeqCst);
        }
        if self.backend.fail_release.load(Ordering::SeqCst) {
            return Err(DbError::connectivity(
                "server closed the connection unexpectedly",
                "reconnect",
            ));
        }
        Ok(())
    }
}

/// Provider over the given mocks, in priority order.
pub fn provider(drivers: Vec<MockDriver>) -> ConnectionProvider {
    ConnectionProvider::from_drivers(
        drivers
            .into_iter()
            .map(|d| Arc::new(d) as Arc<dyn Driver>)
            .collect(),
    )
}

/// Single healthy mock and a provider over it.
pub fn single() -> (ConnectionProvider, Arc<MockBackend>) {
    let driver = MockDriver::new("primary");
    let backend = driver.backend();
    (provider(vec![driver]), backend)
}

pub fn row(value: JsonValue) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub fn rows(values: &[JsonValue]) -> Vec<Row> {
    values.iter().cloned().map(row).collect()
}

/// Summary whose output columns are the given (column, portal) cursors.
pub fn cursor_summary(cursors: &[(&str, &str)]) -> ExecutionSummary {
    let mut summary = ExecutionSummary::write_result(1);
    for (column, portal) in cursors {
        summary
            .out_values
            .insert(column.to_string(), OutValue::Cursor(CursorHandle::new(*portal)));
    }
    summary
}

/// Summary with scalar output columns.
pub fn scalar_summary(values: &[(&str, JsonValue)]) -> ExecutionSummary {
    let mut summary = ExecutionSummary::write_result(1);
    for (column, value) in values {
        summary
            .out_values
            .insert(column.to_string(), OutValue::Scalar(value.clone()));
    }
    summary
}
