//! Connection provider and leases.
//!
//! The provider owns every configured target, each behind its own bounded
//! pool, in priority order. A call borrows exactly one [`ConnectionLease`]
//! from the first target that can hand out a connection and gives it back
//! with [`ConnectionLease::release`] before returning to its caller.

use crate::config::{Dialect, TargetConfig};
use crate::db::driver::{Driver, Session};
use crate::db::params::prepare;
use crate::db::postgres::PgDriver;
use crate::db::sqlite::SqliteDriver;
use crate::error::{DbError, DbResult};
use crate::models::{CursorHandle, ExecutionSummary, Params, PoolStats, ProviderStats, Row};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared handle to all database targets.
///
/// Cheap to clone; clones share the same pools and lease counter.
#[derive(Clone)]
pub struct ConnectionProvider {
    targets: Arc<Vec<Arc<dyn Driver>>>,
    outstanding: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field(
                "targets",
                &self.targets.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("outstanding", &self.outstanding_leases())
            .finish()
    }
}

impl ConnectionProvider {
    /// Create a pool per target, in the given priority order.
    ///
    /// A target whose first connection fails is still registered with a
    /// lazily connecting pool so later calls can reach it once it recovers;
    /// one whose pool cannot even be built is left out. If no target
    /// connects at all every pool built so far is closed and the provider is
    /// not created.
    pub async fn connect(
        targets: &[TargetConfig],
        statement_timeout: Duration,
    ) -> DbResult<Self> {
        if targets.is_empty() {
            return Err(DbError::connectivity(
                "No database targets configured",
                "Pass at least one --target",
            ));
        }

        let mut drivers: Vec<Arc<dyn Driver>> = Vec::with_capacity(targets.len());
        let mut connected = 0usize;
        let mut last_error = None;

        for target in targets {
            info!(
                target = %target.name,
                dialect = %target.dialect,
                url = %target.masked_url(),
                "Creating pool"
            );
            let eager = match target.dialect {
                Dialect::Postgres => PgDriver::connect(target, statement_timeout)
                    .await
                    .map(|d| Arc::new(d) as Arc<dyn Driver>),
                Dialect::Sqlite => SqliteDriver::connect(target, statement_timeout)
                    .await
                    .map(|d| Arc::new(d) as Arc<dyn Driver>),
            };

            match eager {
                Ok(driver) => {
                    connected += 1;
                    drivers.push(driver);
                }
                Err(e) => {
                    match connect_lazy(target, statement_timeout) {
                        Ok(lazy) => {
                            warn!(
                                target = %target.name,
                                error = %e,
                                "Target unreachable at startup, will retry on demand"
                            );
                            drivers.push(lazy);
                        }
                        Err(lazy_error) => error!(
                            target = %target.name,
                            error = %lazy_error,
                            "Target skipped, its pool cannot be created"
                        ),
                    }
                    last_error = Some(e);
                }
            }
        }

        if connected == 0 {
            for driver in &drivers {
                driver.close().await;
            }
            return Err(last_error.unwrap_or_else(|| {
                DbError::connectivity("No target could be reached", "Check the target URLs")
            }));
        }

        info!(
            targets = drivers.len(),
            connected = connected,
            "Connection provider ready"
        );
        Ok(Self::from_drivers(drivers))
    }

    /// Build a provider over already constructed drivers, in priority order.
    pub fn from_drivers(drivers: Vec<Arc<dyn Driver>>) -> Self {
        Self {
            targets: Arc::new(drivers),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name().to_string()).collect()
    }

    /// Borrow a connection from the first target that yields one.
    ///
    /// Every call walks the full priority list; a target that failed on the
    /// previous call is tried again.
    pub async fn acquire(&self) -> DbResult<ConnectionLease> {
        let mut failures = Vec::new();

        for driver in self.targets.iter() {
            match driver.open().await {
                Ok(session) => {
                    if !failures.is_empty() {
                        info!(
                            target = %driver.name(),
                            skipped = failures.len(),
                            "Served by fallback target"
                        );
                    }
                    return Ok(self.lease(driver.name(), session));
                }
                Err(e) => {
                    warn!(target = %driver.name(), error = %e, "Target failed, trying next");
                    failures.push(format!("{}: {}", driver.name(), e));
                }
            }
        }

        error!(attempted = failures.len(), "No target could provide a connection");
        Err(DbError::connectivity(
            format!("All targets failed ({})", failures.join("; ")),
            "Check that at least one database target is running and reachable",
        ))
    }

    /// Borrow a connection from one named target, without fallback.
    pub async fn acquire_from(&self, target: &str) -> DbResult<ConnectionLease> {
        let driver = self
            .targets
            .iter()
            .find(|t| t.name() == target)
            .ok_or_else(|| {
                DbError::connectivity(
                    format!("Unknown target '{}'", target),
                    format!("Configured targets: {}", self.target_names().join(", ")),
                )
            })?;
        let session = driver.open().await?;
        Ok(self.lease(driver.name(), session))
    }

    fn lease(&self, target: &str, session: Box<dyn Session>) -> ConnectionLease {
        let count = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        let lease = ConnectionLease {
            id: generate_lease_id(),
            target: target.to_string(),
            session: Some(session),
            broken: false,
            outstanding: Arc::clone(&self.outstanding),
            acquired_at: Instant::now(),
        };
        debug!(lease_id = %lease.id, target = %target, outstanding = count, "Lease acquired");
        lease
    }

    /// Leases handed out and not yet released.
    pub fn outstanding_leases(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.targets.iter().map(|t| t.stats()).collect()
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            outstanding_leases: self.outstanding_leases(),
            targets: self.pool_stats(),
        }
    }

    /// Close every pool. Called once at shutdown.
    pub async fn close(&self) {
        for driver in self.targets.iter() {
            info!(target = %driver.name(), "Closing pool");
            driver.close().await;
        }
        let leaked = self.outstanding_leases();
        if leaked > 0 {
            warn!(outstanding = leaked, "Pools closed with leases still outstanding");
        }
        info!("All pools closed");
    }
}

fn connect_lazy(target: &TargetConfig, statement_timeout: Duration) -> DbResult<Arc<dyn Driver>> {
    Ok(match target.dialect {
        Dialect::Postgres => Arc::new(PgDriver::connect_lazy(target, statement_timeout)?),
        Dialect::Sqlite => Arc::new(SqliteDriver::connect_lazy(target, statement_timeout)?),
    })
}

fn already_released() -> DbError {
    DbError::connectivity("Lease already released", "Acquire a new lease")
}

fn generate_lease_id() -> String {
    format!("lease_{}", uuid::Uuid::new_v4().simple())
}

/// One borrowed connection, owned by one in-flight call.
///
/// Call [`release`](Self::release) when done. A lease dropped without it
/// (panic, cancelled request) is released on a spawned task instead. A
/// lease whose session hit a connection-level failure or a statement timeout
/// is discarded rather than returned to its pool.
pub struct ConnectionLease {
    id: String,
    target: String,
    session: Option<Box<dyn Session>>,
    broken: bool,
    outstanding: Arc<AtomicUsize>,
    acquired_at: Instant,
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("broken", &self.broken)
            .field("released", &self.session.is_none())
            .finish_non_exhaustive()
    }
}

impl ConnectionLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the target that served this lease.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn session(&mut self) -> DbResult<&mut Box<dyn Session>> {
        self.session.as_mut().ok_or_else(already_released)
    }

    fn observe<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(e) = &result
            && e.poisons_connection()
        {
            warn!(lease_id = %self.id, target = %self.target, error = %e, "Connection marked broken");
            self.broken = true;
        }
        result
    }

    /// Run a read statement and return every row.
    pub async fn query(&mut self, sql: &str, params: &Params) -> DbResult<Vec<Row>> {
        let session = self.session.as_mut().ok_or_else(already_released)?;
        let stmt = prepare(sql, params, session.dialect())?;
        debug!(lease_id = %self.id, sql = %stmt.sql, params = stmt.values.len(), "Executing query");
        let result = session.fetch_all(&stmt).await;
        self.observe(result)
    }

    /// Run DML or a procedure call.
    pub async fn execute(&mut self, sql: &str, params: &Params) -> DbResult<ExecutionSummary> {
        let session = self.session.as_mut().ok_or_else(already_released)?;
        let stmt = prepare(sql, params, session.dialect())?;
        debug!(lease_id = %self.id, sql = %stmt.sql, params = stmt.values.len(), "Executing statement");
        let result = session.execute(&stmt).await;
        self.observe(result)
    }

    pub async fn begin(&mut self) -> DbResult<()> {
        let result = self.session()?.begin().await;
        self.observe(result)
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let result = self.session()?.commit().await;
        self.observe(result)
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let result = self.session()?.rollback().await;
        self.observe(result)
    }

    pub async fn savepoint(&mut self, name: &str) -> DbResult<()> {
        let result = self.session()?.savepoint(name).await;
        self.observe(result)
    }

    pub async fn rollback_to_savepoint(&mut self, name: &str) -> DbResult<()> {
        let result = self.session()?.rollback_to_savepoint(name).await;
        self.observe(result)
    }

    pub async fn release_savepoint(&mut self, name: &str) -> DbResult<()> {
        let result = self.session()?.release_savepoint(name).await;
        self.observe(result)
    }

    pub async fn fetch_cursor(&mut self, cursor: &CursorHandle) -> DbResult<Vec<Row>> {
        let result = self.session()?.fetch_cursor(cursor).await;
        self.observe(result)
    }

    pub async fn close_cursor(&mut self, cursor: &CursorHandle) -> DbResult<()> {
        let result = self.session()?.close_cursor(cursor).await;
        self.observe(result)
    }

    /// Return the connection to its pool, or discard it if it is broken.
    ///
    /// Failures are logged and never reported to the caller, so a release
    /// problem cannot hide the outcome of the work done on the lease.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            release_session(
                &self.id,
                &self.target,
                session,
                self.broken,
                &self.outstanding,
                self.acquired_at,
            )
            .await;
        }
    }
}

async fn release_session(
    id: &str,
    target: &str,
    session: Box<dyn Session>,
    discard: bool,
    outstanding: &AtomicUsize,
    acquired_at: Instant,
) {
    let held_ms = acquired_at.elapsed().as_millis() as u64;
    let result = session.release(discard).await;
    let remaining = outstanding.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);

    match result {
        Ok(()) if discard => {
            warn!(lease_id = %id, target = %target, held_ms, "Lease discarded")
        }
        Ok(()) => {
            debug!(lease_id = %id, target = %target, held_ms, outstanding = remaining, "Lease released")
        }
        Err(e) => {
            error!(lease_id = %id, target = %target, error = %e, "Lease release failed")
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let id = std::mem::take(&mut self.id);
        let target = std::mem::take(&mut self.target);
        let discard = self.broken;
        let outstanding = Arc::clone(&self.outstanding);
        let acquired_at = self.acquired_at;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    warn!(
                        lease_id = %id,
                        target = %target,
                        "Lease released via Drop - call release() explicitly"
                    );
                    release_session(&id, &target, session, discard, &outstanding, acquired_at)
                        .await;
                });
            }
            Err(_) => {
                // No runtime left to run the async release on
                outstanding.fetch_sub(1, Ordering::SeqCst);
                drop(session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_id_format() {
        let id = generate_lease_id();
        assert!(id.starts_with("lease_"));
        assert_eq!(id.len(), "lease_".len() + 32);
        assert_ne!(id, generate_lease_id());
    }

    #[tokio::test]
    async fn test_connect_requires_targets() {
        let err = ConnectionProvider::connect(&[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_unknown_target_is_connectivity_error() {
        let provider = ConnectionProvider::from_drivers(Vec::new());
        let err = provider.acquire_from("nope").await.unwrap_err();
        assert!(matches!(err, DbError::Connectivity { .. }));
        assert_eq!(provider.outstanding_leases(), 0);
    }

    #[tokio::test]
    async fn test_empty_provider_acquire_fails() {
        let provider = ConnectionProvider::from_drivers(Vec::new());
        assert!(matches!(
            provider.acquire().await,
            Err(DbError::Connectivity { .. })
        ));
    }
}
