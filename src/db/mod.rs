//! Database access layer.
//!
//! This module provides:
//! - Connection provider with ordered target fallback and leases
//! - Read, write and transactional executors
//! - Multi-cursor aggregation
//! - Placeholder rewriting and row decoding
//! - PostgreSQL and SQLite backends behind the `Driver` / `Session` seam

pub mod cursor;
pub mod driver;
pub mod executor;
pub mod params;
pub mod pool;
pub mod postgres;
pub mod procedure;
pub mod sqlite;
pub mod types;

pub use cursor::{CursorAggregator, CursorShape, CursorSpec};
pub use driver::{Driver, Session};
pub use executor::QueryExecutor;
pub use params::{PreparedStatement, prepare};
pub use pool::{ConnectionLease, ConnectionProvider};
pub use procedure::{ProcedureExecutor, TransactionScope};
