//! Port-call API library
//!
//! Data-access and transaction boundary for a port-call / fleet backend:
//! a connection provider with ordered target fallback, read and write
//! executors, multi-cursor aggregation, and the axum routes built on them.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;

pub use config::Config;
pub use error::DbError;
