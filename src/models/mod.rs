//! Data models for the port-call API.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

pub use connection::{PoolStats, ProviderStats};
pub use query::{CursorHandle, ExecutionSummary, OutValue, Page, Params, QueryParam, Row};
