//! Connection-related data models.

use crate::config::Dialect;
use serde::Serialize;

/// Snapshot of one target's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub target: String,
    pub dialect: &'static str,
    /// Open connections, idle or in use
    pub size: u32,
    pub idle: u32,
    pub max_connections: u32,
    pub closed: bool,
}

impl PoolStats {
    pub fn new(target: impl Into<String>, dialect: Dialect, max_connections: u32) -> Self {
        Self {
            target: target.into(),
            dialect: dialect.as_str(),
            size: 0,
            idle: 0,
            max_connections,
            closed: false,
        }
    }

    pub fn in_use(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }
}

/// Provider-wide view served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub outstanding_leases: usize,
    pub targets: Vec<PoolStats>,
}
