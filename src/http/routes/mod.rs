//! Route handlers organized by resource

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

pub mod crew;
pub mod directory;
pub mod health;
pub mod invoices;
pub mod port_calls;
pub mod service_requests;
pub mod ships;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// `?limit=&offset=` query string
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}

/// `{"message": ...}` acknowledgement body
pub(crate) fn message(text: impl Into<String>) -> JsonValue {
    json!({ "message": text.into() })
}
