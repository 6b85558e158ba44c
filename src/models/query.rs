//! Values that cross the data-access boundary.
//!
//! Parameters go in, rows, execution summaries and pages come out.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One result row: column name to JSON value, in select-list order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Bound as JSON on PostgreSQL, as text on SQLite
    Json(JsonValue),
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Request bodies arrive as JSON; scalars bind as their natural type and
/// arrays or objects bind as JSON documents.
impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

/// Parameter set for one statement.
///
/// Either positional (`:1`, `$1`, `?`) or named (`:ship_id`). Both styles may
/// be built on the same value, but a statement that receives both is
/// rejected when it is prepared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub(crate) positional: Vec<QueryParam>,
    pub(crate) named: Vec<(String, QueryParam)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QueryParam>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: Vec::new(),
        }
    }

    /// Append a positional value.
    pub fn push(mut self, value: impl Into<QueryParam>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add or replace a named value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .named
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.named.push((name, value)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a named value, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.named
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Handle to a server-side cursor returned by a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorHandle {
    pub name: String,
}

impl CursorHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Output value of a procedure call, keyed by output column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutValue {
    Scalar(JsonValue),
    Cursor(CursorHandle),
}

/// Result of a write or procedure call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub out_values: BTreeMap<String, OutValue>,
}

impl ExecutionSummary {
    pub fn write_result(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            out_values: BTreeMap::new(),
        }
    }

    pub fn scalar(&self, name: &str) -> Option<&JsonValue> {
        match self.out_values.get(name) {
            Some(OutValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    pub fn cursor(&self, name: &str) -> Option<&CursorHandle> {
        match self.out_values.get(name) {
            Some(OutValue::Cursor(c)) => Some(c),
            _ => None,
        }
    }
}

/// One page of a listing plus the total row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_conversions() {
        assert_eq!(QueryParam::from(42), QueryParam::Int(42));
        assert_eq!(QueryParam::from("hello"), QueryParam::String("hello".to_string()));
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
    }

    #[test]
    fn test_query_param_from_json() {
        assert_eq!(QueryParam::from(json!(7)), QueryParam::Int(7));
        assert_eq!(QueryParam::from(json!(2.5)), QueryParam::Float(2.5));
        assert_eq!(QueryParam::from(json!("x")), QueryParam::String("x".into()));
        assert_eq!(QueryParam::from(json!(null)), QueryParam::Null);
        assert_eq!(
            QueryParam::from(json!({"a": 1})),
            QueryParam::Json(json!({"a": 1}))
        );
    }

    #[test]
    fn test_named_params_replace_case_insensitively() {
        let params = Params::new().with("ShipId", 1).with("shipid", 2);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("SHIPID"), Some(&QueryParam::Int(2)));
    }

    #[test]
    fn test_summary_accessors() {
        let mut summary = ExecutionSummary::write_result(1);
        summary
            .out_values
            .insert("id".into(), OutValue::Scalar(json!(9)));
        summary.out_values.insert(
            "c_crew".into(),
            OutValue::Cursor(CursorHandle::new("<unnamed portal 1>")),
        );
        assert_eq!(summary.scalar("id"), Some(&json!(9)));
        assert_eq!(summary.cursor("id"), None);
        assert_eq!(summary.cursor("c_crew").map(|c| c.name.as_str()), Some("<unnamed portal 1>"));
    }

    #[test]
    fn test_summary_serialization_skips_empty_out_values() {
        let value = serde_json::to_value(ExecutionSummary::write_result(3)).unwrap();
        assert_eq!(value, json!({"rows_affected": 3}));
    }
}
