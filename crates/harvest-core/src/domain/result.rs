//! Payload and result shapes exchanged with data sources.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One table row: column name -> cell.
pub type Row = Map<String, Value>;

/// What a source's `retrieve` hands to its `transform`.
///
/// The core never looks inside; it only moves the payload between the two calls.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    Empty,
}

/// Result of a successful `transform`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ModuleResult {
    /// Any JSON value stored as-is under the module key.
    Scalar(Value),

    /// Records stored as an array under the module key.
    Table(Vec<Row>),

    /// Records plus a summary stored under `<module><suffix>`.
    Pair { table: Vec<Row>, summary: Value },

    /// Several named values, each promoted to its own top-level key.
    Sections(Map<String, Value>),
}

impl ModuleResult {
    pub fn table(rows: impl IntoIterator<Item = Row>) -> Self {
        ModuleResult::Table(rows.into_iter().collect())
    }

    /// Interpret a JSON value the way loosely-typed providers emit it:
    /// an array of objects is a table, `{"table": [...], "summary": ...}` is a pair,
    /// anything else is a scalar.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                ModuleResult::Table(items.into_iter().filter_map(into_row).collect())
            }
            Value::Object(mut map)
                if map.len() == 2
                    && map.get("table").is_some_and(Value::is_array)
                    && map.contains_key("summary") =>
            {
                let summary = map.remove("summary").unwrap_or(Value::Null);
                let table = match map.remove("table") {
                    Some(Value::Array(items)) => items.into_iter().filter_map(into_row).collect(),
                    _ => Vec::new(),
                };
                ModuleResult::Pair { table, summary }
            }
            other => ModuleResult::Scalar(other),
        }
    }

    /// Emit `(key, value)` pairs for the document fragment.
    pub fn into_entries(self, name: &str, summary_suffix: &str) -> Vec<(String, Value)> {
        match self {
            ModuleResult::Scalar(v) => vec![(name.to_string(), v)],
            ModuleResult::Table(rows) => vec![(name.to_string(), rows_to_value(rows))],
            ModuleResult::Pair { table, summary } => {
                let mut out = vec![(name.to_string(), rows_to_value(table))];
                if !is_blank(&summary) {
                    out.push((format!("{name}{summary_suffix}"), summary));
                }
                out
            }
            ModuleResult::Sections(map) => map.into_iter().collect(),
        }
    }
}

fn into_row(v: Value) -> Option<Row> {
    match v {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn rows_to_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
