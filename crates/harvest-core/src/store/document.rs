//! Persisted document helpers: key ordering and the module/history merge.
//!
//! The merge works on `serde_json::Value` so fields this version does not know about
//! (older or newer writers) survive a read-merge-write cycle.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::domain::round4;

pub type Document = Map<String, Value>;

pub const AUDIT_KEY: &str = "Audit";
const HISTORY_KEY: &str = "History";
const CUMULATIVE_KEY: &str = "CumulativeTimeSeconds";
const TOTAL_KEY: &str = "TotalExecutionTimeSeconds";
/// Name of the total used by records written before `TotalExecutionTimeSeconds`.
const LEGACY_TOTAL_KEY: &str = "ExecutionTimeSeconds";

/// Canonical order ∩ present keys, then unknown keys in encounter order, then `Audit`.
pub fn reorder_keys(mut doc: Document, module_order: &[String]) -> Document {
    let mut out = Map::with_capacity(doc.len());
    for key in module_order {
        if key == AUDIT_KEY {
            continue;
        }
        if let Some(value) = doc.shift_remove(key) {
            out.insert(key.clone(), value);
        }
    }
    let audit = doc.shift_remove(AUDIT_KEY);
    for (key, value) in doc {
        out.insert(key, value);
    }
    if let Some(audit) = audit {
        out.insert(AUDIT_KEY.to_string(), audit);
    }
    out
}

/// Merge a new fragment over an existing document.
///
/// Module keys: new wins, unrelated old keys survive. `Audit`: old fields survive unless
/// the new block carries them, history is old ++ new deduplicated, and the cumulative
/// total is recomputed from the merged history.
pub fn merge_documents(mut existing: Document, fragment: Document) -> Document {
    let old_audit = existing.shift_remove(AUDIT_KEY);
    let mut new_audit = None;

    for (key, value) in fragment {
        if key == AUDIT_KEY {
            new_audit = Some(value);
        } else {
            existing.insert(key, value);
        }
    }

    let mut audit = match old_audit {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let mut history = take_history(&mut audit);

    if let Some(Value::Object(new_map)) = new_audit {
        for (key, value) in new_map {
            if key == HISTORY_KEY {
                if let Value::Array(items) = value {
                    history.extend(items);
                }
            } else {
                audit.insert(key, value);
            }
        }
    }

    let history = dedup_history(history);
    let total = cumulative_secs(&history);
    // History, CumulativeTimeSeconds の順で末尾に置く
    audit.shift_remove(CUMULATIVE_KEY);
    audit.insert(HISTORY_KEY.to_string(), Value::Array(history));
    audit.insert(CUMULATIVE_KEY.to_string(), Value::from(total));

    existing.insert(AUDIT_KEY.to_string(), Value::Object(audit));
    existing
}

fn take_history(audit: &mut Map<String, Value>) -> Vec<Value> {
    match audit.shift_remove(HISTORY_KEY) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Identity of a history entry: its run id, or the legacy composite key.
fn history_key(record: &Value) -> String {
    if let Some(id) = record.get("RunId").and_then(Value::as_str) {
        return format!("id:{id}");
    }
    let field = |name: &str| record.get(name).map(Value::to_string).unwrap_or_default();
    let total = record
        .get(TOTAL_KEY)
        .or_else(|| record.get(LEGACY_TOTAL_KEY))
        .map(Value::to_string)
        .unwrap_or_default();
    format!("legacy:{}|{}|{}", field("Timestamp"), total, field("ErrorCount"))
}

/// Keep the first occurrence of every history entry.
pub fn dedup_history(history: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    history
        .into_iter()
        .filter(|record| seen.insert(history_key(record)))
        .collect()
}

pub fn cumulative_secs(history: &[Value]) -> f64 {
    round4(
        history
            .iter()
            .filter_map(|r| r.get(TOTAL_KEY).or_else(|| r.get(LEGACY_TOTAL_KEY)))
            .filter_map(Value::as_f64)
            .fold(0.0, |acc, secs| acc + secs),
    )
}
