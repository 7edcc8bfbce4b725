//! Records written into the `Audit` block of a persisted document.
//!
//! Field names are PascalCase on disk because existing documents and the tools that
//! read them already use that layout.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;
use super::ids::RunId;

/// Sentinel duration for "unknown" (result collection failed, or never measured).
pub const UNKNOWN_DURATION: f64 = -1.0;

/// One failure observed during a run. Appended in completion order, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Task name, or the component that failed (e.g. `TaskRegistry`).
    #[serde(rename = "Function")]
    pub function: String,

    #[serde(rename = "ErrorFlag", default = "flag_true")]
    pub flagged: bool,

    #[serde(rename = "ErrorName")]
    pub message: String,

    #[serde(rename = "ErrorType")]
    pub kind: ErrorKind,

    #[serde(rename = "ErrorTimestamp")]
    pub timestamp: NaiveDateTime,

    #[serde(rename = "ExecutionTimeSeconds")]
    pub duration_secs: f64,
}

fn flag_true() -> bool {
    true
}

impl ErrorRecord {
    pub fn new(
        function: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        timestamp: NaiveDateTime,
        duration_secs: f64,
    ) -> Self {
        Self {
            function: function.into(),
            flagged: true,
            message: message.into(),
            kind,
            timestamp,
            duration_secs,
        }
    }
}

/// Summary of a single orchestration run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(rename = "RunId")]
    pub run_id: RunId,

    /// `%Y-%m-%d %H:%M:%S`, local time.
    #[serde(rename = "Timestamp")]
    pub timestamp: String,

    #[serde(rename = "ModulesAttempted")]
    pub modules_attempted: Vec<String>,

    #[serde(rename = "TotalExecutionTimeSeconds")]
    pub total_secs: f64,

    #[serde(rename = "TotalExecutionTimeMinutes")]
    pub total_minutes: f64,

    #[serde(rename = "ModuleExecutionTimes")]
    pub module_secs: BTreeMap<String, f64>,

    #[serde(rename = "SkippedOrFailedModules")]
    pub skipped_or_failed: Vec<String>,

    #[serde(rename = "ErrorCount")]
    pub error_count: usize,

    #[serde(rename = "ErrorDetails")]
    pub errors: Vec<ErrorRecord>,

    #[serde(rename = "ExecutionMode")]
    pub execution_mode: String,

    #[serde(rename = "ExecutableName")]
    pub executable: String,
}

/// `Audit` block: the latest run's fields, the full history, and the derived total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditBlock {
    #[serde(flatten)]
    pub latest: RunRecord,

    #[serde(rename = "History")]
    pub history: Vec<RunRecord>,

    /// Always `sum(history.total_secs)`; recomputed, never incremented.
    #[serde(rename = "CumulativeTimeSeconds")]
    pub cumulative_secs: f64,
}

/// Per-module verdict used by metrics and status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleStatus {
    Success,
    Failed,
    Unknown,
}

impl ModuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Success => "Success",
            ModuleStatus::Failed => "Failed",
            ModuleStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to 4 decimals, the precision kept in documents and CSVs.
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    #[test]
    fn error_record_uses_document_field_names() {
        let rec = ErrorRecord::new("YMS", ErrorKind::Timeout, "Timeout error: slow", ts(), 1.5);
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["Function"], "YMS");
        assert_eq!(v["ErrorFlag"], true);
        assert_eq!(v["ErrorType"], "Timeout");
        assert_eq!(v["ExecutionTimeSeconds"], 1.5);
    }

    #[test]
    fn audit_block_flattens_latest_run() {
        let run = RunRecord {
            run_id: RunId::from_ulid(Ulid::new()),
            timestamp: "2025-03-01 06:00:00".into(),
            modules_attempted: vec!["YMS".into()],
            total_secs: 30.0,
            total_minutes: 0.5,
            module_secs: BTreeMap::new(),
            skipped_or_failed: vec![],
            error_count: 0,
            errors: vec![],
            execution_mode: "release".into(),
            executable: "harvest".into(),
        };
        let audit = AuditBlock {
            latest: run.clone(),
            history: vec![run],
            cumulative_secs: 30.0,
        };
        let v = serde_json::to_value(&audit).unwrap();
        assert_eq!(v["Timestamp"], "2025-03-01 06:00:00");
        assert_eq!(v["History"].as_array().unwrap().len(), 1);
        assert_eq!(v["CumulativeTimeSeconds"], 30.0);

        let back: AuditBlock = serde_json::from_value(v).unwrap();
        assert_eq!(back, audit);
    }

    #[test]
    fn round4_keeps_four_decimals() {
        assert_eq!(round4(1.234_567), 1.2346);
        assert_eq!(round4(-1.0), -1.0);
    }
}
