//! AuditBuilder - 1 回の実行を RunRecord にまとめ、履歴に畳み込む
//!
//! `CumulativeTimeSeconds` は履歴の合計から毎回計算し直す（加算しない）。
//! 同じ実行記録を何度マージしても合計が変わらないのはこのため。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::domain::{AuditBlock, ErrorRecord, ModuleStatus, RunRecord, round4};
use crate::ports::{Clock, IdGenerator};

pub const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `debug` or `release`, depending on how the binary was built.
pub fn execution_mode() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

/// File name of the running executable.
pub fn executable_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown_executable".to_string())
}

pub struct AuditBuilder {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    execution_mode: String,
    executable: String,
}

impl AuditBuilder {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            clock,
            ids,
            execution_mode: execution_mode().to_string(),
            executable: executable_name(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_execution_mode(mut self, mode: impl Into<String>) -> Self {
        self.execution_mode = mode.into();
        self
    }

    /// Build the record for a run that started at `started`, append it to the prior
    /// history and derive the cumulative total. Returns the block and the run's total
    /// seconds.
    pub fn build(
        &self,
        started: Instant,
        attempted: &[String],
        errors: Vec<ErrorRecord>,
        module_secs: &BTreeMap<String, f64>,
        prior_history: Option<Vec<RunRecord>>,
    ) -> (AuditBlock, f64) {
        let total_secs = started.elapsed().as_secs_f64();
        let record = self.record(total_secs, attempted, errors, module_secs);
        let block = fold(record, prior_history.unwrap_or_default());
        (block, total_secs)
    }

    /// Build one immutable run record.
    pub fn record(
        &self,
        total_secs: f64,
        attempted: &[String],
        errors: Vec<ErrorRecord>,
        module_secs: &BTreeMap<String, f64>,
    ) -> RunRecord {
        let mut timed = BTreeMap::new();
        let mut skipped_or_failed = Vec::new();
        for (name, &secs) in module_secs {
            if secs >= 0.0 {
                timed.insert(name.clone(), round4(secs));
            } else {
                skipped_or_failed.push(name.clone());
            }
        }

        RunRecord {
            run_id: self.ids.generate_run_id(),
            timestamp: self.clock.now().format(AUDIT_TIMESTAMP_FORMAT).to_string(),
            modules_attempted: attempted.to_vec(),
            total_secs: round4(total_secs),
            total_minutes: round4(total_secs / 60.0),
            module_secs: timed,
            skipped_or_failed,
            error_count: errors.len(),
            errors,
            execution_mode: self.execution_mode.clone(),
            executable: self.executable.clone(),
        }
    }
}

/// Append `record` to `history` and derive the cumulative total.
pub fn fold(record: RunRecord, mut history: Vec<RunRecord>) -> AuditBlock {
    history.push(record.clone());
    let cumulative_secs = cumulative(&history);
    AuditBlock {
        latest: record,
        history,
        cumulative_secs,
    }
}

pub fn cumulative(history: &[RunRecord]) -> f64 {
    round4(history.iter().fold(0.0, |acc, r| acc + r.total_secs))
}

/// Verdict per requested module.
///
/// `Failed` when an error record names the module, `Unknown` when its duration is negative
/// or it never ran, otherwise `Success`.
pub fn module_statuses(
    requested: &[String],
    errors: &[ErrorRecord],
    module_secs: &BTreeMap<String, f64>,
) -> BTreeMap<String, ModuleStatus> {
    requested
        .iter()
        .map(|name| {
            let status = if errors.iter().any(|e| &e.function == name) {
                ModuleStatus::Failed
            } else {
                match module_secs.get(name) {
                    Some(secs) if *secs >= 0.0 => ModuleStatus::Success,
                    _ => ModuleStatus::Unknown,
                }
            };
            (name.clone(), status)
        })
        .collect()
}

/// Human-oriented per-run status report.
pub fn status_report(
    site: &str,
    record: &RunRecord,
    statuses: &BTreeMap<String, ModuleStatus>,
) -> Value {
    let count = |wanted: ModuleStatus| statuses.values().filter(|s| **s == wanted).count();
    let modules: serde_json::Map<String, Value> = statuses
        .iter()
        .map(|(name, status)| {
            let errors: Vec<&str> = record
                .errors
                .iter()
                .filter(|e| &e.function == name)
                .map(|e| e.message.as_str())
                .collect();
            (
                name.clone(),
                json!({
                    "Status": status.as_str(),
                    "ExecutionTimeSeconds": record.module_secs.get(name),
                    "Errors": errors,
                }),
            )
        })
        .collect();

    json!({
        "Site": site,
        "RunId": record.run_id,
        "Timestamp": record.timestamp,
        "TotalExecutionTimeSeconds": record.total_secs,
        "Successful": count(ModuleStatus::Success),
        "Failed": count(ModuleStatus::Failed),
        "Unknown": count(ModuleStatus::Unknown),
        "Modules": modules,
    })
}
