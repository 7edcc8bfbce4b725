//! Aggregator - タスク結果の集約
//!
//! 実行したタスクは成功・失敗にかかわらず必ず 1 エントリを持つ。
//! 「スキップ（エントリなし）」と「実行して失敗（payload が None）」を区別できる。

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{error, info};

use crate::domain::{ErrorKind, ErrorRecord, ModuleResult, TaskOutcome, UNKNOWN_DURATION};
use crate::observability::RunCounts;

/// Aggregated per-module result.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub payload: Option<ModuleResult>,
    /// Completion time on success, otherwise the time the failure was recorded.
    pub timestamp: NaiveDateTime,
    pub duration_secs: f64,
}

/// Everything the runner learned in one pass.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<String, ModuleEntry>,
    /// Completion order.
    pub errors: Vec<ErrorRecord>,
    pub counts: RunCounts,
}

impl RunReport {
    /// Per-module durations, `-1` for unknown.
    pub fn module_secs(&self) -> BTreeMap<String, f64> {
        self.outcomes
            .iter()
            .map(|(name, entry)| (name.clone(), entry.duration_secs))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    report: RunReport,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_scheduled(&mut self) {
        self.report.counts.scheduled += 1;
    }

    pub fn note_skipped(&mut self) {
        self.report.counts.skipped += 1;
    }

    /// Fold one finished task in. `now` stamps failures.
    pub fn record(&mut self, outcome: TaskOutcome, now: NaiveDateTime) {
        if outcome.attempts > 1 {
            self.report.counts.retried += 1;
        }

        let TaskOutcome {
            name,
            payload,
            error,
            completed_at,
            duration_secs,
            ..
        } = outcome;

        match error {
            None => {
                self.report.counts.succeeded += 1;
                info!(module = %name, duration_secs, "module completed");
            }
            Some(failure) => {
                self.report.counts.failed += 1;
                error!(
                    module = %name,
                    kind = %failure.kind,
                    duration_secs,
                    "module failed: {}",
                    failure.message
                );
                self.report.errors.push(ErrorRecord::new(
                    &name,
                    failure.kind,
                    failure.message,
                    now,
                    duration_secs,
                ));
            }
        }

        self.report.outcomes.insert(
            name,
            ModuleEntry {
                payload,
                timestamp: completed_at.unwrap_or(now),
                duration_secs,
            },
        );
    }

    /// The task ran but its result could not be collected (panic, cancellation).
    pub fn record_collection_failure(
        &mut self,
        name: impl Into<String>,
        message: impl Into<String>,
        now: NaiveDateTime,
    ) {
        let name = name.into();
        let message = message.into();
        error!(module = %name, "critical error collecting result: {message}");
        self.report.counts.critical += 1;
        self.report.errors.push(ErrorRecord::new(
            &name,
            ErrorKind::Critical,
            message,
            now,
            UNKNOWN_DURATION,
        ));
        self.report.outcomes.insert(
            name,
            ModuleEntry {
                payload: None,
                timestamp: now,
                duration_secs: UNKNOWN_DURATION,
            },
        );
    }

    pub fn finish(self) -> RunReport {
        let counts = &self.report.counts;
        info!(
            succeeded = counts.succeeded,
            failed = counts.failed + counts.critical,
            skipped = counts.skipped,
            retried = counts.retried,
            "module execution complete"
        );
        self.report
    }
}
