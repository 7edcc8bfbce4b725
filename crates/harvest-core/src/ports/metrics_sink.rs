//! MetricsSink port - 実行メトリクスの追記先

use std::collections::BTreeMap;

use crate::domain::{HarvestError, ModuleStatus, RunKey, RunRecord};

/// Everything a sink needs to describe one run.
#[derive(Debug, Clone)]
pub struct RunMetrics<'a> {
    pub run_key: &'a RunKey,
    pub user_login: &'a str,
    pub record: &'a RunRecord,
    /// Per requested module; modules that never ran are `Unknown`.
    pub statuses: &'a BTreeMap<String, ModuleStatus>,
    /// Per-module durations, including `-1` sentinels.
    pub module_secs: &'a BTreeMap<String, f64>,
}

/// Append-only destination for run metrics. Failures are reported, never fatal.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metrics: &RunMetrics<'_>) -> Result<(), HarvestError>;
}
