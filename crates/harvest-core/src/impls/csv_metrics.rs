//! CsvMetricsSink - 実行メトリクスを CSV に追記する
//!
//! - 詳細 CSV: 1 実行 × 1 モジュールで 1 行（モジュールがなければ `SUMMARY` 行）
//! - サマリ CSV: 1 実行で 1 行
//! - ヘッダはファイルが無いか空のときだけ書く

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::app::audit::status_report;
use crate::config::MetricsConfig;
use crate::domain::{ErrorKind, HarvestError, ModuleStatus};
use crate::ports::{Clock, MetricsSink, RunMetrics};
use crate::store::merge_store::to_pretty_json;

pub const DETAILED_HEADER: [&str; 21] = [
    "ExecutionTimestamp",
    "ExecutionDate",
    "Site",
    "PlanType",
    "Shift",
    "UserLogin",
    "TotalExecutionTime_Seconds",
    "TotalExecutionTime_Minutes",
    "TotalModulesAttempted",
    "SuccessfulModules",
    "FailedModules",
    "TimeoutModules",
    "TotalErrorCount",
    "ModuleName",
    "ModuleExecutionTime",
    "ModuleStatus",
    "ModuleErrorCount",
    "ModuleErrorDetails",
    "ExecutableName",
    "ExecutionMode",
    "RunID",
];

pub const SUMMARY_HEADER: [&str; 7] = [
    "Datetime",
    "Site",
    "PlanType",
    "Shift",
    "TotalExecutionTime (seconds)",
    "TotalExecutionTime (minutes)",
    "UserLogin",
];

pub struct CsvMetricsSink {
    config: MetricsConfig,
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl CsvMetricsSink {
    pub fn new(dir: impl Into<PathBuf>, config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            config,
            clock,
        }
    }

    /// `None` when metrics are not configured.
    pub fn from_config(config: &MetricsConfig, clock: Arc<dyn Clock>) -> Option<Self> {
        let dir = config.dir.clone()?;
        Some(Self::new(dir, config.clone(), clock))
    }

    pub fn detailed_path(&self) -> PathBuf {
        self.dir.join(&self.config.detailed_file)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(&self.config.summary_file)
    }

    fn detailed_rows(&self, m: &RunMetrics<'_>) -> Vec<Vec<String>> {
        let record = m.record;
        let included: BTreeMap<&str, f64> = m
            .module_secs
            .iter()
            .filter(|(name, _)| !self.config.excluded_modules.contains(name.as_str()))
            .map(|(name, secs)| (name.as_str(), *secs))
            .collect();

        let status_of = |name: &str| {
            m.statuses
                .get(name)
                .copied()
                .unwrap_or(ModuleStatus::Unknown)
        };
        let errors_of = |name: &str| {
            record
                .errors
                .iter()
                .filter(|e| e.function == name)
                .collect::<Vec<_>>()
        };

        let successful = included
            .keys()
            .filter(|name| status_of(name) == ModuleStatus::Success)
            .count();
        let failed = included
            .keys()
            .filter(|name| status_of(name) == ModuleStatus::Failed)
            .count();
        let timed_out = included
            .keys()
            .filter(|name| errors_of(name).iter().any(|e| e.kind == ErrorKind::Timeout))
            .count();

        let date = record.timestamp.get(..10).unwrap_or(&record.timestamp);
        let common = |module: Vec<String>| -> Vec<String> {
            let mut row = vec![
                record.timestamp.clone(),
                date.to_string(),
                m.run_key.site.clone(),
                m.run_key.plan_type.clone(),
                m.run_key.shift.clone(),
                m.user_login.to_string(),
                format!("{:.4}", record.total_secs),
                format!("{:.4}", record.total_minutes),
            ];
            row.extend(module);
            row.extend([
                record.executable.clone(),
                record.execution_mode.clone(),
                record.run_id.to_string(),
            ]);
            row
        };

        if included.is_empty() {
            return vec![common(vec![
                "0".into(),
                "0".into(),
                "0".into(),
                "0".into(),
                record.error_count.to_string(),
                "SUMMARY".into(),
                String::new(),
                String::new(),
                "0".into(),
                String::new(),
            ])];
        }

        included
            .iter()
            .map(|(name, secs)| {
                let errors = errors_of(name);
                let details = errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                common(vec![
                    included.len().to_string(),
                    successful.to_string(),
                    failed.to_string(),
                    timed_out.to_string(),
                    record.error_count.to_string(),
                    name.to_string(),
                    format!("{secs:.4}"),
                    status_of(name).to_string(),
                    errors.len().to_string(),
                    details,
                ])
            })
            .collect()
    }

    fn summary_row(&self, m: &RunMetrics<'_>) -> Vec<String> {
        vec![
            m.record.timestamp.clone(),
            m.run_key.site.clone(),
            m.run_key.plan_type.clone(),
            m.run_key.shift.clone(),
            format!("{:.4}", m.record.total_secs),
            format!("{:.4}", m.record.total_minutes),
            m.user_login.to_string(),
        ]
    }

    fn write_status_report(&self, m: &RunMetrics<'_>) -> Result<PathBuf, HarvestError> {
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let path = self
            .dir
            .join(format!("{}_module_report_{stamp}.json", m.run_key.site));
        let report = status_report(&m.run_key.site, m.record, m.statuses);
        let document = match report {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let bytes = to_pretty_json(&document)?;
        fs::write(&path, bytes).map_err(|e| HarvestError::io(&path, e))?;
        Ok(path)
    }
}

/// Append rows, writing `header` first when the file is missing or empty.
fn append_rows<const N: usize>(
    path: &Path,
    header: &[&str; N],
    rows: &[Vec<String>],
) -> Result<(), HarvestError> {
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| HarvestError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if needs_header {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush().map_err(|e| HarvestError::io(path, e))?;
    Ok(())
}

impl MetricsSink for CsvMetricsSink {
    fn record(&self, metrics: &RunMetrics<'_>) -> Result<(), HarvestError> {
        fs::create_dir_all(&self.dir).map_err(|e| HarvestError::io(&self.dir, e))?;

        let rows = self.detailed_rows(metrics);
        let detailed = self.detailed_path();
        append_rows(&detailed, &DETAILED_HEADER, &rows)?;
        info!(path = %detailed.display(), rows = rows.len(), "metrics recorded");

        let summary = self.summary_path();
        append_rows(&summary, &SUMMARY_HEADER, &[self.summary_row(metrics)])?;

        if self.config.status_report {
            let path = self.write_status_report(metrics)?;
            info!(path = %path.display(), "module status report written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::audit::{AuditBuilder, module_statuses};
    use crate::domain::{ErrorRecord, RunKey, RunRecord};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{Local, NaiveDate, TimeZone};

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Local.with_ymd_and_hms(2025, 3, 1, 7, 0, 0).unwrap(),
        ))
    }

    fn key() -> RunKey {
        RunKey::new("BCN1", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), "Day", "Standard")
    }

    fn record(module_secs: &BTreeMap<String, f64>, errors: Vec<ErrorRecord>) -> RunRecord {
        let c = clock();
        AuditBuilder::new(c.clone(), Arc::new(UlidGenerator::new(c)))
            .with_executable("harvest")
            .record(12.0, &module_secs.keys().cloned().collect::<Vec<_>>(), errors, module_secs)
    }

    fn sink(dir: &Path, excluded: &[&str], status_report: bool) -> CsvMetricsSink {
        let config = MetricsConfig {
            dir: Some(dir.to_path_buf()),
            excluded_modules: excluded.iter().map(|s| s.to_string()).collect(),
            status_report,
            ..MetricsConfig::default()
        };
        CsvMetricsSink::from_config(&config, clock()).unwrap()
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap()
            .records()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn header_written_once_and_one_row_per_module() {
        let temp = tempfile::tempdir().unwrap();
        let sink = sink(temp.path(), &["PHC"], false);
        let secs = BTreeMap::from([
            ("PHC".to_string(), 1.0),
            ("YMS".to_string(), 2.0),
            ("FMC".to_string(), -1.0),
        ]);
        let rec = record(&secs, vec![]);
        let names: Vec<String> = secs.keys().cloned().collect();
        let statuses = module_statuses(&names, &rec.errors, &secs);
        let metrics = RunMetrics {
            run_key: &key(),
            user_login: "ops",
            record: &rec,
            statuses: &statuses,
            module_secs: &secs,
        };

        sink.record(&metrics).unwrap();
        sink.record(&metrics).unwrap();

        let rows = read_rows(&sink.detailed_path());
        // header + 2 modules × 2 runs
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[0][0], "ExecutionTimestamp");
        assert_eq!(&rows[1][13], "FMC");
        assert_eq!(&rows[1][15], "Unknown");
        assert_eq!(&rows[2][13], "YMS");
        assert_eq!(&rows[2][14], "2.0000");
        assert_eq!(&rows[2][20], rec.run_id.to_string());

        let summary = read_rows(&sink.summary_path());
        assert_eq!(summary.len(), 3);
        assert_eq!(&summary[0][0], "Datetime");
        assert_eq!(&summary[1][6], "ops");
    }

    #[test]
    fn no_modules_writes_summary_row() {
        let temp = tempfile::tempdir().unwrap();
        let sink = sink(temp.path(), &[], false);
        let secs = BTreeMap::new();
        let rec = record(&secs, vec![]);
        let statuses = BTreeMap::new();
        let metrics = RunMetrics {
            run_key: &key(),
            user_login: "ops",
            record: &rec,
            statuses: &statuses,
            module_secs: &secs,
        };

        sink.record(&metrics).unwrap();

        let rows = read_rows(&sink.detailed_path());
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][13], "SUMMARY");
    }

    #[test]
    fn failed_modules_carry_error_details_and_status_report() {
        let temp = tempfile::tempdir().unwrap();
        let sink = sink(temp.path(), &[], true);
        let secs = BTreeMap::from([("YMS".to_string(), 3.0)]);
        let ts = clock().now().naive_local();
        let errors = vec![ErrorRecord::new("YMS", ErrorKind::Timeout, "Timeout error: slow", ts, 3.0)];
        let rec = record(&secs, errors);
        let statuses = module_statuses(&["YMS".to_string()], &rec.errors, &secs);
        let metrics = RunMetrics {
            run_key: &key(),
            user_login: "ops",
            record: &rec,
            statuses: &statuses,
            module_secs: &secs,
        };

        sink.record(&metrics).unwrap();

        let rows = read_rows(&sink.detailed_path());
        assert_eq!(&rows[1][10], "1"); // FailedModules
        assert_eq!(&rows[1][11], "1"); // TimeoutModules
        assert_eq!(&rows[1][15], "Failed");
        assert_eq!(&rows[1][17], "Timeout error: slow");
        assert!(temp.path().join("BCN1_module_report_20250301_070000.json").exists());
    }
}
