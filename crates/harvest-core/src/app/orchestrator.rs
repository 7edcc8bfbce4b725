//! Orchestrator - 1 回の実行のワイヤリング
//!
//! Registry → Runner → Aggregator → AuditBuilder → MergeStore の順に流す。
//! 認証情報の準備に失敗したら（Fatal）何もスケジュールせず、何も書かない。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::audit::{AuditBuilder, module_statuses};
use super::registry::TaskRegistry;
use super::runner::TaskRunner;
use crate::config::HarvestConfig;
use crate::domain::{HarvestError, ModuleStatus, RunKey, RunParams, RunRecord};
use crate::ports::{Clock, CredentialHandle, IdGenerator, MetricsSink, RunMetrics, SystemClock, UlidGenerator};
use crate::store::{AUDIT_KEY, Document, MergeStore, reorder_keys};

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_key: RunKey,
    /// First document written, `None` when no target could be written.
    pub path: Option<PathBuf>,
    pub record: RunRecord,
    pub statuses: BTreeMap<String, ModuleStatus>,
}

struct Execution {
    fragment: Document,
    record: RunRecord,
    statuses: BTreeMap<String, ModuleStatus>,
    module_secs: BTreeMap<String, f64>,
}

pub struct Orchestrator {
    config: HarvestConfig,
    registry: TaskRegistry,
    credential: Arc<dyn CredentialHandle>,
    store: Arc<MergeStore>,
    metrics: Option<Arc<dyn MetricsSink>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    user_login: String,
    executable: Option<String>,
    stop: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(
        config: HarvestConfig,
        registry: TaskRegistry,
        credential: Arc<dyn CredentialHandle>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(config.merge_store()),
            config,
            registry,
            credential,
            metrics: None,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            user_login: "unknown".to_string(),
            executable: None,
            stop: None,
        }
    }

    /// Replaces the clock; the id generator follows it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn with_user_login(mut self, login: impl Into<String>) -> Self {
        self.user_login = login.into();
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Collect every requested module, record metrics and return the document fragment,
    /// `Audit` included. Failed modules get no key; their failure is only in `Audit`.
    /// The fragment is not merged into any target.
    pub async fn collect(&self, params: &RunParams) -> Result<Document, HarvestError> {
        let execution = self.execute(params).await?;
        let run_key = RunKey::from_params(params, self.clock.now().date_naive());
        self.record_metrics(&run_key, &execution);
        Ok(execution.fragment)
    }

    /// Collect, record metrics and merge the fragment into the run key's document.
    pub async fn run(&self, params: &RunParams) -> Result<RunSummary, HarvestError> {
        let execution = self.execute(params).await?;
        let run_key = RunKey::from_params(params, self.clock.now().date_naive());
        self.record_metrics(&run_key, &execution);

        let Execution {
            fragment,
            record,
            statuses,
            ..
        } = execution;

        let store = Arc::clone(&self.store);
        let key = run_key.clone();
        let path = match tokio::task::spawn_blocking(move || store.merge_and_write(&fragment, &key)).await {
            Ok(path) => path,
            Err(err) => {
                error!(%err, "merge store task failed");
                None
            }
        };

        match &path {
            Some(path) => info!(run_key = %run_key, path = %path.display(), "run persisted"),
            None => error!(run_key = %run_key, "run results were not persisted"),
        }

        Ok(RunSummary {
            run_key,
            path,
            record,
            statuses,
        })
    }

    async fn execute(&self, params: &RunParams) -> Result<Execution, HarvestError> {
        let started = Instant::now();

        self.credential
            .prepare()
            .await
            .map_err(|e| HarvestError::Fatal(format!("credential setup failed: {e}")))?;

        let (tasks, registry_errors) = self
            .registry
            .build(params, self.clock.now().naive_local());
        let suffixes: HashMap<String, String> = tasks
            .iter()
            .map(|t| (t.name.clone(), t.summary_suffix.clone()))
            .collect();

        let mut runner = TaskRunner::new(
            self.config.max_workers,
            Arc::clone(&self.credential),
            Arc::clone(&self.clock),
        )
        .with_reauth_timeout(self.config.reauth_timeout());
        if let Some(stop) = &self.stop {
            runner = runner.with_stop_signal(stop.clone());
        }

        let report = runner.run(tasks).await;
        let module_secs = report.module_secs();
        let attempted: Vec<String> = report.outcomes.keys().cloned().collect();

        let mut errors = registry_errors;
        errors.extend(report.errors);

        let mut builder = AuditBuilder::new(Arc::clone(&self.clock), Arc::clone(&self.ids));
        if let Some(executable) = &self.executable {
            builder = builder.with_executable(executable.clone());
        }
        let (audit, total_secs) = builder.build(started, &attempted, errors, &module_secs, None);
        info!(
            total_secs,
            errors = audit.latest.error_count,
            "run collected"
        );

        let mut fragment = Document::new();
        for (name, entry) in report.outcomes {
            // 失敗したモジュールはキーを書かない（前回の値を null で潰さない）
            let Some(payload) = entry.payload else {
                continue;
            };
            let suffix = suffixes.get(&name).map(String::as_str).unwrap_or("_summary");
            for (key, value) in payload.into_entries(&name, suffix) {
                fragment.insert(key, value);
            }
        }
        fragment.insert(AUDIT_KEY.to_string(), serde_json::to_value(&audit)?);
        let fragment = reorder_keys(fragment, &self.config.module_order);

        let statuses = module_statuses(&params.requested_modules, &audit.latest.errors, &module_secs);

        Ok(Execution {
            fragment,
            record: audit.latest,
            statuses,
            module_secs,
        })
    }

    fn record_metrics(&self, run_key: &RunKey, execution: &Execution) {
        let Some(sink) = &self.metrics else {
            return;
        };
        let metrics = RunMetrics {
            run_key,
            user_login: &self.user_login,
            record: &execution.record,
            statuses: &execution.statuses,
            module_secs: &execution.module_secs,
        };
        if let Err(err) = sink.record(&metrics) {
            warn!(%err, "failed to record metrics");
        }
    }
}
