//! Source port - データ取得プラグインの契約
//!
//! コアが知っているのは「今回実行するか」「取得」「変換」の 3 つだけ。
//! HTML スクレイピングや CSV 解析などの中身はプラグイン側の責務。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::credential::Credential;
use crate::domain::{HarvestError, ModuleResult, RawPayload, RunParams, TaskError};

/// A data source bound to one run's parameters.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch the raw payload. Called once per attempt with the credential snapshot
    /// current at the start of that attempt.
    async fn retrieve(&self, credential: Arc<Credential>) -> Result<RawPayload, TaskError>;

    /// Turn the raw payload into a result.
    fn transform(&self, raw: RawPayload) -> Result<ModuleResult, TaskError>;
}

/// Builds a [`DataSource`] for a run. Registered once, used on every run.
pub trait SourceFactory: Send + Sync {
    /// Module name; also the key in the persisted document.
    fn name(&self) -> &str;

    /// Scheduling predicate, evaluated once per run against the requested modules.
    fn should_run(&self, requested: &BTreeSet<String>) -> bool {
        requested.contains(self.name())
    }

    /// Suffix of the key a `ModuleResult::Pair` summary is stored under.
    fn summary_suffix(&self) -> &str {
        "_summary"
    }

    fn build(&self, params: &RunParams) -> Result<Arc<dyn DataSource>, HarvestError>;
}
