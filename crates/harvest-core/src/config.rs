//! Harvest configuration (TOML).
//!
//! Missing fields fall back to defaults; a missing file is the default configuration.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::HarvestError;
use crate::store::{MergeStore, Target, TargetLayout};

/// Canonical top-level key order of persisted documents.
pub const DEFAULT_MODULE_ORDER: [&str; 32] = [
    "Echo",
    "PHC",
    "HCTool",
    "BackLog",
    "CarrierMatrix",
    "IBBT",
    "SCACs",
    "SPARK",
    "KARIBA",
    "DockMaster",
    "DockMasterFiltered",
    "DockMaster2",
    "DockMaster2Filtered",
    "DockFlow",
    "Galaxy",
    "Galaxy_percentages",
    "Galaxy2",
    "Galaxy2_values",
    "ICQA",
    "F2P",
    "kNekro",
    "SSP",
    "SSPOT",
    "PPR",
    "PPR_Q",
    "ALPS",
    "ALPS_RC_Sort",
    "ALPSRoster",
    "RODEO",
    "YMS",
    "FMC",
    "QuipCSV",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarvestConfig {
    /// Worker pool size.
    pub max_workers: usize,

    /// Bound on waiting for the reauth lock.
    pub reauth_timeout_secs: u64,

    /// `prepare()` refreshes credentials older than this.
    pub credential_max_age_hours: u64,

    pub module_order: Vec<String>,

    pub targets: Vec<Target>,

    pub metrics: MetricsConfig,

    pub credential: Option<CredentialConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics are disabled when unset.
    pub dir: Option<PathBuf>,
    pub detailed_file: String,
    pub summary_file: String,
    /// Never reported in metric rows.
    pub excluded_modules: BTreeSet<String>,
    /// Also write `<site>_module_report_<stamp>.json` per run.
    pub status_report: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            detailed_file: "metrics_detailed.csv".to_string(),
            summary_file: "metrics_summary.csv".to_string(),
            excluded_modules: BTreeSet::new(),
            status_report: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialConfig {
    /// File holding the session token.
    pub file: PathBuf,
    /// Program and arguments that renew `file` (e.g. `["mwinit", "-o"]`).
    #[serde(default)]
    pub refresh_command: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            reauth_timeout_secs: 60,
            credential_max_age_hours: 4,
            module_order: DEFAULT_MODULE_ORDER.iter().map(|s| s.to_string()).collect(),
            targets: vec![Target::new("local", "output", TargetLayout::Flat)],
            metrics: MetricsConfig::default(),
            credential: None,
        }
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.max_workers == 0 {
            return Err(HarvestError::Config("max_workers must be > 0".into()));
        }
        if self.reauth_timeout_secs == 0 {
            return Err(HarvestError::Config("reauth_timeout_secs must be > 0".into()));
        }
        if self.targets.is_empty() {
            return Err(HarvestError::Config("at least one target is required".into()));
        }
        let mut names = BTreeSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(HarvestError::Config("target name must not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(HarvestError::Config(format!(
                    "duplicate target name {:?}",
                    target.name
                )));
            }
        }
        if let Some(credential) = &self.credential {
            if credential
                .refresh_command
                .first()
                .is_some_and(|program| program.trim().is_empty())
            {
                return Err(HarvestError::Config(
                    "credential.refresh_command must start with a program".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn reauth_timeout(&self) -> Duration {
        Duration::from_secs(self.reauth_timeout_secs)
    }

    pub fn credential_max_age(&self) -> Duration {
        Duration::from_secs(self.credential_max_age_hours * 60 * 60)
    }

    pub fn merge_store(&self) -> MergeStore {
        MergeStore::new(self.targets.clone(), self.module_order.clone())
    }

    /// Parse and validate.
    pub fn from_toml_str(contents: &str) -> Result<Self, HarvestError> {
        let cfg: HarvestConfig =
            toml::from_str(contents).map_err(|e| HarvestError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarvestConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarvestConfig, HarvestError> {
    if !path.exists() {
        let cfg = HarvestConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let cfg: HarvestConfig = toml::from_str(&contents)
        .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}
