//! Run parameters and the run-key that names a persisted document.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::errors::HarvestError;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse the datetime shapes operators type in.
///
/// Accepts `2025-03-01 06:00:00`, `2025-03-01T06:00:00` and a bare `2025-03-01`
/// (midnight).
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime, HarvestError> {
    let raw = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| HarvestError::DateParse(raw.to_string()))
}

/// Parameters of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    pub site: String,
    /// Start of shift, as typed by the operator.
    pub sos: String,
    /// End of shift, as typed by the operator.
    pub eos: String,
    pub plan_type: String,
    pub shift: String,
    pub requested_modules: Vec<String>,
}

impl RunParams {
    pub fn requested(&self) -> BTreeSet<String> {
        self.requested_modules.iter().cloned().collect()
    }

    pub fn parsed_sos(&self) -> Result<NaiveDateTime, HarvestError> {
        parse_datetime(&self.sos)
    }

    pub fn parsed_eos(&self) -> Result<NaiveDateTime, HarvestError> {
        parse_datetime(&self.eos)
    }
}

/// (site, date, shift, plan-type): which document a run's results belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub site: String,
    pub date: NaiveDate,
    pub shift: String,
    pub plan_type: String,
}

impl RunKey {
    pub fn new(
        site: impl Into<String>,
        date: NaiveDate,
        shift: impl Into<String>,
        plan_type: impl Into<String>,
    ) -> Self {
        Self {
            site: site.into(),
            date,
            shift: shift.into(),
            plan_type: plan_type.into(),
        }
    }

    /// Key derived from the parsed start of shift, or `fallback` when it does not parse.
    pub fn from_params(params: &RunParams, fallback: NaiveDate) -> Self {
        let date = match params.parsed_sos() {
            Ok(dt) => dt.date(),
            Err(err) => {
                tracing::warn!(%err, "start of shift unparseable, keying run by {fallback}");
                fallback
            }
        };
        Self::new(&params.site, date, &params.shift, &params.plan_type)
    }

    /// `2025.03.01`
    pub fn date_folder(&self) -> String {
        self.date.format("%Y.%m.%d").to_string()
    }

    /// `BCN1-2025.03.01-Day-Standard.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}.json",
            self.site,
            self.date_folder(),
            self.shift,
            self.plan_type
        )
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.site,
            self.date_folder(),
            self.shift,
            self.plan_type
        )
    }
}
