use serde::{Deserialize, Serialize};

/// Tallies of one runner pass, logged at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub scheduled: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks that needed the reauth retry (whatever its result).
    pub retried: usize,
    /// Result-collection failures.
    pub critical: usize,
}
