//! Domain model (IDs, run parameters, results, outcomes, audit records, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod result;
pub mod run;

pub use errors::{CredentialError, ErrorKind, HarvestError, TaskError};
pub use ids::RunId;
pub use outcome::{TaskFailure, TaskOutcome};
pub use record::{AuditBlock, ErrorRecord, ModuleStatus, RunRecord, UNKNOWN_DURATION, round4};
pub use result::{ModuleResult, RawPayload, Row};
pub use run::{RunKey, RunParams, parse_datetime};
