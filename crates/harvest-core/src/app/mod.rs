//! App layer - Registry / Runner / Coordinator / Aggregator / Audit / Orchestrator

pub mod aggregator;
pub mod audit;
pub mod coordinator;
pub mod orchestrator;
pub mod registry;
pub mod runner;

pub use aggregator::{Aggregator, ModuleEntry, RunReport};
pub use audit::{AuditBuilder, module_statuses, status_report};
pub use coordinator::{DEFAULT_REAUTH_TIMEOUT, ReauthCoordinator, ReauthGuard};
pub use orchestrator::{Orchestrator, RunSummary};
pub use registry::{REGISTRY_FUNCTION, TaskDescriptor, TaskRegistry};
pub use runner::TaskRunner;
