//! Persistent merge store (one JSON document per run key).

pub mod document;
pub mod merge_store;

pub use document::{AUDIT_KEY, Document, merge_documents, reorder_keys};
pub use merge_store::{MergeStore, QUARANTINE_SUFFIX, Target, TargetLayout};
