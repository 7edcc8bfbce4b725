//! Stable exit codes for `harvest` commands.

/// Document written, JSON printed, or configuration valid.
pub const OK: i32 = 0;
/// Fatal error: bad arguments or configuration, or credential setup failed.
pub const FATAL: i32 = 1;
/// The run completed but no output target could be written.
pub const NOT_PERSISTED: i32 = 2;
