//! Errors - エラー型と分類
//!
//! - `ErrorKind`: タスク単位の失敗分類（Authentication のみ再認証リトライ対象）
//! - `TaskError`: データソースが返す型付きエラー
//! - `CredentialError`: 認証情報の refresh / load 失敗
//! - `HarvestError`: プロセス単位のエラー（Fatal は実行全体を中断する）

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed task attempt.
///
/// Only `Authentication` is retried (after a credential refresh). `Critical` is not produced
/// by task logic: it marks a failure while collecting a finished task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Authentication,
    Timeout,
    Connection,
    Processing,
    Critical,
}

const AUTH_MARKERS: [&str; 4] = [
    "InitializeSecurityContext",
    "SSPI",
    "invalid token",
    "negotiate",
];

impl ErrorKind {
    /// Fallback taxonomy for collaborators that only have a human-readable message.
    ///
    /// Order matters: authentication markers win over "timeout"/"connection", so
    /// `"401 while opening connection"` is an authentication failure.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if AUTH_MARKERS.iter().any(|m| message.contains(m))
            || lower.contains("credential")
            || message.contains("401")
        {
            ErrorKind::Authentication
        } else if lower.contains("timeout") || lower.contains("timed out") {
            ErrorKind::Timeout
        } else if lower.contains("connection") {
            ErrorKind::Connection
        } else {
            ErrorKind::Processing
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Authentication)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Connection => "Connection",
            ErrorKind::Processing => "Processing",
            ErrorKind::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a data source's `retrieve` or `transform`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from a bare message, classifying it with [`ErrorKind::classify`].
    pub fn untyped(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }
}

/// Failure of a credential handle operation.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential file {path} is missing or empty")]
    Missing { path: PathBuf },

    #[error("failed to read credential file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refresh command {program:?} could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refresh command {program:?} exited with {status}: {stderr}")]
    RefreshFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("no refresh command configured")]
    NoRefreshCommand,
}

/// Process-level errors.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Raised before any task is scheduled; the run yields no output at all.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not parse datetime {0:?}")]
    DateParse(String),

    #[error("source {0:?} is already registered")]
    DuplicateSource(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl HarvestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("401 Unauthorized", ErrorKind::Authentication)]
    #[case("InitializeSecurityContext failed", ErrorKind::Authentication)]
    #[case("SSPI handshake error", ErrorKind::Authentication)]
    #[case("server returned invalid token", ErrorKind::Authentication)]
    #[case("could not negotiate", ErrorKind::Authentication)]
    #[case("Credential expired", ErrorKind::Authentication)]
    #[case("read Timeout after 30s", ErrorKind::Timeout)]
    #[case("operation timed out", ErrorKind::Timeout)]
    #[case("Connection reset by peer", ErrorKind::Connection)]
    #[case("column 'units' not found", ErrorKind::Processing)]
    #[case("", ErrorKind::Processing)]
    fn classify_follows_taxonomy(#[case] message: &str, #[case] expected: ErrorKind) {
        assert_eq!(ErrorKind::classify(message), expected);
    }

    #[test]
    fn auth_markers_win_over_connection() {
        assert_eq!(
            ErrorKind::classify("401 while opening connection"),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn only_authentication_is_retryable() {
        assert!(ErrorKind::Authentication.is_retryable());
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Connection,
            ErrorKind::Processing,
            ErrorKind::Critical,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retried");
        }
    }

    #[test]
    fn untyped_error_is_classified() {
        let err = TaskError::untyped("upstream timeout");
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.to_string(), "upstream timeout");
    }

    #[test]
    fn error_kind_serializes_as_pascal_case() {
        let s = serde_json::to_string(&ErrorKind::Authentication).unwrap();
        assert_eq!(s, "\"Authentication\"");
    }
}
