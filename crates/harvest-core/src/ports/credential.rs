//! Credential port - 再取得可能なセッション認証情報
//!
//! # 並行読み取りの扱い
//! `current()` はスナップショット（`Arc<Credential>`）を返す。`load()` は新しい
//! `Credential` を作って `Arc` を差し替えるだけなので、実行中のリクエストは
//! 自分が取ったスナップショットを使い続ける（in-place 更新はしない）。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::CredentialError;

/// Immutable snapshot of a session credential.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    token: String,
    generation: u64,
}

impl Credential {
    pub fn new(token: impl Into<String>, generation: u64) -> Self {
        Self {
            token: token.into(),
            generation,
        }
    }

    /// A credential for sources that need no authentication.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Incremented by every `load()`; lets callers tell snapshots apart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Shared handle to a refreshable credential.
///
/// - `prepare`: one-time setup before any task is scheduled (e.g. refresh when stale).
///   Failure here is fatal for the run.
/// - `refresh`: ask the external tool for a new credential.
/// - `load`: read the credential into a fresh snapshot.
#[async_trait]
pub trait CredentialHandle: Send + Sync {
    async fn prepare(&self) -> Result<(), CredentialError> {
        self.load().await
    }

    async fn refresh(&self) -> Result<(), CredentialError>;

    async fn load(&self) -> Result<(), CredentialError>;

    async fn current(&self) -> Arc<Credential>;
}
