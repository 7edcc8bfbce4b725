//! FileCredential - ファイルに置かれたセッショントークン
//!
//! refresh は外部コマンド（例: `mwinit -o`）に任せ、load でファイルを読み直して
//! スナップショットを差し替える。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::CredentialError;
use crate::ports::{Credential, CredentialHandle};

pub struct FileCredential {
    path: PathBuf,
    refresh_command: Vec<String>,
    max_age: Duration,
    current: RwLock<Arc<Credential>>,
    loads: AtomicU64,
}

impl FileCredential {
    pub fn new(path: impl Into<PathBuf>, refresh_command: Vec<String>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            refresh_command,
            max_age,
            current: RwLock::new(Arc::new(Credential::anonymous())),
            loads: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, empty, or older than the configured maximum age.
    pub fn is_stale(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return true;
        };
        if metadata.len() == 0 {
            return true;
        }
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_none_or(|age| age > self.max_age)
    }
}

#[async_trait]
impl CredentialHandle for FileCredential {
    async fn prepare(&self) -> Result<(), CredentialError> {
        if self.is_stale() {
            info!(path = %self.path.display(), "credential missing or stale, refreshing");
            self.refresh().await?;
        }
        self.load().await
    }

    async fn refresh(&self) -> Result<(), CredentialError> {
        let Some((program, args)) = self.refresh_command.split_first() else {
            return Err(CredentialError::NoRefreshCommand);
        };
        debug!(program = %program, "running credential refresh command");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CredentialError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CredentialError::RefreshFailed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(program = %program, "credential refresh command finished");
        Ok(())
    }

    async fn load(&self) -> Result<(), CredentialError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::Missing {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(CredentialError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let token = contents.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing {
                path: self.path.clone(),
            });
        }
        let generation = self.loads.fetch_add(1, Ordering::AcqRel) + 1;
        *self.current.write().await = Arc::new(Credential::new(token, generation));
        debug!(generation, "credential loaded");
        Ok(())
    }

    async fn current(&self) -> Arc<Credential> {
        Arc::clone(&*self.current.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn load_swaps_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cookie");
        std::fs::write(&path, "abc\n").unwrap();
        let cred = FileCredential::new(&path, vec![], DAY);

        let before = cred.current().await;
        assert!(before.is_anonymous());

        cred.load().await.unwrap();
        let after = cred.current().await;
        assert_eq!(after.token(), "abc");
        assert_eq!(after.generation(), 1);
        // 古いスナップショットはそのまま
        assert!(before.is_anonymous());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let cred = FileCredential::new(temp.path().join("nope"), vec![], DAY);
        assert!(matches!(
            cred.load().await,
            Err(CredentialError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn fresh_file_is_not_refreshed() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cookie");
        std::fs::write(&path, "abc").unwrap();
        // refresh コマンドなしでも prepare が通る = refresh されていない
        let cred = FileCredential::new(&path, vec![], DAY);
        assert!(!cred.is_stale());
        cred.prepare().await.unwrap();
        assert_eq!(cred.current().await.token(), "abc");
    }

    #[tokio::test]
    async fn stale_file_without_command_fails_prepare() {
        let temp = tempfile::tempdir().unwrap();
        let cred = FileCredential::new(temp.path().join("cookie"), vec![], DAY);
        assert!(matches!(
            cred.prepare().await,
            Err(CredentialError::NoRefreshCommand)
        ));
    }

    #[tokio::test]
    async fn unknown_program_is_a_spawn_error() {
        let temp = tempfile::tempdir().unwrap();
        let cred = FileCredential::new(
            temp.path().join("cookie"),
            vec!["harvest-no-such-program".into()],
            DAY,
        );
        assert!(matches!(
            cred.refresh().await,
            Err(CredentialError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refresh_command_writes_new_token() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cookie");
        let script = format!("printf fresh > '{}'", path.display());
        let cred = FileCredential::new(&path, vec!["sh".into(), "-c".into(), script], DAY);

        cred.prepare().await.unwrap();
        assert_eq!(cred.current().await.token(), "fresh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_refresh_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let cred = FileCredential::new(
            temp.path().join("cookie"),
            vec!["sh".into(), "-c".into(), "echo denied >&2; exit 3".into()],
            DAY,
        );
        match cred.refresh().await {
            Err(CredentialError::RefreshFailed { stderr, .. }) => assert_eq!(stderr, "denied"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
