//! ReauthCoordinator - 認証情報 refresh の排他制御
//!
//! # 方針
//! - ロックで直列化するのは refresh + load だけ。リトライ本体の I/O はロックの外で行う。
//! - 取得待ちには上限（既定 60 秒）を設ける。超えたら失敗として返し、永久には待たない。
//! - tokio の Mutex は FIFO なので、待っているタスクが飢餓状態になることはない。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

/// Default bound on waiting for the reauth lock.
pub const DEFAULT_REAUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// Mutual-exclusion gate around credential refresh, shared by all workers of one run.
#[derive(Debug, Default)]
pub struct ReauthCoordinator {
    lock: Mutex<()>,
    /// Bumped after every successful refresh+load.
    generation: AtomicU64,
}

impl ReauthCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed refreshes so far in this run.
    ///
    /// A task reads this before its first attempt; if it has moved by the time the task
    /// holds the lock, the credential was already refreshed after the task started.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Wait at most `timeout` for the lock. `None` means the wait timed out.
    pub async fn try_acquire(&self, timeout: Duration) -> Option<ReauthGuard<'_>> {
        match tokio::time::timeout(timeout, self.lock.lock()).await {
            Ok(guard) => Some(ReauthGuard {
                _guard: guard,
                generation: &self.generation,
            }),
            Err(_) => None,
        }
    }
}

/// Held while refreshing. Dropping it releases the lock.
#[must_use = "dropping the guard releases the reauth lock immediately"]
pub struct ReauthGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    generation: &'a AtomicU64,
}

impl ReauthGuard<'_> {
    /// Record that this holder refreshed the credential.
    pub fn mark_refreshed(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(self) {}
}
