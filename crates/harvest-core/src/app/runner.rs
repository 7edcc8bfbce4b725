//! TaskRunner - 上限付き並列実行と再認証リトライ
//!
//! # 1 タスクの流れ
//! 1. retrieve → transform を試す。成功ならそこで終わり。
//! 2. 失敗が Authentication 以外なら即失敗（リトライなし）。
//! 3. Authentication なら coordinator のロックを上限付きで待つ。
//!    - 取れなければ "Re-auth lock timeout" で失敗。
//!    - 取れたら refresh + load（他タスクがすでに refresh 済みなら省略）してロックを解放し、
//!      ロックの外で 1 回だけリトライする。結果はそれで確定。
//!
//! 停止シグナル（watch）が立ったら新規スケジュールだけ止める。実行中のタスクは止めない。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::aggregator::{Aggregator, RunReport};
use super::coordinator::{DEFAULT_REAUTH_TIMEOUT, ReauthCoordinator};
use super::registry::TaskDescriptor;
use crate::domain::{ErrorKind, ModuleResult, TaskError, TaskOutcome};
use crate::ports::{Clock, CredentialHandle, DataSource};

/// Executes descriptors with bounded parallelism.
pub struct TaskRunner {
    max_concurrency: usize,
    reauth_timeout: Duration,
    credential: Arc<dyn CredentialHandle>,
    coordinator: Arc<ReauthCoordinator>,
    clock: Arc<dyn Clock>,
    stop: Option<watch::Receiver<bool>>,
}

/// What every spawned task needs; shared by all of them.
struct AttemptContext {
    reauth_timeout: Duration,
    credential: Arc<dyn CredentialHandle>,
    coordinator: Arc<ReauthCoordinator>,
    clock: Arc<dyn Clock>,
}

impl TaskRunner {
    pub fn new(
        max_concurrency: usize,
        credential: Arc<dyn CredentialHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            reauth_timeout: DEFAULT_REAUTH_TIMEOUT,
            credential,
            coordinator: Arc::new(ReauthCoordinator::new()),
            clock,
            stop: None,
        }
    }

    pub fn with_reauth_timeout(mut self, timeout: Duration) -> Self {
        self.reauth_timeout = timeout;
        self
    }

    /// Share a coordinator (normally each run gets its own).
    pub fn with_coordinator(mut self, coordinator: Arc<ReauthCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Once the sender publishes `true`, no further task is scheduled.
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run every eligible task and collect one outcome per submitted task.
    pub async fn run(&self, tasks: Vec<TaskDescriptor>) -> RunReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let ctx = Arc::new(AttemptContext {
            reauth_timeout: self.reauth_timeout,
            credential: Arc::clone(&self.credential),
            coordinator: Arc::clone(&self.coordinator),
            clock: Arc::clone(&self.clock),
        });

        let mut aggregator = Aggregator::new();
        let mut join_set = JoinSet::new();
        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut submitted: HashSet<String> = HashSet::new();
        let mut stop = self.stop.clone();

        for task in tasks {
            if self.stop_requested() {
                warn!(module = %task.name, "stop requested, not scheduling remaining tasks");
                break;
            }
            if submitted.contains(&task.name) {
                warn!(module = %task.name, "duplicate task name, ignoring second descriptor");
                continue;
            }
            if !task.should_run() {
                debug!(module = %task.name, "skipped (not requested)");
                aggregator.note_skipped();
                continue;
            }

            // スロットが空くのを待つ間も停止シグナルは見る
            let permit = match stop.as_mut() {
                Some(rx) => tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                    Ok(_) = rx.wait_for(|stopped| *stopped) => {
                        warn!(module = %task.name, "stop requested, not scheduling remaining tasks");
                        break;
                    }
                },
                None => Arc::clone(&semaphore).acquire_owned().await,
            };
            let Ok(permit) = permit else {
                break;
            };

            info!(module = %task.name, "scheduling task");
            aggregator.note_scheduled();
            submitted.insert(task.name.clone());

            let name = task.name.clone();
            let ctx = Arc::clone(&ctx);
            let handle = join_set.spawn(async move {
                let _permit = permit;
                execute_task(&ctx, task).await
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            let now = self.clock.now().naive_local();
            match joined {
                Ok((id, outcome)) => {
                    names.remove(&id);
                    aggregator.record(outcome, now);
                }
                Err(err) => {
                    let name = names
                        .remove(&err.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    aggregator
                        .record_collection_failure(name, format!("Future processing error: {err}"), now);
                }
            }
        }

        aggregator.finish()
    }
}

async fn attempt(
    source: &dyn DataSource,
    credential: &dyn CredentialHandle,
) -> Result<ModuleResult, TaskError> {
    let snapshot = credential.current().await;
    let raw = source.retrieve(snapshot).await?;
    source.transform(raw)
}

async fn refresh_and_load(credential: &dyn CredentialHandle) -> Result<(), String> {
    credential.refresh().await.map_err(|e| e.to_string())?;
    credential.load().await.map_err(|e| e.to_string())
}

/// Attempt a task, with at most one retry after reauthentication.
async fn execute_task(ctx: &AttemptContext, task: TaskDescriptor) -> TaskOutcome {
    let started = Instant::now();
    let name = task.name.as_str();
    let observed_generation = ctx.coordinator.generation();

    let original = match attempt(task.source.as_ref(), ctx.credential.as_ref()).await {
        Ok(payload) => {
            let completed_at = ctx.clock.now().naive_local();
            return TaskOutcome::succeeded(name, payload, completed_at, elapsed(started), 1);
        }
        Err(err) => err,
    };

    if !original.kind.is_retryable() {
        return TaskOutcome::failed(
            name,
            original.kind,
            format!("{} error: {}", original.kind, original.message),
            elapsed(started),
            1,
        );
    }

    warn!(module = %name, error = %original, "authentication failure, waiting for reauth lock");
    let Some(guard) = ctx.coordinator.try_acquire(ctx.reauth_timeout).await else {
        warn!(module = %name, timeout_secs = ctx.reauth_timeout.as_secs_f64(), "reauth lock timeout");
        return TaskOutcome::failed(
            name,
            ErrorKind::Authentication,
            format!("Re-auth lock timeout. Original error: {original}"),
            elapsed(started),
            1,
        );
    };
    debug!(module = %name, "reauth lock acquired");

    if ctx.coordinator.generation() == observed_generation {
        if let Err(reauth_err) = refresh_and_load(ctx.credential.as_ref()).await {
            guard.release();
            return TaskOutcome::failed(
                name,
                ErrorKind::Authentication,
                format!("Re-auth failed: {reauth_err}. Original error: {original}"),
                elapsed(started),
                1,
            );
        }
        guard.mark_refreshed();
        info!(module = %name, "credential refreshed");
    } else {
        debug!(module = %name, "credential already refreshed by another task");
    }
    guard.release();
    debug!(module = %name, "reauth lock released, retrying");

    match attempt(task.source.as_ref(), ctx.credential.as_ref()).await {
        Ok(payload) => {
            info!(module = %name, "retry after reauth succeeded");
            let completed_at = ctx.clock.now().naive_local();
            TaskOutcome::succeeded(name, payload, completed_at, elapsed(started), 2)
        }
        Err(retry_err) => TaskOutcome::failed(
            name,
            retry_err.kind,
            format!("Retry after re-auth also failed for {name}: {retry_err}"),
            elapsed(started),
            2,
        ),
    }
}

fn elapsed(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}
