//! Test doubles shared by unit tests and the scenario tests under `tests/`.
//!
//! Enabled with `cfg(test)` or the `test-support` feature.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::{CredentialError, HarvestError, ModuleResult, RawPayload, RunParams, TaskError};
use crate::ports::{Credential, CredentialHandle, DataSource, SourceFactory};

/// One scripted attempt of a [`ScriptedSource`].
#[derive(Debug, Clone)]
pub enum Step {
    Ok { delay: Duration, value: Value },
    Err { delay: Duration, error: TaskError },
    Panic,
}

impl Step {
    pub fn ok(value: Value) -> Self {
        Step::Ok {
            delay: Duration::ZERO,
            value,
        }
    }

    pub fn err(error: TaskError) -> Self {
        Step::Err {
            delay: Duration::ZERO,
            error,
        }
    }

    pub fn delayed(self, by: Duration) -> Self {
        match self {
            Step::Ok { value, .. } => Step::Ok { delay: by, value },
            Step::Err { error, .. } => Step::Err { delay: by, error },
            Step::Panic => Step::Panic,
        }
    }
}

/// Plays back a fixed list of attempts; the last step repeats once the list runs out.
#[derive(Debug)]
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen_generations: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen_generations: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(value: Value) -> Arc<Self> {
        Self::new([Step::ok(value)])
    }

    /// How many times `retrieve` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `retrieve` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Credential generation handed to each attempt, in call order.
    pub fn seen_generations(&self) -> Vec<u64> {
        self.seen_generations
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap_or_else(|p| p.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        match steps.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or(Step::ok(Value::Null)),
        }
    }
}

/// Shared by several factories in tests that need to observe global concurrency.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn retrieve(&self, credential: Arc<Credential>) -> Result<RawPayload, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_generations.lock() {
            seen.push(credential.generation());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = self.next_step();
        let result = match step {
            Step::Ok { delay, value } => {
                tokio::time::sleep(delay).await;
                Ok(RawPayload::Json(value))
            }
            Step::Err { delay, error } => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            Step::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted panic");
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn transform(&self, raw: RawPayload) -> Result<ModuleResult, TaskError> {
        match raw {
            RawPayload::Json(value) => Ok(ModuleResult::from_json(value)),
            other => Err(TaskError::processing(format!("unexpected payload {other:?}"))),
        }
    }
}

/// Wraps a source so every call is counted on a shared gauge.
pub struct GaugedSource {
    inner: Arc<dyn DataSource>,
    gauge: Arc<InFlightGauge>,
}

impl GaugedSource {
    pub fn new(inner: Arc<dyn DataSource>, gauge: Arc<InFlightGauge>) -> Arc<Self> {
        Arc::new(Self { inner, gauge })
    }
}

#[async_trait]
impl DataSource for GaugedSource {
    async fn retrieve(&self, credential: Arc<Credential>) -> Result<RawPayload, TaskError> {
        self.gauge.enter();
        let result = self.inner.retrieve(credential).await;
        self.gauge.exit();
        result
    }

    fn transform(&self, raw: RawPayload) -> Result<ModuleResult, TaskError> {
        self.inner.transform(raw)
    }
}

/// Factory handing out a prepared source.
pub struct ScriptedFactory {
    name: String,
    source: Arc<dyn DataSource>,
    always_run: Option<bool>,
    summary_suffix: String,
    build_error: Option<String>,
}

impl ScriptedFactory {
    pub fn new(name: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        Self {
            name: name.into(),
            source,
            always_run: None,
            summary_suffix: "_summary".to_string(),
            build_error: None,
        }
    }

    /// Ignore the requested set and answer `should_run` with a constant.
    pub fn with_should_run(mut self, run: bool) -> Self {
        self.always_run = Some(run);
        self
    }

    pub fn with_summary_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.summary_suffix = suffix.into();
        self
    }

    pub fn failing_build(mut self, message: impl Into<String>) -> Self {
        self.build_error = Some(message.into());
        self
    }
}

impl SourceFactory for ScriptedFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_run(&self, requested: &BTreeSet<String>) -> bool {
        self.always_run
            .unwrap_or_else(|| requested.contains(&self.name))
    }

    fn summary_suffix(&self) -> &str {
        &self.summary_suffix
    }

    fn build(&self, _params: &RunParams) -> Result<Arc<dyn DataSource>, HarvestError> {
        match &self.build_error {
            Some(msg) => Err(HarvestError::Config(msg.clone())),
            None => Ok(Arc::clone(&self.source)),
        }
    }
}

/// Credential handle counting refresh/load calls.
#[derive(Debug)]
pub struct CountingCredential {
    current: RwLock<Arc<Credential>>,
    refreshes: AtomicUsize,
    loads: AtomicUsize,
    refresh_delay: Duration,
    fail_refresh: bool,
    fail_prepare: bool,
}

impl Default for CountingCredential {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(Credential::new("token-0", 0))),
            refreshes: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            refresh_delay: Duration::ZERO,
            fail_refresh: false,
            fail_prepare: false,
        }
    }
}

impl CountingCredential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialHandle for CountingCredential {
    async fn prepare(&self) -> Result<(), CredentialError> {
        if self.fail_prepare {
            return Err(CredentialError::NoRefreshCommand);
        }
        Ok(())
    }

    async fn refresh(&self) -> Result<(), CredentialError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        if self.fail_refresh {
            return Err(CredentialError::RefreshFailed {
                program: "scripted".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "denied".to_string(),
            });
        }
        Ok(())
    }

    async fn load(&self) -> Result<(), CredentialError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let mut current = self.current.write().await;
        *current = Arc::new(Credential::new(format!("token-{n}"), n));
        Ok(())
    }

    async fn current(&self) -> Arc<Credential> {
        Arc::clone(&*self.current.read().await)
    }
}
