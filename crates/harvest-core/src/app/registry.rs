//! TaskRegistry - データソースの登録と実行ごとの TaskDescriptor 生成
//!
//! プロセス全体のシングルトンは持たない。Orchestrator が所有する設定オブジェクトで、
//! `build()` は副作用なしにその実行用の descriptor 列を返すだけ。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::domain::{ErrorKind, ErrorRecord, HarvestError, RunParams};
use crate::ports::{DataSource, SourceFactory};

/// `Function` of error records attributed to the registry itself.
pub const REGISTRY_FUNCTION: &str = "TaskRegistry";

type Predicate = Box<dyn Fn() -> bool + Send + Sync>;

/// One named unit of work, bound to a run.
pub struct TaskDescriptor {
    pub name: String,
    pub summary_suffix: String,
    should_run: Predicate,
    pub source: Arc<dyn DataSource>,
}

impl TaskDescriptor {
    /// A descriptor that always runs.
    pub fn new(name: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        Self {
            name: name.into(),
            summary_suffix: "_summary".to_string(),
            should_run: Box::new(|| true),
            source,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.should_run = Box::new(predicate);
        self
    }

    pub fn with_summary_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.summary_suffix = suffix.into();
        self
    }

    /// Evaluate the scheduling predicate. The runner calls this exactly once per run.
    pub fn should_run(&self) -> bool {
        (self.should_run)()
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("summary_suffix", &self.summary_suffix)
            .finish_non_exhaustive()
    }
}

/// Ordered set of source factories.
#[derive(Default)]
pub struct TaskRegistry {
    factories: Vec<Arc<dyn SourceFactory>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn SourceFactory>) -> Result<(), HarvestError> {
        if self.factories.iter().any(|f| f.name() == factory.name()) {
            return Err(HarvestError::DuplicateSource(factory.name().to_string()));
        }
        self.factories.push(factory);
        Ok(())
    }

    /// Registration order.
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build the descriptors for one run, in registration order.
    ///
    /// A factory that fails to build does not produce a descriptor; its failure is returned
    /// as an error record attributed to [`REGISTRY_FUNCTION`].
    pub fn build(
        &self,
        params: &RunParams,
        now: NaiveDateTime,
    ) -> (Vec<TaskDescriptor>, Vec<ErrorRecord>) {
        let requested: Arc<BTreeSet<String>> = Arc::new(params.requested());
        let mut descriptors = Vec::with_capacity(self.factories.len());
        let mut errors = Vec::new();

        for factory in &self.factories {
            match factory.build(params) {
                Ok(source) => {
                    let predicate_factory = Arc::clone(factory);
                    let requested = Arc::clone(&requested);
                    descriptors.push(
                        TaskDescriptor::new(factory.name(), source)
                            .with_summary_suffix(factory.summary_suffix())
                            .with_predicate(move || predicate_factory.should_run(&requested)),
                    );
                }
                Err(err) => {
                    tracing::error!(module = factory.name(), %err, "failed to build source");
                    errors.push(ErrorRecord::new(
                        REGISTRY_FUNCTION,
                        ErrorKind::Processing,
                        format!("{}: {err}", factory.name()),
                        now,
                        0.0,
                    ));
                }
            }
        }

        (descriptors, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedFactory, ScriptedSource};
    use chrono::NaiveDate;
    use serde_json::json;

    fn params(modules: &[&str]) -> RunParams {
        RunParams {
            site: "BCN1".into(),
            sos: "2025-03-01 06:00:00".into(),
            eos: "2025-03-01 18:00:00".into(),
            plan_type: "Standard".into(),
            shift: "Day".into(),
            requested_modules: modules.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    fn factory(name: &str) -> Arc<ScriptedFactory> {
        Arc::new(ScriptedFactory::new(name, ScriptedSource::ok(json!(1))))
    }

    #[test]
    fn test_double_registration() {
        let mut registry = TaskRegistry::new();
        registry.register(factory("YMS")).unwrap();
        let result = registry.register(factory("YMS"));
        assert!(matches!(result, Err(HarvestError::DuplicateSource(name)) if name == "YMS"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_build_keeps_registration_order() {
        let mut registry = TaskRegistry::new();
        for name in ["YMS", "Echo", "FMC"] {
            registry.register(factory(name)).unwrap();
        }
        let (tasks, errors) = registry.build(&params(&["Echo"]), now());

        assert!(errors.is_empty());
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["YMS", "Echo", "FMC"]);
        assert_eq!(registry.names(), vec!["YMS", "Echo", "FMC"]);
    }

    #[test]
    fn test_predicate_uses_requested_modules() {
        let mut registry = TaskRegistry::new();
        registry.register(factory("YMS")).unwrap();
        registry.register(factory("FMC")).unwrap();
        let (tasks, _) = registry.build(&params(&["FMC"]), now());

        assert!(!tasks[0].should_run());
        assert!(tasks[1].should_run());
    }

    #[test]
    fn test_build_failure_is_attributed_to_registry() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Arc::new(
                ScriptedFactory::new("PHC", ScriptedSource::ok(json!(1)))
                    .failing_build("bad start of shift"),
            ))
            .unwrap();
        registry.register(factory("YMS")).unwrap();

        let (tasks, errors) = registry.build(&params(&["PHC", "YMS"]), now());

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "YMS");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].function, REGISTRY_FUNCTION);
        assert!(errors[0].message.starts_with("PHC: "));
    }

    #[test]
    fn test_summary_suffix_is_carried() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Arc::new(
                ScriptedFactory::new("Galaxy", ScriptedSource::ok(json!(1)))
                    .with_summary_suffix("_percentages"),
            ))
            .unwrap();
        let (tasks, _) = registry.build(&params(&["Galaxy"]), now());
        assert_eq!(tasks[0].summary_suffix, "_percentages");
    }
}
