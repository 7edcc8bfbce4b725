//! End-to-end scenarios across runner, audit and merge store.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde_json::{Value, json};

use harvest_core::app::audit::AuditBuilder;
use harvest_core::app::{ReauthCoordinator, TaskDescriptor, TaskRunner};
use harvest_core::domain::{RunKey, TaskError};
use harvest_core::ports::{SystemClock, UlidGenerator};
use harvest_core::store::{AUDIT_KEY, Document, MergeStore, Target, TargetLayout};
use harvest_core::test_support::{CountingCredential, ScriptedSource, Step};

fn runner(credential: Arc<CountingCredential>, max: usize) -> TaskRunner {
    TaskRunner::new(max, credential, Arc::new(SystemClock))
}

#[tokio::test]
async fn skipped_task_is_absent_and_successful_task_present() {
    let a = ScriptedSource::new([Step::ok(json!({"rows": 3})).delayed(Duration::from_millis(100))]);
    let b = ScriptedSource::ok(json!(0));

    let report = runner(Arc::new(CountingCredential::new()), 2)
        .run(vec![
            TaskDescriptor::new("A", a),
            TaskDescriptor::new("B", b.clone()).with_predicate(|| false),
        ])
        .await;

    let names: Vec<_> = report.outcomes.keys().cloned().collect();
    assert_eq!(names, vec!["A".to_string()]);
    assert!(report.outcomes["A"].payload.is_some());
    assert!(report.errors.is_empty());
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn unauthorized_then_success_after_refresh() {
    let attempt = Duration::from_millis(40);
    let refresh = Duration::from_millis(30);
    let c = ScriptedSource::new([
        Step::err(TaskError::untyped("401 Unauthorized")).delayed(attempt),
        Step::ok(json!([{"ok": true}])).delayed(attempt),
    ]);
    let credential = Arc::new(CountingCredential::new().with_refresh_delay(refresh));

    let report = runner(credential.clone(), 2)
        .run(vec![TaskDescriptor::new("C", c.clone())])
        .await;

    assert!(report.errors.is_empty());
    let entry = &report.outcomes["C"];
    assert!(entry.payload.is_some());
    assert!(entry.duration_secs >= (attempt * 2 + refresh).as_secs_f64());
    assert_eq!(credential.refreshes(), 1);
}

#[tokio::test]
async fn racing_auth_failures_refresh_once() {
    let credential = Arc::new(CountingCredential::new().with_refresh_delay(Duration::from_millis(50)));
    let coordinator = Arc::new(ReauthCoordinator::new());
    let sources: Vec<_> = (0..4)
        .map(|_| {
            ScriptedSource::new([
                Step::err(TaskError::authentication("session expired")).delayed(Duration::from_millis(20)),
                Step::ok(json!(1)),
            ])
        })
        .collect();
    let tasks = sources
        .iter()
        .enumerate()
        .map(|(i, s)| TaskDescriptor::new(format!("R{i}"), s.clone()))
        .collect();

    let report = runner(credential.clone(), 4)
        .with_coordinator(coordinator.clone())
        .run(tasks)
        .await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(credential.refreshes(), 1);
    assert_eq!(coordinator.generation(), 1);
    for source in &sources {
        assert_eq!(source.calls(), 2);
    }
}

fn key() -> RunKey {
    RunKey::new("BCN1", NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(), "Night", "Standard")
}

fn fragment(builder: &AuditBuilder, module: &str, data: Value, total: f64) -> Document {
    let record = builder.record(total, &[module.to_string()], vec![], &BTreeMap::new());
    let block = harvest_core::app::audit::fold(record, vec![]);
    let mut doc = Document::new();
    doc.insert(module.to_string(), data);
    doc.insert(AUDIT_KEY.to_string(), serde_json::to_value(&block).unwrap());
    doc
}

#[test]
fn second_merge_overwrites_module_and_extends_history() {
    let temp = tempfile::tempdir().unwrap();
    let store = MergeStore::new(
        vec![Target::new("local", temp.path(), TargetLayout::SiteDate)],
        vec!["X".to_string()],
    );
    let clock = Arc::new(SystemClock);
    let builder = AuditBuilder::new(clock, Arc::new(UlidGenerator::new(SystemClock)));

    let first = fragment(&builder, "X", json!("data1"), 1.25);
    let second = fragment(&builder, "X", json!("data2"), 2.5);
    let run1 = first[AUDIT_KEY]["History"][0].clone();
    let run2 = second[AUDIT_KEY]["History"][0].clone();

    store.merge_and_write(&first, &key()).unwrap();
    let path = store.merge_and_write(&second, &key()).unwrap();

    let doc: Document = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["X"], "data2");
    assert_eq!(doc[AUDIT_KEY]["History"], json!([run1, run2]));
    assert_eq!(doc[AUDIT_KEY]["CumulativeTimeSeconds"], 3.75);

    // 同じ断片を再マージしても合計は変わらない
    let path = store.merge_and_write(&second, &key()).unwrap();
    let doc: Document = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc[AUDIT_KEY]["History"].as_array().unwrap().len(), 2);
    assert_eq!(doc[AUDIT_KEY]["CumulativeTimeSeconds"], 3.75);
}

#[test]
fn audit_builder_total_tracks_wall_clock() {
    let builder = AuditBuilder::new(Arc::new(SystemClock), Arc::new(UlidGenerator::new(SystemClock)));
    let started = Instant::now() - Duration::from_millis(200);
    let (block, total) = builder.build(started, &[], vec![], &BTreeMap::new(), None);
    assert!(total >= 0.2);
    assert_eq!(block.cumulative_secs, block.latest.total_secs);
}
