// tests/wait_notify.rs

mod common;
use crate::common::init_tracing;
use crate::common::recording::RecordingCallback;
use crate::common::test_config;

use std::error::Error;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use nodeflow::errors::EngineError;
use nodeflow::execution::ResponseData;
use nodeflow::store::StateStore;
use nodeflow::store::Table;
use nodeflow::waiter::{NotifyEvent, WaitNotifyEngine, spawn_consumers};

type TestResult = Result<(), Box<dyn Error>>;

const PUBLISHER: &str = "pub";

fn engine_with_recorder(recorder: Arc<RecordingCallback>) -> (StateStore, Arc<WaitNotifyEngine>) {
    let store = StateStore::in_memory();
    let engine = Arc::new(WaitNotifyEngine::new(store.clone(), test_config()));
    engine.register_publisher(PUBLISHER, recorder);
    (store, engine)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn single_id_wait_fires_once_and_is_deleted() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (store, engine) = engine_with_recorder(Arc::clone(&recorder));

    let wait_id = engine.wait_for_all_on(PUBLISHER, &json!({"cb": 1}), &ids(&["u1"]))?;
    engine.done_with("u1", ResponseData::Value(json!({"ok": true})))?;

    assert_eq!(engine.process_pending().await?, 1);
    assert_eq!(engine.process_pending().await?, 0);

    let deliveries = recorder.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].callback, json!({"cb": 1}));
    assert_eq!(
        deliveries[0].responses.get("u1"),
        Some(&ResponseData::Value(json!({"ok": true})))
    );

    assert!(engine.wait_instance(&wait_id)?.is_none());
    assert!(store.waits.get(&wait_id)?.is_none());
    assert_eq!(engine.pending_events()?, 0);
    Ok(())
}

#[tokio::test]
async fn wait_does_not_fire_until_every_id_has_a_response() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (_store, engine) = engine_with_recorder(Arc::clone(&recorder));

    engine.wait_for_all_on(PUBLISHER, &json!(null), &ids(&["a", "b"]))?;
    engine.done_with("a", ResponseData::Value(json!(1)))?;

    assert_eq!(engine.process_pending().await?, 0);
    assert!(recorder.deliveries().is_empty());

    engine.done_with("b", ResponseData::Value(json!(2)))?;
    assert_eq!(engine.process_pending().await?, 1);
    assert_eq!(recorder.deliveries()[0].responses.len(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_done_with_from_many_callers_fires_exactly_once() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (_store, engine) = engine_with_recorder(Arc::clone(&recorder));
    let consumers = spawn_consumers(Arc::clone(&engine));

    engine.wait_for_all_on(PUBLISHER, &json!("b"), &ids(&["u1", "u2", "u3"]))?;

    let mut handles = Vec::new();
    for caller in 0..10 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for id in ["u3", "u1", "u2"] {
                let _ = engine.done_with(id, ResponseData::Value(json!({ "caller": caller })));
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }

    crate::common::with_timeout(async {
        while recorder.deliveries().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    // Give the other workers a chance to (wrongly) deliver again.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    consumers.shutdown().await;

    let deliveries = recorder.deliveries();
    assert_eq!(deliveries.len(), 1);
    let keys: Vec<&str> = deliveries[0].responses.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["u1", "u2", "u3"]);
    Ok(())
}

#[tokio::test]
async fn response_recorded_before_the_wait_is_still_delivered() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (_store, engine) = engine_with_recorder(Arc::clone(&recorder));

    engine.done_with("early", ResponseData::Value(json!("first")))?;
    engine.wait_for_all_on(PUBLISHER, &json!(null), &ids(&["early"]))?;

    assert_eq!(engine.pending_events()?, 1);
    assert_eq!(engine.process_pending().await?, 1);
    assert_eq!(recorder.deliveries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn first_response_for_a_correlation_id_wins() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (_store, engine) = engine_with_recorder(Arc::clone(&recorder));

    engine.wait_for_all_on(PUBLISHER, &json!(null), &ids(&["dup"]))?;
    engine.done_with("dup", ResponseData::Value(json!("first")))?;
    engine.done_with("dup", ResponseData::Value(json!("second")))?;

    assert_eq!(engine.process_pending().await?, 1);
    let deliveries = recorder.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(
        deliveries[0].responses.get("dup"),
        Some(&ResponseData::Value(json!("first")))
    );
    Ok(())
}

#[tokio::test]
async fn empty_correlation_ids_are_rejected() {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (_store, engine) = engine_with_recorder(recorder);

    let err = engine
        .wait_for_all_on(PUBLISHER, &json!(null), &[])
        .unwrap_err();
    assert!(matches!(err, EngineError::ContractViolation(_)));
}

#[tokio::test]
async fn failing_callback_still_consumes_the_entry_and_other_waits_deliver() -> TestResult {
    init_tracing();
    let failing = Arc::new(RecordingCallback::failing(1));
    let healthy = Arc::new(RecordingCallback::new());
    let store = StateStore::in_memory();
    let engine = WaitNotifyEngine::new(store, test_config());
    engine.register_publisher("failing", failing.clone());
    engine.register_publisher("healthy", healthy.clone());

    engine.wait_for_all_on("failing", &json!(null), &ids(&["x"]))?;
    engine.wait_for_all_on("healthy", &json!(null), &ids(&["y"]))?;
    engine.done_with("x", ResponseData::Value(json!(1)))?;
    engine.done_with("y", ResponseData::Value(json!(2)))?;

    assert_eq!(engine.process_pending().await?, 2);
    assert_eq!(engine.pending_events()?, 0);
    assert_eq!(failing.deliveries().len(), 1);
    assert_eq!(healthy.deliveries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn entries_for_unknown_publishers_are_retried_then_dropped() -> TestResult {
    init_tracing();
    let store = StateStore::in_memory();
    let mut config = test_config();
    config.max_delivery_attempts = 2;
    let engine = WaitNotifyEngine::new(store, config);

    engine.wait_for_all_on("nobody", &json!(null), &ids(&["z"]))?;
    engine.done_with("z", ResponseData::Value(json!(0)))?;

    assert_eq!(engine.process_pending().await?, 0);
    assert_eq!(engine.pending_events()?, 1);

    assert_eq!(engine.process_pending().await?, 0);
    assert_eq!(engine.pending_events()?, 0);
    Ok(())
}

#[tokio::test]
async fn zombie_sweep_removes_only_old_unreferenced_responses() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (store, engine) = engine_with_recorder(recorder);

    engine.done_with("orphan", ResponseData::Value(json!(1)))?;
    engine.done_with("held", ResponseData::Value(json!(2)))?;
    engine.wait_for_all_on(PUBLISHER, &json!(null), &ids(&["held", "missing"]))?;

    // Nothing is old enough yet.
    assert_eq!(engine.sweep_zombie_responses(Utc::now())?, 0);

    let later = Utc::now() + ChronoDuration::minutes(15);
    assert_eq!(engine.sweep_zombie_responses(later)?, 1);
    assert!(store.responses.get("orphan")?.is_none());
    assert!(store.responses.get("held")?.is_some());
    Ok(())
}

#[tokio::test]
async fn recover_requeues_complete_waits_without_a_queue_entry() -> TestResult {
    init_tracing();
    let recorder = Arc::new(RecordingCallback::new());
    let (store, engine) = engine_with_recorder(Arc::clone(&recorder));

    engine.wait_for_all_on(PUBLISHER, &json!(null), &ids(&["r"]))?;
    engine.done_with("r", ResponseData::Value(json!(1)))?;

    // Simulate a crash that lost the queue entry.
    for event in store.notify_queue.find(&|_: &NotifyEvent| true)? {
        store.notify_queue.remove(&event.id)?;
    }
    assert_eq!(engine.process_pending().await?, 0);

    assert_eq!(engine.recover()?, 1);
    assert_eq!(engine.process_pending().await?, 1);
    assert_eq!(recorder.deliveries().len(), 1);
    Ok(())
}
