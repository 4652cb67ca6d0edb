//! End-to-end reconciliation tests against the in-memory store
//!
//! Covers:
//! - Idempotence on redundant notifications
//! - Conversion of every rule
//! - Absent source handling
//! - Override bypass of the version check
//! - Full replace of the target
//! - Registry last-write-wins on a shared source
//! - The controller loop, including redelivery

use cmtransform_core::config::LoopConfig;
use cmtransform_core::store::{StoreError, StoreOp};
use cmtransform_core::{
    ConfigMap, Error, MemoryStore, ObjectRef, TransformResource, TransformSpecification,
};
use cmtransform_runtime::{
    Controller, Dispatcher, EventKind, Notification, Outcome, Registry, Router, TransformEngine,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Harness {
    store: Arc<MemoryStore>,
    engine: Arc<TransformEngine>,
    dispatcher: Arc<Dispatcher>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(TransformEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(Registry::new()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), Router::default()));
    Harness {
        store,
        engine,
        dispatcher,
    }
}

fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn source(version: &str, entries: &[(&str, &str)]) -> ConfigMap {
    let mut cm = ConfigMap::new("default", "app-config", data(entries));
    cm.metadata.resource_version = Some(version.to_string());
    cm
}

fn transform(name: &str, target: &str, keys: &[&str]) -> TransformResource {
    let transforms: Vec<_> = keys
        .iter()
        .map(|k| json!({"key": k, "type": "base64"}))
        .collect();
    TransformResource::from_json_value(json!({
        "apiVersion": "xlscsde.nhs.uk/v1",
        "kind": "ConfigMapTransform",
        "metadata": {"name": name, "namespace": "default"},
        "spec": {
            "sourceRef": {"name": "app-config"},
            "targetConfigMap": target,
            "transforms": transforms
        }
    }))
    .unwrap()
}

fn source_ref() -> ObjectRef {
    ObjectRef::new("default", "app-config")
}

fn target_ref() -> ObjectRef {
    ObjectRef::new("default", "app-config-encoded")
}

// =============================================================================
// Example scenario
// =============================================================================

#[tokio::test]
async fn test_scenario_create_skip_replace() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("42", &[("user", "alice")]));

    // First apply creates the target and records the version
    let outcome = h.engine.refresh_specification(&resource).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Applied {
            created: true,
            version: Some("42".to_string())
        }
    );
    assert_eq!(
        h.store.configmap(&target_ref()).unwrap().data,
        data(&[("user", "YWxpY2U=")])
    );
    let stored = h.store.transform(&ObjectRef::new("default", "encoder")).unwrap();
    assert_eq!(stored.last_resource_version(), Some("42".to_string()));
    let writes_after_first = h.store.write_stats();
    assert_eq!(writes_after_first.total(), 2);

    // Same source version: zero writes
    let outcome = h.engine.reconcile_source(&source_ref()).await.unwrap();
    assert_eq!(
        outcome,
        Some(Outcome::UpToDate {
            version: "42".to_string()
        })
    );
    assert_eq!(h.store.write_stats(), writes_after_first);

    // New source version: replace and record
    h.store.put_configmap(source("43", &[("user", "bob")]));
    let outcome = h.engine.reconcile_source(&source_ref()).await.unwrap();
    assert_eq!(
        outcome,
        Some(Outcome::Applied {
            created: false,
            version: Some("43".to_string())
        })
    );
    assert_eq!(
        h.store.configmap(&target_ref()).unwrap().data,
        data(&[("user", "Ym9i")])
    );
    let stored = h.store.transform(&ObjectRef::new("default", "encoder")).unwrap();
    assert_eq!(stored.last_resource_version(), Some("43".to_string()));
    assert_eq!(h.store.write_stats().replaces, 1);
}

// =============================================================================
// Testable properties
// =============================================================================

#[tokio::test]
async fn test_transform_if_exists_is_idempotent() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("7", &[("user", "alice")]));
    let mut spec = TransformSpecification::from_resource(&resource).unwrap();

    h.engine.transform_if_exists(&mut spec, false).await.unwrap();
    let before = h.store.write_stats();

    let outcome = h.engine.transform_if_exists(&mut spec, false).await.unwrap();
    assert!(matches!(outcome, Outcome::UpToDate { .. }));
    assert_eq!(h.store.write_stats(), before);
}

#[tokio::test]
async fn test_status_written_by_controller_makes_resume_a_no_op() {
    let h = harness();
    h.store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("42", &[("user", "alice")]));

    let first = h.store.transform(&ObjectRef::new("default", "encoder")).unwrap();
    h.engine.refresh_specification(&first).await.unwrap();
    let before = h.store.write_stats();

    // A restarted controller rebuilds state from the persisted status
    let restarted = harness();
    restarted
        .store
        .put_transform(h.store.transform(&ObjectRef::new("default", "encoder")).unwrap());
    restarted.store.put_configmap(source("42", &[("user", "alice")]));
    restarted
        .store
        .put_configmap(h.store.configmap(&target_ref()).unwrap());

    let resumed = restarted
        .store
        .transform(&ObjectRef::new("default", "encoder"))
        .unwrap();
    let outcome = restarted.engine.refresh_specification(&resumed).await.unwrap();
    assert!(matches!(outcome, Outcome::UpToDate { .. }));
    assert_eq!(restarted.store.write_stats().total(), 0);
    assert_eq!(h.store.write_stats(), before);
}

#[tokio::test]
async fn test_every_rule_is_converted() {
    let h = harness();
    let resource = h.store.put_transform(transform(
        "encoder",
        "app-config-encoded",
        &["user", "password", "host"],
    ));
    h.store.put_configmap(source(
        "1",
        &[("user", "alice"), ("password", "s3cret"), ("host", "db.local"), ("extra", "x")],
    ));

    h.engine.refresh_specification(&resource).await.unwrap();

    let target = h.store.configmap(&target_ref()).unwrap();
    assert_eq!(
        target.data,
        data(&[
            ("user", "YWxpY2U="),
            ("password", "czNjcmV0"),
            ("host", "ZGIubG9jYWw="),
        ])
    );
}

#[tokio::test]
async fn test_absent_source_writes_nothing_and_registers_nothing() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));

    let outcome = h.engine.refresh_specification(&resource).await.unwrap();
    assert_eq!(outcome, Outcome::SourceMissing);
    assert_eq!(h.store.write_stats().total(), 0);
    assert!(h.store.configmap(&target_ref()).is_none());

    let registry = h.engine.registry();
    assert!(registry.for_source(&source_ref()).is_none());
    // the specification itself is still known by identity
    assert!(
        registry
            .specification(&ObjectRef::new("default", "encoder"))
            .is_some()
    );

    // A source notification before the first successful read is ignored
    h.store.put_configmap(source("1", &[("user", "alice")]));
    let outcome = h.engine.reconcile_source(&source_ref()).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_override_reapplies_unchanged_version() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("5", &[("user", "alice")]));
    let mut spec = TransformSpecification::from_resource(&resource).unwrap();

    h.engine.transform_if_exists(&mut spec, false).await.unwrap();
    let before = h.store.write_stats();

    let outcome = h.engine.transform_if_exists(&mut spec, true).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Applied {
            created: false,
            version: Some("5".to_string())
        }
    );
    assert_eq!(h.store.write_stats().replaces, before.replaces + 1);
    assert_eq!(h.store.write_stats().status_patches, before.status_patches + 1);
}

#[tokio::test]
async fn test_reapply_drops_keys_not_covered_by_rules() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("3", &[("user", "alice")]));
    h.store.put_configmap(ConfigMap::new(
        "default",
        "app-config-encoded",
        data(&[("user", "old"), ("stale", "leftover")]),
    ));

    let outcome = h.engine.refresh_specification(&resource).await.unwrap();
    assert!(matches!(outcome, Outcome::Applied { created: false, .. }));

    let target = h.store.configmap(&target_ref()).unwrap();
    assert_eq!(target.data, data(&[("user", "YWxpY2U=")]));
}

#[tokio::test]
async fn test_latest_specification_owns_shared_source() {
    let h = harness();
    let first = h
        .store
        .put_transform(transform("first", "out-first", &["user"]));
    let second = h
        .store
        .put_transform(transform("second", "out-second", &["user"]));
    h.store.put_configmap(source("1", &[("user", "alice")]));

    h.engine.refresh_specification(&first).await.unwrap();
    h.engine.refresh_specification(&second).await.unwrap();

    let owner = h.engine.registry().for_source(&source_ref()).unwrap();
    assert_eq!(owner.identity.name, "second");

    // A source change only reaches the most recent registration
    h.store.put_configmap(source("2", &[("user", "bob")]));
    h.engine.reconcile_source(&source_ref()).await.unwrap();

    let first_target = h.store.configmap(&ObjectRef::new("default", "out-first")).unwrap();
    let second_target = h.store.configmap(&ObjectRef::new("default", "out-second")).unwrap();
    assert_eq!(first_target.data["user"], "YWxpY2U=");
    assert_eq!(second_target.data["user"], "Ym9i");
}

// =============================================================================
// Error handling
// =============================================================================

#[tokio::test]
async fn test_missing_source_key_fails_without_writes() {
    let h = harness();
    let resource = h.store.put_transform(transform(
        "encoder",
        "app-config-encoded",
        &["user", "password"],
    ));
    h.store.put_configmap(source("1", &[("user", "alice")]));

    let err = h.engine.refresh_specification(&resource).await.unwrap_err();
    assert!(matches!(err, Error::Conversion { ref key, .. } if key == "password"));
    assert_eq!(h.store.write_stats().total(), 0);
    let stored = h.store.transform(&ObjectRef::new("default", "encoder")).unwrap();
    assert!(stored.last_resource_version().is_none());
}

#[tokio::test]
async fn test_malformed_specification_is_reported() {
    let h = harness();
    let resource = TransformResource::from_json_value(json!({
        "apiVersion": "xlscsde.nhs.uk/v1",
        "kind": "ConfigMapTransform",
        "metadata": {"name": "broken"},
        "spec": {"sourceRef": {"name": "app-config"}, "transforms": []}
    }))
    .unwrap();

    let err = h.engine.refresh_specification(&resource).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "spec.targetConfigMap"));
    assert_eq!(h.engine.registry().specification_count(), 0);
}

#[tokio::test]
async fn test_source_read_failure_propagates() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("1", &[("user", "alice")]));
    h.store
        .fail_next(StoreOp::GetConfigMap, StoreError::backend("apiserver timeout"));

    let err = h.engine.refresh_specification(&resource).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Backend { .. })));
    assert!(h.engine.registry().for_source(&source_ref()).is_none());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_notifications_apply_once() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("9", &[("user", "alice")]));
    h.engine.refresh_specification(&resource).await.unwrap();
    h.store.put_configmap(source("10", &[("user", "bob")]));
    let before = h.store.write_stats();

    let notification = Notification::configmap(EventKind::Updated, source_ref());
    let results = futures::future::join_all((0..8).map(|_| {
        let dispatcher = h.dispatcher.clone();
        let notification = notification.clone();
        tokio::spawn(async move { dispatcher.dispatch(&notification).await })
    }))
    .await;

    let applied = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .filter(|outcome| matches!(outcome, Some(Outcome::Applied { .. })))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(h.store.write_stats().replaces, before.replaces + 1);
    assert_eq!(h.store.write_stats().status_patches, before.status_patches + 1);
}

// =============================================================================
// Controller loop
// =============================================================================

fn fast_retries(max_retries: u32) -> LoopConfig {
    LoopConfig {
        max_retries,
        retry_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_controller_drains_and_reports() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("42", &[("user", "alice")]));

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(3));
    let run = tokio::spawn(controller.run());

    handle
        .notify(Notification::transform(EventKind::Resumed, resource))
        .await
        .unwrap();
    drop(handle);

    let stats = run.await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        h.store.configmap(&target_ref()).unwrap().data["user"],
        "YWxpY2U="
    );
}

#[tokio::test]
async fn test_controller_resumes_stored_specifications() {
    let h = harness();
    h.store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store
        .put_transform(transform("mirror", "app-config-mirror", &["user"]));
    h.store.put_configmap(source("42", &[("user", "alice")]));

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(3));
    let run = tokio::spawn(controller.run());

    let resumed = handle.resume(h.store.as_ref()).await.unwrap();
    assert_eq!(resumed, 2);
    drop(handle);

    let stats = run.await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.applied, 2);
    for target in ["app-config-encoded", "app-config-mirror"] {
        let written = h.store.configmap(&ObjectRef::new("default", target)).unwrap();
        assert_eq!(written.data["user"], "YWxpY2U=");
    }
}

#[tokio::test]
async fn test_resume_surfaces_list_failure() {
    let h = harness();
    h.store
        .fail_next(StoreOp::ListTransforms, StoreError::backend("unavailable"));

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(1));
    let run = tokio::spawn(controller.run());

    let err = handle.resume(h.store.as_ref()).await.unwrap_err();
    assert!(format!("{err:#}").contains("unavailable"));
    drop(handle);
    assert_eq!(run.await.unwrap().received, 0);
}

#[tokio::test]
async fn test_controller_redelivers_store_failures() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    h.store.put_configmap(source("42", &[("user", "alice")]));
    h.store
        .fail_next(StoreOp::CreateConfigMap, StoreError::backend("conflict"));

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(3));
    let run = tokio::spawn(controller.run());
    handle
        .notify(Notification::transform(EventKind::Created, resource))
        .await
        .unwrap();
    drop(handle);

    let stats = run.await.unwrap();
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.failed, 0);
    assert!(h.store.configmap(&target_ref()).is_some());
}

#[tokio::test]
async fn test_controller_does_not_retry_validation_errors() {
    let h = harness();
    let broken = TransformResource::from_json_value(json!({
        "apiVersion": "xlscsde.nhs.uk/v1",
        "kind": "ConfigMapTransform",
        "metadata": {"name": "broken"},
        "spec": {}
    }))
    .unwrap();

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(3));
    let run = tokio::spawn(controller.run());
    handle
        .notify(Notification::transform(EventKind::Created, broken))
        .await
        .unwrap();
    drop(handle);

    let stats = run.await.unwrap();
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_controller_gives_up_after_max_retries() {
    let h = harness();
    let resource = h
        .store
        .put_transform(transform("encoder", "app-config-encoded", &["user"]));
    for _ in 0..3 {
        h.store
            .fail_next(StoreOp::GetConfigMap, StoreError::backend("unavailable"));
    }

    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(2));
    let run = tokio::spawn(controller.run());
    handle
        .notify(Notification::transform(EventKind::Updated, resource))
        .await
        .unwrap();
    drop(handle);

    let stats = run.await.unwrap();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.applied, 0);
}

#[tokio::test]
async fn test_controller_shutdown_stops_loop() {
    let h = harness();
    let (controller, handle) = Controller::new(h.dispatcher.clone(), fast_retries(1));
    let run = tokio::spawn(controller.run());

    handle.shutdown();
    let stats = run.await.unwrap();
    assert_eq!(stats, Default::default());

    let err = handle
        .notify(Notification::configmap(EventKind::Created, source_ref()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("controller stopped"));
}
