//! Update path scenarios

use elasticsearch_operator::controller::{InstanceKey, Severity, reasons};
use elasticsearch_operator::crd::{MonitorSpec, StorageSpec};

use crate::common::*;

fn replicas_of(h: &Harness, name: &str) -> Option<i32> {
    h.cp.statefulset(NAMESPACE, name)
        .and_then(|sts| sts.spec)
        .and_then(|spec| spec.replicas)
}

#[tokio::test]
async fn test_replica_change_is_patched() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").replicas(3).build())
        .await;

    let mut scaled = es.clone();
    scaled.spec.replicas = 5;
    h.update(&es, &scaled).await;

    assert_eq!(replicas_of(&h, "es1"), Some(5));
    assert!(h.recorder.warnings().is_empty(), "{:?}", h.recorder.warnings());
}

#[tokio::test]
async fn test_negative_replicas_are_rejected() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").replicas(3).build())
        .await;

    let mut invalid = es.clone();
    invalid.spec.replicas = -2;
    h.update(&es, &invalid).await;

    assert_eq!(replicas_of(&h, "es1"), Some(3));
    assert!(h.recorder.has(Severity::Warning, reasons::INVALID));
}

#[tokio::test]
async fn test_status_only_change_is_ignored() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    let events = h.recorder.events().len();

    let mut touched = es.clone();
    touched.status.as_mut().unwrap().reason = Some("touched".to_string());
    h.update(&es, &touched).await;

    assert_eq!(h.recorder.events().len(), events);
}

#[tokio::test]
async fn test_removing_backup_schedule_stops_it() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").backup("@daily").build())
        .await;
    let key = InstanceKey::of(&es);
    assert_eq!(h.scheduler.get(&key).await.as_deref(), Some("@daily"));

    let mut unscheduled = es.clone();
    unscheduled.spec.backup_schedule = None;
    h.update(&es, &unscheduled).await;

    assert!(h.scheduler.get(&key).await.is_none());
}

#[tokio::test]
async fn test_changed_backup_schedule_is_replaced() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").backup("@daily").build())
        .await;

    let rescheduled = ElasticsearchBuilder::new("es1")
        .secrets("es1-cert", "es1-auth")
        .backup("0 3 * * *")
        .build();
    h.update(&es, &rescheduled).await;

    assert_eq!(
        h.scheduler.get(&InstanceKey::of(&es)).await.as_deref(),
        Some("0 3 * * *")
    );
}

#[tokio::test]
async fn test_monitor_added_then_updated_then_removed() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;

    let monitored = ElasticsearchBuilder::new("es1")
        .secrets("es1-cert", "es1-auth")
        .monitor("prometheus.io/builtin")
        .build();
    h.update(&es, &monitored).await;

    let mut moved = monitored.clone();
    moved.spec.monitor = Some(MonitorSpec {
        agent: "coreos-prometheus-operator".to_string(),
        prometheus: None,
    });
    h.update(&monitored, &moved).await;

    let mut unmonitored = moved.clone();
    unmonitored.spec.monitor = None;
    h.update(&moved, &unmonitored).await;

    assert_eq!(
        h.monitor.calls(),
        vec![
            "add:es1".to_string(),
            "update:es1".to_string(),
            "delete:es1".to_string()
        ]
    );
    assert!(h.recorder.has(Severity::Normal, reasons::SUCCESSFUL_MONITOR_UPDATE));
}

#[tokio::test]
async fn test_monitor_failure_does_not_block_scaling() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    h.monitor.fail_calls();

    let mut changed = es.clone();
    changed.spec.replicas = 2;
    changed.spec.monitor = Some(MonitorSpec {
        agent: "prometheus.io/builtin".to_string(),
        prometheus: None,
    });
    h.update(&es, &changed).await;

    assert_eq!(replicas_of(&h, "es1"), Some(2));
    assert!(h.recorder.has(Severity::Warning, reasons::FAILED_TO_ADD_MONITOR));
}

#[tokio::test]
async fn test_storage_class_is_immutable() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").storage("10Gi").build())
        .await;

    let mut moved = es.clone();
    moved.spec.storage = Some(StorageSpec {
        storage_class: Some("fast".to_string()),
        size: "10Gi".to_string(),
    });
    moved.spec.replicas = 2;
    h.update(&es, &moved).await;

    assert!(h.recorder.has(Severity::Warning, reasons::INVALID));
    assert_eq!(replicas_of(&h, "es1"), Some(1));
}

#[tokio::test]
async fn test_update_recreates_missing_objects() {
    let h = Harness::new();
    h.add(elasticsearch("es1")).await;
    let services = h.cp.service_names(NAMESPACE).len();

    // Update of an instance created before its objects existed
    let other = h.cp.insert_instance(
        ElasticsearchBuilder::new("es9")
            .secrets("es9-cert", "es9-auth")
            .build(),
    );
    let mut changed = other.clone();
    changed.spec.replicas = 2;
    h.update(&other, &changed).await;

    assert_eq!(replicas_of(&h, "es9"), Some(2));
    assert_eq!(h.cp.service_names(NAMESPACE).len(), services + 1);
}
