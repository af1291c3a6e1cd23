//! Pause path scenarios

use std::sync::Arc;

use elasticsearch_operator::controller::{InstanceKey, Severity, reasons};
use elasticsearch_operator::resources::KIND;
use elasticsearch_operator::watch::{OperatorEvent, ResourceEvent};

use crate::common::*;

#[tokio::test]
async fn test_delete_pauses_into_dormant_database() {
    let h = Harness::new();
    let es = h
        .add(
            ElasticsearchBuilder::new("es1")
                .backup("0 */6 * * *")
                .monitor("prometheus.io/builtin")
                .build(),
        )
        .await;
    let key = InstanceKey::of(&es);
    assert!(h.scheduler.get(&key).await.is_some());

    h.delete(&es).await;

    let ddb = h.cp.dormant(NAMESPACE, "es1").expect("dormant database");
    assert_eq!(ddb.database_kind(), Some(KIND));
    assert!(ddb.spec.pause);
    let origin = ddb.spec.origin.spec.elasticsearch.as_ref().unwrap();
    assert_eq!(origin.certificate_secret.as_deref(), Some("es1-cert"));
    assert_eq!(origin.database_secret.as_deref(), Some("es1-auth"));

    assert!(h.scheduler.get(&key).await.is_none());
    assert_eq!(
        h.monitor.calls(),
        vec!["add:es1".to_string(), "delete:es1".to_string()]
    );
    assert!(h.recorder.has(Severity::Normal, reasons::PAUSING));
    assert!(h.recorder.has(Severity::Normal, reasons::SUCCESSFUL_MONITOR_DELETE));

    // Secrets survive the pause
    assert!(h.cp.secret(NAMESPACE, "es1-cert").is_some());
    assert!(h.cp.secret(NAMESPACE, "es1-auth").is_some());
}

#[tokio::test]
async fn test_replayed_delete_is_idempotent() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;

    h.delete(&es).await;
    h.dispatcher
        .dispatch(OperatorEvent::Instance(ResourceEvent::Deleted(Arc::new(
            es.clone(),
        ))))
        .await;

    assert_eq!(h.cp.dormant_count(), 1);
    assert!(!h.recorder.has(Severity::Warning, reasons::FAILED_TO_PAUSE));
}

#[tokio::test]
async fn test_locked_instance_is_recreated() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").do_not_pause().build())
        .await;
    let creates = h.cp.secret_creates();

    h.delete(&es).await;

    assert_eq!(h.cp.dormant_count(), 0);
    let warning = h
        .recorder
        .warnings()
        .into_iter()
        .find(|e| e.reason == reasons::FAILED_TO_PAUSE)
        .expect("locked warning");
    assert!(warning.message.contains("is locked"));

    let recreated = h.cp.instance(NAMESPACE, "es1").expect("recreated instance");
    assert!(recreated.status.is_none());
    assert!(recreated.spec.do_not_pause);
    assert_eq!(recreated.spec.certificate_secret.as_deref(), Some("es1-cert"));

    // The recreated object goes through the create path again and reuses its secrets
    h.dispatcher
        .dispatch(OperatorEvent::Instance(ResourceEvent::Added(Arc::new(
            recreated.clone(),
        ))))
        .await;
    assert_eq!(h.cp.secret_creates(), creates);
    assert!(h.latest(&recreated).is_stamped());
}

#[tokio::test]
async fn test_pause_without_monitor_touches_no_monitor() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;

    h.delete(&es).await;

    assert!(h.monitor.calls().is_empty());
    assert_eq!(h.cp.dormant_count(), 1);
}

#[tokio::test]
async fn test_second_pause_captures_latest_spec() {
    let h = Harness::new();
    let first = h
        .add(ElasticsearchBuilder::new("es1").replicas(1).build())
        .await;
    h.delete(&first).await;

    let second = h
        .add(ElasticsearchBuilder::new("es1").replicas(3).build())
        .await;
    assert!(h.recorder.has(Severity::Normal, reasons::DORMANT_DATABASE_FOUND));
    h.delete(&second).await;

    assert_eq!(h.cp.dormant_count(), 1);
    let ddb = h.cp.dormant(NAMESPACE, "es1").expect("dormant database");
    let origin = ddb.spec.origin.spec.elasticsearch.as_ref().unwrap();
    assert_eq!(origin.replicas, 3);
    assert_eq!(origin.database_secret.as_deref(), Some("es1-auth"));
    assert!(!h.recorder.has(Severity::Warning, reasons::FAILED_TO_PAUSE));
}

#[tokio::test]
async fn test_pause_leaves_foreign_dormant_record_alone() {
    let h = Harness::new();
    h.cp.insert_dormant(foreign_dormant("es1", "Postgres"));

    h.dispatcher
        .dispatch(OperatorEvent::Instance(ResourceEvent::Deleted(Arc::new(
            elasticsearch("es1"),
        ))))
        .await;

    let ddb = h.cp.dormant(NAMESPACE, "es1").expect("dormant database");
    assert_eq!(ddb.database_kind(), Some("Postgres"));
    assert!(h.recorder.has(Severity::Warning, reasons::FAILED_TO_PAUSE));
}
