//! Phase transitions as observed through the status subresource

use elasticsearch_operator::controller::state_machine::TransitionContext;
use elasticsearch_operator::controller::{
    ControlPlane, LifecycleEvent, LifecycleState, LifecycleStateMachine, StatusManager,
};
use elasticsearch_operator::crd::{DatabasePhase, ElasticsearchStatus};

use crate::common::*;

#[test]
fn test_no_transition_leads_to_an_earlier_phase() {
    let machine = LifecycleStateMachine::new();
    let states = [
        LifecycleState::Unreconciled,
        LifecycleState::Creating,
        LifecycleState::Initializing,
        LifecycleState::Running,
        LifecycleState::Dormant,
    ];
    let ctx = TransitionContext {
        has_snapshot_source: true,
    };
    for from in states {
        for event in machine.valid_events(from) {
            assert!(machine.can_transition(from, event));
            if let Some(to) = machine.transition(from, *event, &ctx).target()
                && let (Some(before), Some(after)) = (from.phase(), to.phase())
            {
                assert!(after > before, "{from} -> {to} regresses");
            }
        }
    }
}

#[tokio::test]
async fn test_started_twice_is_a_no_op() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    let version = es.metadata.resource_version.clone();

    let ctx = h.reconciler().context();
    let status = StatusManager::new(ctx, NAMESPACE, "es1");
    let again = status.apply(LifecycleEvent::Started).await.unwrap();

    assert_eq!(again.metadata.resource_version, version);
    assert_eq!(
        h.cp.phase_history(NAMESPACE, "es1"),
        vec![DatabasePhase::Creating, DatabasePhase::Running]
    );
}

#[tokio::test]
async fn test_late_initialization_does_not_regress_running() {
    let h = Harness::new();
    h.cp.insert_snapshot(snapshot("snap1", "es-old"));
    h.add(ElasticsearchBuilder::new("es1").snapshot_source("snap1").build())
        .await;

    let ctx = h.reconciler().context();
    let status = StatusManager::new(ctx, NAMESPACE, "es1");
    let es = status
        .apply(LifecycleEvent::InitializationStarted)
        .await
        .unwrap();

    assert_eq!(es.phase(), Some(DatabasePhase::Running));
}

#[tokio::test]
async fn test_stale_status_write_is_rejected() {
    let h = Harness::new();
    let es = h.cp.insert_instance(elasticsearch("es1"));

    h.cp.touch_instance(NAMESPACE, "es1");

    // Writes are conditional on the version that was read
    let status = ElasticsearchStatus {
        phase: Some(DatabasePhase::Running),
        ..Default::default()
    };
    let err = h
        .cp
        .patch_instance_status(NAMESPACE, "es1", es.metadata.resource_version.clone(), &status)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("modified"));
    assert!(h.cp.phase_history(NAMESPACE, "es1").is_empty());
}
