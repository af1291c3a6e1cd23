//! Builders shared by the controller unit tests

use std::sync::Arc;
use std::time::Duration;

use kube::core::ObjectMeta;

use crate::config::OperatorConfig;
use crate::controller::Context;
use crate::controller::client::MockControlPlane;
use crate::controller::collaborators::{
    MockBackupScheduler, MockMonitorAgent, MockRestoreRunner, MockSnapshotHandler,
};
use crate::controller::events::MockEventRecorder;
use crate::crd::{Elasticsearch, ElasticsearchSpec};

/// Instance `name` in namespace `default` with a default spec
pub fn instance(name: &str) -> Elasticsearch {
    Elasticsearch {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: ElasticsearchSpec::default(),
        status: None,
    }
}

/// Recorder accepting any event
pub fn quiet_recorder() -> MockEventRecorder {
    let mut recorder = MockEventRecorder::new();
    recorder.expect_record().returning(|_, _, _, _| ());
    recorder
}

/// Short timeouts so bounded waits end quickly under paused time
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        statefulset_ready_timeout: Duration::from_secs(60),
        restore_job_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_secs(1),
        ..OperatorConfig::default()
    }
}

/// Context around a mocked control plane; other collaborators have no expectations
pub fn context(control_plane: MockControlPlane) -> Context {
    context_with(control_plane, quiet_recorder())
}

pub fn context_with(control_plane: MockControlPlane, recorder: MockEventRecorder) -> Context {
    Context {
        control_plane: Arc::new(control_plane),
        recorder: Arc::new(recorder),
        scheduler: Arc::new(MockBackupScheduler::new()),
        restore: Arc::new(MockRestoreRunner::new()),
        monitor: Arc::new(MockMonitorAgent::new()),
        snapshots: Arc::new(MockSnapshotHandler::new()),
        config: test_config(),
        health_state: None,
    }
}
