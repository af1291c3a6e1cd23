// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice,
    dead_code
)]

//! Common test utilities shared across test targets
//!
//! ```rust,ignore
//! #[path = "../common/mod.rs"]
//! mod common;
//! use common::*;
//! ```

mod fixtures;

pub use fakes::*;
pub use fixtures::*;

use std::sync::Arc;

use elasticsearch_operator::OperatorConfig;
use elasticsearch_operator::controller::{
    Context, ControlPlane, JobRestoreRunner, LoggingSnapshotHandler, Reconciler, ScheduleRegistry,
};
use elasticsearch_operator::crd::Elasticsearch;
use elasticsearch_operator::watch::{Dispatcher, OperatorEvent, ResourceEvent};

/// An operator wired to in-memory fakes
pub struct Harness {
    pub cp: Arc<FakeControlPlane>,
    pub recorder: Arc<CapturingRecorder>,
    pub scheduler: Arc<ScheduleRegistry>,
    pub monitor: Arc<RecordingMonitor>,
    pub dispatcher: Dispatcher,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OperatorConfig) -> Self {
        let cp = Arc::new(FakeControlPlane::new());
        let recorder = Arc::new(CapturingRecorder::default());
        let scheduler = Arc::new(ScheduleRegistry::new());
        let monitor = Arc::new(RecordingMonitor::default());

        let control_plane: Arc<dyn ControlPlane> = cp.clone();
        let restore = JobRestoreRunner::new(
            control_plane.clone(),
            config.restore_image.clone(),
            config.poll_interval,
        );
        let ctx = Context {
            control_plane,
            recorder: recorder.clone(),
            scheduler: scheduler.clone(),
            restore: Arc::new(restore),
            monitor: monitor.clone(),
            snapshots: Arc::new(LoggingSnapshotHandler),
            config,
            health_state: None,
        };

        Self {
            cp,
            recorder,
            scheduler,
            monitor,
            dispatcher: Dispatcher::new(Reconciler::new(ctx)),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        self.dispatcher.reconciler()
    }

    /// Store `es` and deliver its Add event
    pub async fn add(&self, es: Elasticsearch) -> Elasticsearch {
        let stored = self.cp.insert_instance(es);
        self.dispatcher
            .dispatch(OperatorEvent::Instance(ResourceEvent::Added(Arc::new(
                stored.clone(),
            ))))
            .await;
        self.latest(&stored)
    }

    /// Deliver an Update event from `old` to `new`
    pub async fn update(&self, old: &Elasticsearch, new: &Elasticsearch) {
        self.dispatcher
            .dispatch(OperatorEvent::Instance(ResourceEvent::Updated {
                old: Arc::new(old.clone()),
                new: Arc::new(new.clone()),
            }))
            .await;
    }

    /// Remove the instance from the store and deliver its Delete event
    pub async fn delete(&self, es: &Elasticsearch) {
        let namespace = es.metadata.namespace.clone().unwrap_or_default();
        let name = es.metadata.name.clone().unwrap_or_default();
        let last = self.cp.remove_instance(&namespace, &name).unwrap_or_else(|| es.clone());
        self.dispatcher
            .dispatch(OperatorEvent::Instance(ResourceEvent::Deleted(Arc::new(last))))
            .await;
    }

    /// Remove a DormantDatabase and deliver its Delete event
    pub async fn delete_dormant(&self, name: &str) {
        let ddb = self.cp.remove_dormant(NAMESPACE, name).unwrap();
        self.dispatcher
            .dispatch(OperatorEvent::Dormant(ResourceEvent::Deleted(Arc::new(ddb))))
            .await;
    }

    /// Latest stored copy of `es`
    pub fn latest(&self, es: &Elasticsearch) -> Elasticsearch {
        let namespace = es.metadata.namespace.clone().unwrap_or_default();
        let name = es.metadata.name.clone().unwrap_or_default();
        self.cp.instance(&namespace, &name).unwrap()
    }
}
