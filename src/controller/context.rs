use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::client::{ControlPlane, KubeControlPlane};
use crate::controller::collaborators::{
    BackupScheduler, JobRestoreRunner, LoggingMonitorAgent, LoggingSnapshotHandler, MonitorAgent,
    RestoreRunner, ScheduleRegistry, SnapshotHandler,
};
use crate::controller::events::{EventRecorder, KubeEventRecorder};
use crate::health::HealthState;

/// Shared context for the reconciler and the watch loops
///
/// Every collaborator is injected, so a context can be assembled from fakes
/// in tests and from the Kubernetes-backed implementations in production.
#[derive(Clone)]
pub struct Context {
    pub control_plane: Arc<dyn ControlPlane>,
    pub recorder: Arc<dyn EventRecorder>,
    pub scheduler: Arc<dyn BackupScheduler>,
    pub restore: Arc<dyn RestoreRunner>,
    pub monitor: Arc<dyn MonitorAgent>,
    pub snapshots: Arc<dyn SnapshotHandler>,
    pub config: OperatorConfig,
    /// Health state for recording metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Context backed by the Kubernetes API with the default collaborators
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let control_plane: Arc<dyn ControlPlane> = Arc::new(KubeControlPlane::new(client.clone()));
        let restore = JobRestoreRunner::new(
            control_plane.clone(),
            config.restore_image.clone(),
            config.poll_interval,
        );

        Self {
            recorder: Arc::new(KubeEventRecorder::new(client)),
            scheduler: Arc::new(ScheduleRegistry::new()),
            restore: Arc::new(restore),
            monitor: Arc::new(LoggingMonitorAgent),
            snapshots: Arc::new(LoggingSnapshotHandler),
            control_plane,
            config,
            health_state,
        }
    }
}
