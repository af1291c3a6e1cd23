//! Kubernetes Event recording
//!
//! Events are fire-and-forget: a failure to publish is logged and never
//! changes the outcome of reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::resources::common::FIELD_MANAGER;

/// Event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

/// Appends human-readable records to a target object
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        target: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: &str,
    );
}

/// [`EventRecorder`] publishing `events.k8s.io` Events
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        target: &ObjectReference,
        severity: Severity,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: reason.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, target).await {
            warn!(
                reason,
                object = ?target.name,
                error = %e,
                "failed to publish event"
            );
        }
    }
}

/// Event reasons, as shown in the REASON column of `kubectl get events`
pub mod reasons {
    pub const SUCCESSFUL_VALIDATE: &str = "SuccessfulValidate";
    pub const INVALID: &str = "Invalid";
    pub const CREATING: &str = "Creating";
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const FAILED_TO_CREATE: &str = "FailedToCreate";
    pub const FAILED_TO_START: &str = "FailedToStart";
    pub const FAILED_TO_UPDATE: &str = "FailedToUpdate";
    pub const FAILED_TO_GET: &str = "FailedToGet";
    pub const INITIALIZING: &str = "Initializing";
    pub const SUCCESSFUL_INITIALIZE: &str = "SuccessfulInitialize";
    pub const FAILED_TO_INITIALIZE: &str = "FailedToInitialize";
    pub const PAUSING: &str = "Pausing";
    pub const FAILED_TO_PAUSE: &str = "FailedToPause";
    pub const FAILED_TO_SCHEDULE: &str = "FailedToSchedule";
    pub const SUCCESSFUL_MONITOR_ADD: &str = "SuccessfulMonitorAdd";
    pub const FAILED_TO_ADD_MONITOR: &str = "FailedToAddMonitor";
    pub const SUCCESSFUL_MONITOR_UPDATE: &str = "SuccessfulMonitorUpdate";
    pub const FAILED_TO_UPDATE_MONITOR: &str = "FailedToUpdateMonitor";
    pub const SUCCESSFUL_MONITOR_DELETE: &str = "SuccessfulMonitorDelete";
    pub const FAILED_TO_DELETE_MONITOR: &str = "FailedToDeleteMonitor";
    pub const DORMANT_DATABASE_FOUND: &str = "DormantDatabaseFound";
}
