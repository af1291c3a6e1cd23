pub mod client;
pub mod collaborators;
pub mod context;
pub mod dormant;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod secrets;
pub mod state_machine;
pub mod status;
#[cfg(test)]
pub(crate) mod test_support;
pub mod validation;

pub use client::{ControlPlane, KubeControlPlane};
pub use collaborators::{
    BackupScheduler, InstanceKey, JobRestoreRunner, LoggingMonitorAgent, LoggingSnapshotHandler,
    MonitorAgent, RestoreRunner, ScheduleRegistry, SnapshotHandler,
};
pub use context::Context;
pub use dormant::{Admission, admit, dormant_from_instance};
pub use error::{Error, Result};
pub use events::{EventRecorder, KubeEventRecorder, Severity, reasons};
pub use reconciler::{Reconciler, recreation_copy};
pub use secrets::{
    SecretFamily, collect_dormant_secrets, ensure_certificate_secret, ensure_database_secret,
};
pub use state_machine::{LifecycleEvent, LifecycleState, LifecycleStateMachine};
pub use status::StatusManager;
pub use validation::{ReplicaChange, SpecChanges, validate_spec, validate_spec_change};
