//! External collaborators of the reconciler
//!
//! Backup scheduling, restore execution, monitoring and snapshot handling are
//! owned by other subsystems. The reconciler drives them through the traits
//! below; the default implementations keep the operator self-contained.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::controller::client::ControlPlane;
use crate::controller::error::{Error, Result};
use crate::crd::{Elasticsearch, MonitorSpec, Snapshot};
use crate::resources::common::instance_namespace;
use crate::resources::restore::{generate_restore_job, job_outcome};
use crate::watch::WatchAction;

/// Identity of an instance, used to key schedules
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(es: &Elasticsearch) -> Self {
        Self::new(instance_namespace(es), es.name_any())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Periodic backup scheduling, keyed by instance identity
///
/// Both operations are idempotent: scheduling the same expression twice is a
/// no-op, stopping an unknown identity is a no-op.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupScheduler: Send + Sync {
    async fn schedule(&self, key: &InstanceKey, cron_expression: &str) -> Result<()>;

    async fn stop_schedule(&self, key: &InstanceKey);
}

/// Restore of a Snapshot into a new instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestoreRunner: Send + Sync {
    async fn create_restore_job(&self, es: &Elasticsearch, snapshot: &Snapshot) -> Result<Job>;

    /// Wait for the job to finish; `Ok(false)` when it failed
    async fn await_success(&self, job: &Job, timeout: Duration) -> Result<bool>;
}

/// Monitoring integration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitorAgent: Send + Sync {
    async fn add(&self, es: &Elasticsearch, spec: &MonitorSpec) -> Result<()>;

    async fn update(&self, es: &Elasticsearch, old: &MonitorSpec, new: &MonitorSpec) -> Result<()>;

    async fn delete(&self, es: &Elasticsearch, spec: &MonitorSpec) -> Result<()>;
}

/// Receiver of Snapshot stream events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotHandler: Send + Sync {
    async fn handle(&self, action: WatchAction, snapshot: &Snapshot) -> Result<()>;
}

/// Schedule registry
///
/// Tracks the active cron expression per instance. The timing engine that
/// fires backups lives in the backup subsystem and reads from here.
#[derive(Default)]
pub struct ScheduleRegistry {
    schedules: Mutex<HashMap<InstanceKey, String>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current expression for an instance
    pub async fn get(&self, key: &InstanceKey) -> Option<String> {
        self.schedules.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.schedules.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.schedules.lock().await.is_empty()
    }
}

#[async_trait]
impl BackupScheduler for ScheduleRegistry {
    async fn schedule(&self, key: &InstanceKey, cron_expression: &str) -> Result<()> {
        if cron_expression.split_whitespace().count() < 5 && !cron_expression.starts_with('@') {
            return Err(Error::SchedulerError(format!(
                "invalid cron expression {:?}",
                cron_expression
            )));
        }

        let mut schedules = self.schedules.lock().await;
        if schedules.get(key).map(String::as_str) == Some(cron_expression) {
            debug!(instance = %key, "backup schedule unchanged");
            return Ok(());
        }
        schedules.insert(key.clone(), cron_expression.to_string());
        info!(instance = %key, cron = cron_expression, "backup schedule registered");
        Ok(())
    }

    async fn stop_schedule(&self, key: &InstanceKey) {
        if self.schedules.lock().await.remove(key).is_some() {
            info!(instance = %key, "backup schedule stopped");
        }
    }
}

/// Restore runner creating a Job per restore and polling it
pub struct JobRestoreRunner {
    control_plane: Arc<dyn ControlPlane>,
    image: String,
    poll_interval: Duration,
}

impl JobRestoreRunner {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        image: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            control_plane,
            image,
            poll_interval,
        }
    }
}

#[async_trait]
impl RestoreRunner for JobRestoreRunner {
    async fn create_restore_job(&self, es: &Elasticsearch, snapshot: &Snapshot) -> Result<Job> {
        let job = generate_restore_job(es, snapshot, &self.image);
        let namespace = instance_namespace(es);
        let name = job.name_any();

        // Reuse a job left behind by an earlier attempt
        if let Some(existing) = self.control_plane.get_job(&namespace, &name).await? {
            return Ok(existing);
        }
        info!(job = %name, namespace = %namespace, "creating restore job");
        self.control_plane.create_job(&job).await
    }

    async fn await_success(&self, job: &Job, timeout: Duration) -> Result<bool> {
        let namespace = job
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let name = job.name_any();

        tokio::time::timeout(timeout, self.poll_job(&namespace, &name))
            .await
            .map_err(|_| {
                Error::Timeout(format!("restore job {}/{} did not finish", namespace, name))
            })?
    }
}

impl JobRestoreRunner {
    async fn poll_job(&self, namespace: &str, name: &str) -> Result<bool> {
        loop {
            let job = self
                .control_plane
                .get_job(namespace, name)
                .await?
                .ok_or_else(|| {
                    Error::RestoreError(format!(
                        "job {}/{} disappeared while running",
                        namespace, name
                    ))
                })?;
            if let Some(succeeded) = job_outcome(job.status.as_ref()) {
                return Ok(succeeded);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Monitor agent that only logs
///
/// Stands in for the monitoring subsystem when none is wired up.
pub struct LoggingMonitorAgent;

fn require_agent(spec: &MonitorSpec) -> Result<()> {
    if spec.agent.trim().is_empty() {
        return Err(Error::MonitorError("monitor agent is not set".to_string()));
    }
    Ok(())
}

#[async_trait]
impl MonitorAgent for LoggingMonitorAgent {
    async fn add(&self, es: &Elasticsearch, spec: &MonitorSpec) -> Result<()> {
        require_agent(spec)?;
        info!(name = %es.name_any(), agent = %spec.agent, "monitor added");
        Ok(())
    }

    async fn update(
        &self,
        es: &Elasticsearch,
        _old: &MonitorSpec,
        new: &MonitorSpec,
    ) -> Result<()> {
        require_agent(new)?;
        info!(name = %es.name_any(), agent = %new.agent, "monitor updated");
        Ok(())
    }

    async fn delete(&self, es: &Elasticsearch, spec: &MonitorSpec) -> Result<()> {
        info!(name = %es.name_any(), agent = %spec.agent, "monitor deleted");
        Ok(())
    }
}

/// Snapshot handler that only logs
pub struct LoggingSnapshotHandler;

#[async_trait]
impl SnapshotHandler for LoggingSnapshotHandler {
    async fn handle(&self, action: WatchAction, snapshot: &Snapshot) -> Result<()> {
        info!(
            name = %snapshot.name_any(),
            namespace = ?snapshot.namespace(),
            database = %snapshot.spec.database_name,
            %action,
            "snapshot event"
        );
        Ok(())
    }
}
