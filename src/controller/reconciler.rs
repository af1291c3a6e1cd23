//! Reconciliation logic for Elasticsearch resources
//!
//! The reconciler turns routed watch events into the create, update and
//! pause paths of the database lifecycle. Every step is idempotent: objects
//! are looked up before they are created and every write starts from a
//! freshly read copy, so a replayed event converges to the same state.

use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::Context;
use crate::controller::collaborators::InstanceKey;
use crate::controller::dormant::{Admission, admit, dormant_from_instance};
use crate::controller::error::{Error, Result};
use crate::controller::events::{Severity, reasons};
use crate::controller::secrets::{
    collect_dormant_secrets, ensure_certificate_secret, ensure_database_secret,
};
use crate::controller::state_machine::LifecycleEvent;
use crate::controller::status::StatusManager;
use crate::controller::validation::{SpecChanges, validate_spec, validate_spec_change};
use crate::crd::{DormantDatabase, Elasticsearch, SnapshotSourceSpec};
use crate::resources::common::{KIND, instance_namespace, service_name, statefulset_name};
use crate::resources::service::{generate_governing_service, generate_instance_service};
use crate::resources::statefulset::{WorkloadSettings, generate_statefulset, is_statefulset_ready};

/// Drives one database kind through its lifecycle
pub struct Reconciler {
    kind: &'static str,
    ctx: Context,
}

impl Reconciler {
    pub fn new(ctx: Context) -> Self {
        Self { kind: KIND, ctx }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    async fn event(&self, es: &Elasticsearch, severity: Severity, reason: &str, message: &str) {
        let target: ObjectReference = es.object_ref(&());
        self.ctx
            .recorder
            .record(&target, severity, reason, message)
            .await;
    }

    async fn warning(&self, es: &Elasticsearch, reason: &str, message: &str) {
        self.event(es, Severity::Warning, reason, message).await;
    }

    async fn normal(&self, es: &Elasticsearch, reason: &str, message: &str) {
        self.event(es, Severity::Normal, reason, message).await;
    }

    /// Apply a lifecycle event, reporting a failed write instead of aborting
    ///
    /// Returns the persisted object, or `fallback` when the write failed.
    async fn advance(
        &self,
        status: &StatusManager<'_>,
        event: LifecycleEvent,
        fallback: &Elasticsearch,
    ) -> Elasticsearch {
        match status.apply(event).await {
            Ok(updated) => updated,
            Err(e) => {
                if e.is_write_conflict() {
                    warn!(error = %e, %event, "phase write lost to a newer instance version");
                } else {
                    warn!(error = %e, %event, "failed to persist phase");
                }
                self.warning(
                    fallback,
                    reasons::FAILED_TO_UPDATE,
                    &format!("Failed to update Elasticsearch phase. Reason: {e}"),
                )
                .await;
                fallback.clone()
            }
        }
    }

    /// Create path for a newly observed instance
    #[instrument(
        skip(self, observed),
        fields(name = %observed.name_any(), namespace = %instance_namespace(observed))
    )]
    pub async fn create(&self, observed: &Elasticsearch) -> Result<()> {
        let namespace = instance_namespace(observed);
        let name = observed.name_any();
        let status = StatusManager::new(&self.ctx, &namespace, &name);

        // The cached copy may be stale
        let latest = status.fetch().await?;
        let es = self.advance(&status, LifecycleEvent::Stamped, &latest).await;

        if let Err(e) = validate_spec(&es) {
            self.warning(&es, reasons::INVALID, &e.to_string()).await;
            return Err(e);
        }
        self.normal(&es, reasons::SUCCESSFUL_VALIDATE, "Successfully validated Elasticsearch")
            .await;

        self.gatekeep(&es).await?;

        self.normal(&es, reasons::CREATING, "Creating Kubernetes objects")
            .await;
        let es = match self.ensure_secrets(&es).await {
            Ok(es) => es,
            Err(e) => {
                self.warning(
                    &es,
                    reasons::FAILED_TO_CREATE,
                    &format!("Failed to create Secret. Reason: {e}"),
                )
                .await;
                return Err(e);
            }
        };

        if let Err(e) = self.ensure_workload(&es).await {
            self.warning(
                &es,
                reasons::FAILED_TO_CREATE,
                &format!("Failed to create Elasticsearch objects. Reason: {e}"),
            )
            .await;
            return Err(e);
        }

        if es.spec.replicas > 0
            && let Err(e) = self.wait_for_workload(&namespace, &name).await
        {
            self.warning(
                &es,
                reasons::FAILED_TO_START,
                &format!("Failed to start Elasticsearch. Reason: {e}"),
            )
            .await;
            return Err(e);
        }
        self.normal(&es, reasons::SUCCESSFUL_CREATE, "Successfully created Elasticsearch")
            .await;

        if let Some(source) = es.snapshot_source() {
            let initializing = status.fetch().await?;
            let initializing = self
                .advance(&status, LifecycleEvent::InitializationStarted, &initializing)
                .await;
            self.initialize(&initializing, source).await;
        }

        let running = status.fetch().await?;
        let es = self.advance(&status, LifecycleEvent::Started, &running).await;

        self.sync_backup_schedule(&es).await;
        if let Some(monitor) = &es.spec.monitor {
            match self.ctx.monitor.add(&es, monitor).await {
                Ok(()) => {
                    self.normal(
                        &es,
                        reasons::SUCCESSFUL_MONITOR_ADD,
                        "Successfully added monitoring system",
                    )
                    .await
                }
                Err(e) => {
                    self.warning(
                        &es,
                        reasons::FAILED_TO_ADD_MONITOR,
                        &format!("Failed to add monitoring system. Reason: {e}"),
                    )
                    .await
                }
            }
        }

        info!("Elasticsearch is running");
        Ok(())
    }

    /// Dormant check shared by the create and update paths
    async fn gatekeep(&self, es: &Elasticsearch) -> Result<()> {
        match admit(&self.ctx, es).await {
            Ok(Admission::Free) => Ok(()),
            Ok(Admission::Recoverable(ddb)) => {
                self.normal(
                    es,
                    reasons::DORMANT_DATABASE_FOUND,
                    &format!(
                        "DormantDatabase {}/{} holds recoverable data for this name",
                        instance_namespace(es),
                        ddb.name_any()
                    ),
                )
                .await;
                Ok(())
            }
            Err(e @ Error::DormantConflict { .. }) => {
                self.warning(es, reasons::FAILED_TO_CREATE, &e.to_string())
                    .await;
                Err(e)
            }
            Err(e) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_GET,
                    &format!("Failed to get DormantDatabase. Reason: {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn ensure_secrets(&self, es: &Elasticsearch) -> Result<Elasticsearch> {
        let es = ensure_certificate_secret(&self.ctx, es).await?;
        ensure_database_secret(&self.ctx, &es).await
    }

    /// Ensure the governing Service, the instance Service and the StatefulSet
    async fn ensure_workload(&self, es: &Elasticsearch) -> Result<()> {
        self.ensure_governing_service(es).await?;
        self.ensure_service(es).await?;
        self.ensure_statefulset(es).await
    }

    async fn ensure_governing_service(&self, es: &Elasticsearch) -> Result<()> {
        let namespace = instance_namespace(es);
        let governing = &self.ctx.config.governing_service;
        if self
            .ctx
            .control_plane
            .get_service(&namespace, governing)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let service = generate_governing_service(governing, &namespace);
        tolerate_existing(self.ctx.control_plane.create_service(&service).await)?;
        info!(service = %governing, %namespace, "created governing service");
        Ok(())
    }

    async fn ensure_service(&self, es: &Elasticsearch) -> Result<()> {
        let namespace = instance_namespace(es);
        let name = service_name(&es.name_any());
        if self
            .ctx
            .control_plane
            .get_service(&namespace, &name)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let service = generate_instance_service(es);
        tolerate_existing(self.ctx.control_plane.create_service(&service).await)?;
        info!(service = %name, %namespace, "created service");
        Ok(())
    }

    async fn ensure_statefulset(&self, es: &Elasticsearch) -> Result<()> {
        let namespace = instance_namespace(es);
        let name = statefulset_name(&es.name_any());
        if self
            .ctx
            .control_plane
            .get_statefulset(&namespace, &name)
            .await?
            .is_some()
        {
            return Ok(());
        }
        let settings = WorkloadSettings {
            image: &self.ctx.config.elasticsearch_image,
            governing_service: &self.ctx.config.governing_service,
        };
        let sts = generate_statefulset(es, &settings);
        tolerate_existing(self.ctx.control_plane.create_statefulset(&sts).await)?;
        info!(statefulset = %name, %namespace, "created statefulset");
        Ok(())
    }

    /// Block until the StatefulSet reports ready pods or the timeout elapses
    async fn wait_for_workload(&self, namespace: &str, name: &str) -> Result<()> {
        let timeout = self.ctx.config.statefulset_ready_timeout;
        let sts_name = statefulset_name(name);
        match tokio::time::timeout(timeout, self.poll_statefulset(namespace, &sts_name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "StatefulSet {}/{} not ready after {}s",
                namespace,
                sts_name,
                timeout.as_secs()
            ))),
        }
    }

    async fn poll_statefulset(&self, namespace: &str, name: &str) -> Result<()> {
        let interval: Duration = self.ctx.config.poll_interval;
        loop {
            let sts = self.ctx.control_plane.get_statefulset(namespace, name).await?;
            if sts.as_ref().is_some_and(is_statefulset_ready) {
                return Ok(());
            }
            debug!(statefulset = %name, "waiting for ready pods");
            tokio::time::sleep(interval).await;
        }
    }

    /// Restore the instance from a Snapshot; failures are reported, never returned
    async fn initialize(&self, es: &Elasticsearch, source: &SnapshotSourceSpec) {
        let namespace = source
            .namespace
            .clone()
            .unwrap_or_else(|| instance_namespace(es));
        self.normal(
            es,
            reasons::INITIALIZING,
            &format!("Initializing from Snapshot {}/{}", namespace, source.name),
        )
        .await;

        let snapshot = match self.ctx.control_plane.get_snapshot(&namespace, &source.name).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_INITIALIZE,
                    &format!("Snapshot {}/{} not found", namespace, source.name),
                )
                .await;
                return;
            }
            Err(e) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_GET,
                    &format!("Failed to get Snapshot. Reason: {e}"),
                )
                .await;
                return;
            }
        };

        let job = match self.ctx.restore.create_restore_job(es, &snapshot).await {
            Ok(job) => job,
            Err(e) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_INITIALIZE,
                    &format!("Failed to create restore Job. Reason: {e}"),
                )
                .await;
                return;
            }
        };

        let timeout = self.ctx.config.restore_job_timeout;
        match self.ctx.restore.await_success(&job, timeout).await {
            Ok(true) => {
                self.normal(
                    es,
                    reasons::SUCCESSFUL_INITIALIZE,
                    "Successfully completed initialization",
                )
                .await
            }
            Ok(false) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_INITIALIZE,
                    "Failed to complete initialization",
                )
                .await
            }
            Err(e) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_INITIALIZE,
                    &format!("Failed to complete initialization. Reason: {e}"),
                )
                .await
            }
        }
    }

    /// Register or stop the backup schedule; failures are reported
    async fn sync_backup_schedule(&self, es: &Elasticsearch) -> bool {
        let key = InstanceKey::of(es);
        let Some(schedule) = &es.spec.backup_schedule else {
            self.ctx.scheduler.stop_schedule(&key).await;
            return true;
        };

        match self
            .ctx
            .scheduler
            .schedule(&key, &schedule.cron_expression)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.warning(
                    es,
                    reasons::FAILED_TO_SCHEDULE,
                    &format!("Failed to schedule snapshot. Reason: {e}"),
                )
                .await;
                false
            }
        }
    }

    /// Update path for a spec change
    ///
    /// Validation and the dormant check abort the update. The remaining
    /// steps run independently; the first failure among them is returned
    /// after all of them ran.
    #[instrument(
        skip(self, old, new),
        fields(name = %new.name_any(), namespace = %instance_namespace(new))
    )]
    pub async fn update(&self, old: &Elasticsearch, new: &Elasticsearch) -> Result<()> {
        let changes = SpecChanges::between(&old.spec, &new.spec);
        if !changes.has_changes() {
            return Ok(());
        }
        info!(changed = ?changes.changed_fields(), "spec changed");

        if let Err(e) =
            validate_spec(new).and_then(|()| validate_spec_change(&old.spec, &new.spec))
        {
            self.warning(new, reasons::INVALID, &e.to_string()).await;
            return Err(e);
        }
        self.gatekeep(new).await?;

        let mut first_error: Option<Error> = None;

        let es = match self.ensure_secrets(new).await {
            Ok(es) => es,
            Err(e) => {
                self.warning(
                    new,
                    reasons::FAILED_TO_UPDATE,
                    &format!("Failed to ensure Secrets. Reason: {e}"),
                )
                .await;
                first_error.get_or_insert(e);
                new.clone()
            }
        };

        for step in [
            self.ensure_governing_service(&es).await,
            self.ensure_service(&es).await,
            self.ensure_statefulset(&es).await,
        ] {
            if let Err(e) = step {
                self.warning(
                    &es,
                    reasons::FAILED_TO_UPDATE,
                    &format!("Failed to ensure Elasticsearch objects. Reason: {e}"),
                )
                .await;
                first_error.get_or_insert(e);
            }
        }

        if let Some(replicas) = changes.replica_target()
            && let Err(e) = self.scale(&es, replicas).await
        {
            self.warning(
                &es,
                reasons::FAILED_TO_UPDATE,
                &format!("Failed to scale StatefulSet. Reason: {e}"),
            )
            .await;
            first_error.get_or_insert(e);
        }

        if changes.backup_schedule && !self.sync_backup_schedule(&es).await {
            first_error.get_or_insert(Error::SchedulerError(format!(
                "failed to sync backup schedule of {}",
                InstanceKey::of(&es)
            )));
        }

        if changes.monitor
            && let Err(e) = self.update_monitor(old, &es).await
        {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn scale(&self, es: &Elasticsearch, replicas: i32) -> Result<()> {
        let namespace = instance_namespace(es);
        let name = statefulset_name(&es.name_any());
        let current = self
            .ctx
            .control_plane
            .get_statefulset(&namespace, &name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("StatefulSet {}/{}", namespace, name)))?;
        if current.spec.as_ref().and_then(|s| s.replicas) == Some(replicas) {
            return Ok(());
        }
        self.ctx
            .control_plane
            .patch_statefulset_replicas(&namespace, &name, replicas)
            .await?;
        info!(statefulset = %name, replicas, "scaled statefulset");
        Ok(())
    }

    /// Attach, move or detach monitoring after a monitor spec change
    async fn update_monitor(&self, old: &Elasticsearch, new: &Elasticsearch) -> Result<()> {
        let monitor = &self.ctx.monitor;
        let (result, ok, failed, verb) = match (&old.spec.monitor, &new.spec.monitor) {
            (None, Some(spec)) => (
                monitor.add(new, spec).await,
                reasons::SUCCESSFUL_MONITOR_ADD,
                reasons::FAILED_TO_ADD_MONITOR,
                "add",
            ),
            (Some(spec), None) => (
                monitor.delete(new, spec).await,
                reasons::SUCCESSFUL_MONITOR_DELETE,
                reasons::FAILED_TO_DELETE_MONITOR,
                "delete",
            ),
            (Some(previous), Some(spec)) => (
                monitor.update(new, previous, spec).await,
                reasons::SUCCESSFUL_MONITOR_UPDATE,
                reasons::FAILED_TO_UPDATE_MONITOR,
                "update",
            ),
            (None, None) => return Ok(()),
        };

        match result {
            Ok(()) => {
                self.normal(new, ok, &format!("Successfully {verb}d monitoring system"))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.warning(
                    new,
                    failed,
                    &format!("Failed to {verb} monitoring system. Reason: {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Pause path for a deleted instance
    #[instrument(
        skip(self, es),
        fields(name = %es.name_any(), namespace = %instance_namespace(es))
    )]
    pub async fn pause(&self, es: &Elasticsearch) -> Result<()> {
        if es.spec.do_not_pause {
            self.warning(
                es,
                reasons::FAILED_TO_PAUSE,
                &format!(
                    "Elasticsearch {}/{} is locked, recreating it",
                    instance_namespace(es),
                    es.name_any()
                ),
            )
            .await;
            return self.recreate(es).await;
        }

        self.normal(es, reasons::PAUSING, "Pausing Elasticsearch").await;

        let dormant = dormant_from_instance(es);
        let preserved = match self.ctx.control_plane.create_dormant(&dormant).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => self.refresh_dormant(dormant).await,
            Err(e) => Err(e),
        };
        if let Err(e) = preserved {
            self.warning(
                es,
                reasons::FAILED_TO_PAUSE,
                &format!("Failed to create DormantDatabase. Reason: {e}"),
            )
            .await;
            return Err(e);
        }

        self.ctx.scheduler.stop_schedule(&InstanceKey::of(es)).await;

        if let Some(monitor) = &es.spec.monitor {
            match self.ctx.monitor.delete(es, monitor).await {
                Ok(()) => {
                    self.normal(
                        es,
                        reasons::SUCCESSFUL_MONITOR_DELETE,
                        "Successfully deleted monitoring system",
                    )
                    .await
                }
                Err(e) => {
                    self.warning(
                        es,
                        reasons::FAILED_TO_DELETE_MONITOR,
                        &format!("Failed to delete monitoring system. Reason: {e}"),
                    )
                    .await
                }
            }
        }

        info!("Elasticsearch paused");
        Ok(())
    }

    /// Point an existing DormantDatabase at the instance being paused
    ///
    /// A replayed delete finds its own record and leaves it alone. A record
    /// kept from an earlier instance of the same name is replaced, guarded by
    /// the resourceVersion just read.
    async fn refresh_dormant(&self, mut dormant: DormantDatabase) -> Result<()> {
        let namespace = dormant.namespace().unwrap_or_default();
        let name = dormant.name_any();

        let Some(existing) = self.ctx.control_plane.get_dormant(&namespace, &name).await? else {
            // Removed between the create and the read
            self.ctx.control_plane.create_dormant(&dormant).await?;
            return Ok(());
        };

        match existing.database_kind() {
            Some(kind) if kind == KIND => {}
            other => {
                return Err(Error::DormantConflict {
                    namespace,
                    name,
                    kind: other.unwrap_or("<unknown>").to_string(),
                });
            }
        }

        if existing.spec.origin == dormant.spec.origin {
            debug!("dormant database already holds this instance");
            return Ok(());
        }

        dormant.metadata.resource_version = existing.metadata.resource_version;
        self.ctx.control_plane.replace_dormant(&dormant).await?;
        info!("replaced dormant database of an earlier instance");
        Ok(())
    }

    /// Recreate a locked instance from its last observed spec
    async fn recreate(&self, es: &Elasticsearch) -> Result<()> {
        let copy = recreation_copy(es);
        match self.ctx.control_plane.create_instance(&copy).await {
            Ok(_) => {
                info!("recreated locked Elasticsearch");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => {
                error!(error = %e, "failed to recreate locked Elasticsearch");
                self.warning(
                    es,
                    reasons::FAILED_TO_CREATE,
                    &format!("Failed to recreate Elasticsearch. Reason: {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Release the Secrets of a deleted DormantDatabase
    #[instrument(skip(self, ddb), fields(name = %ddb.name_any()))]
    pub async fn on_dormant_deleted(&self, ddb: &DormantDatabase) -> Result<()> {
        let deleted = collect_dormant_secrets(&self.ctx, ddb).await?;
        if !deleted.is_empty() {
            info!(secrets = ?deleted, "released secrets of dormant database");
        }
        Ok(())
    }
}

/// Treat a lost create race as success
fn tolerate_existing<T>(result: Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

/// A creatable copy of a deleted instance: same identity, labels and spec
pub fn recreation_copy(es: &Elasticsearch) -> Elasticsearch {
    let mut copy = Elasticsearch::new(&es.name_any(), es.spec.clone());
    copy.metadata.namespace = Some(instance_namespace(es));
    copy.metadata.labels = es.metadata.labels.clone();
    copy.metadata.annotations = es.metadata.annotations.clone();
    copy
}
