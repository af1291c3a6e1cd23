//! Validation logic for Elasticsearch specs and spec changes
//!
//! This module provides:
//! - structural checks run before create and update
//! - immutable field checks between two observed specs
//! - [`SpecChanges`], the field-level change-set that drives the update path

use crate::controller::error::{Error, Result};
use crate::crd::{Elasticsearch, ElasticsearchSpec};

/// Validate the instance spec
pub fn validate_spec(es: &Elasticsearch) -> Result<()> {
    validate_replicas(&es.spec)?;
    validate_storage(&es.spec)?;
    validate_backup_schedule(&es.spec)?;
    validate_init(&es.spec)?;
    validate_monitor(&es.spec)?;
    Ok(())
}

fn validate_replicas(spec: &ElasticsearchSpec) -> Result<()> {
    if spec.replicas < 0 {
        return Err(Error::ValidationError(format!(
            "replica count {} must not be negative",
            spec.replicas
        )));
    }
    Ok(())
}

/// Validate storage size format (e.g., "10Gi", "500Mi")
fn validate_storage(spec: &ElasticsearchSpec) -> Result<()> {
    let Some(storage) = &spec.storage else {
        return Ok(());
    };
    let size = &storage.size;

    if !size.ends_with("Gi") && !size.ends_with("Mi") && !size.ends_with("Ti") {
        return Err(Error::ValidationError(format!(
            "storage size must end with Gi, Mi, or Ti: {}",
            size
        )));
    }

    let num_str = size.trim_end_matches(char::is_alphabetic);
    let _num: u64 = num_str
        .parse()
        .map_err(|_| Error::ValidationError(format!("invalid storage size number: {}", size)))?;

    Ok(())
}

/// Accept five or six field cron expressions and `@` descriptors
fn validate_backup_schedule(spec: &ElasticsearchSpec) -> Result<()> {
    let Some(schedule) = &spec.backup_schedule else {
        return Ok(());
    };
    let expr = schedule.cron_expression.trim();

    if expr.starts_with('@') {
        return Ok(());
    }
    let fields = expr.split_whitespace().count();
    if !(5..=6).contains(&fields) {
        return Err(Error::ValidationError(format!(
            "backup schedule {:?} must have 5 or 6 fields, found {}",
            expr, fields
        )));
    }
    Ok(())
}

fn validate_init(spec: &ElasticsearchSpec) -> Result<()> {
    if let Some(source) = spec.init.as_ref().and_then(|i| i.snapshot_source.as_ref())
        && source.name.trim().is_empty()
    {
        return Err(Error::ValidationError(
            "init.snapshotSource.name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_monitor(spec: &ElasticsearchSpec) -> Result<()> {
    if let Some(monitor) = &spec.monitor
        && monitor.agent.trim().is_empty()
    {
        return Err(Error::ValidationError(
            "monitor.agent must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Reject changes to fields that cannot change after creation
pub fn validate_spec_change(old: &ElasticsearchSpec, new: &ElasticsearchSpec) -> Result<()> {
    let old_class = old.storage.as_ref().and_then(|s| s.storage_class.as_ref());
    let new_class = new.storage.as_ref().and_then(|s| s.storage_class.as_ref());
    if old.storage.is_some() && old_class != new_class {
        return Err(Error::ValidationError(
            "storage class cannot be changed after creation".to_string(),
        ));
    }
    Ok(())
}

/// Old and new replica count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaChange {
    pub old: i32,
    pub new: i32,
}

/// Which spec fields differ between two observations of an instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecChanges {
    pub replicas: Option<ReplicaChange>,
    pub version: bool,
    pub do_not_pause: bool,
    pub backup_schedule: bool,
    pub init: bool,
    pub monitor: bool,
    pub certificate_secret: bool,
    pub database_secret: bool,
    pub enable_ssl: bool,
    pub storage: bool,
    pub node_selector: bool,
    pub resources: bool,
}

impl SpecChanges {
    /// Compare two specs field by field
    pub fn between(old: &ElasticsearchSpec, new: &ElasticsearchSpec) -> Self {
        Self {
            replicas: (old.replicas != new.replicas).then_some(ReplicaChange {
                old: old.replicas,
                new: new.replicas,
            }),
            version: old.version != new.version,
            do_not_pause: old.do_not_pause != new.do_not_pause,
            backup_schedule: old.backup_schedule != new.backup_schedule,
            init: old.init != new.init,
            monitor: old.monitor != new.monitor,
            certificate_secret: old.certificate_secret != new.certificate_secret,
            database_secret: old.database_secret != new.database_secret,
            enable_ssl: old.enable_ssl != new.enable_ssl,
            storage: old.storage != new.storage,
            node_selector: old.node_selector != new.node_selector,
            resources: old.resources != new.resources,
        }
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        *self != Self::default()
    }

    /// New replica count to apply, if it changed and is not negative
    pub fn replica_target(&self) -> Option<i32> {
        self.replicas.map(|r| r.new).filter(|r| *r >= 0)
    }

    /// Names of the changed fields, for logging
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            (self.replicas.is_some(), "replicas"),
            (self.version, "version"),
            (self.do_not_pause, "doNotPause"),
            (self.backup_schedule, "backupSchedule"),
            (self.init, "init"),
            (self.monitor, "monitor"),
            (self.certificate_secret, "certificateSecret"),
            (self.database_secret, "databaseSecret"),
            (self.enable_ssl, "enableSsl"),
            (self.storage, "storage"),
            (self.node_selector, "nodeSelector"),
            (self.resources, "resources"),
        ]
        .into_iter()
        .filter_map(|(changed, name)| changed.then_some(name))
        .collect()
    }
}
