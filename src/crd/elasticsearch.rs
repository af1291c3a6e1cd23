use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Elasticsearch is the Schema for the elasticsearches API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "searchdb.example.com",
    version = "v1alpha1",
    kind = "Elasticsearch",
    plural = "elasticsearches",
    shortname = "es",
    namespaced,
    derive = "PartialEq",
    status = "ElasticsearchStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Elasticsearch version tag for the database image
    #[serde(default = "default_version")]
    pub version: String,

    /// Number of nodes in the workload set
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// When set, deleting the resource recreates it instead of pausing it
    #[serde(default)]
    pub do_not_pause: bool,

    /// Scheduled snapshots of this database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_schedule: Option<BackupScheduleSpec>,

    /// One-shot initialization performed after the first start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<InitSpec>,

    /// Monitoring integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSpec>,

    /// Name of the Secret holding the keystores (filled in by the operator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_secret: Option<String>,

    /// Name of the Secret holding credentials and security policies (filled in by the operator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret: Option<String>,

    /// Enable TLS for client (HTTP) traffic
    #[serde(default)]
    pub enable_ssl: bool,

    /// Persistent storage for node data. Uses an emptyDir when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Node selector for database pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Resource requirements for database pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

fn default_version() -> String {
    "6.8.23".to_string()
}

fn default_replicas() -> i32 {
    1
}

impl Default for ElasticsearchSpec {
    fn default() -> Self {
        Self {
            version: default_version(),
            replicas: default_replicas(),
            do_not_pause: false,
            backup_schedule: None,
            init: None,
            monitor: None,
            certificate_secret: None,
            database_secret: None,
            enable_ssl: false,
            storage: None,
            node_selector: BTreeMap::new(),
            resources: None,
        }
    }
}

/// Backup schedule configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    /// Cron expression (e.g., "0 */6 * * *")
    pub cron_expression: String,

    /// Secret with credentials for the snapshot storage backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_secret_name: Option<String>,
}

/// Initialization sources
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    /// Restore data from an existing Snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_source: Option<SnapshotSourceSpec>,
}

/// Reference to a Snapshot used for initialization
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSourceSpec {
    /// Namespace of the Snapshot (defaults to the database namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the Snapshot
    pub name: String,
}

/// Monitoring configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSpec {
    /// Monitoring agent (e.g., "prometheus.io/builtin", "coreos-prometheus-operator")
    pub agent: String,

    /// Prometheus specific settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusSpec>,
}

/// Prometheus scrape settings
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Namespace of the ServiceMonitor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels for the ServiceMonitor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Scrape interval (e.g., "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Storage configuration for node data volumes
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "10Gi")
    pub size: String,
}

/// Resource requirements for database pods
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// Resource quantities for CPU and memory
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct ResourceList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Status of the Elasticsearch resource
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    /// RFC 3339 timestamp set when the operator first picks the resource up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    /// Lifecycle phase; absent until the first reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,

    /// Human-readable reason for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Database lifecycle phase
///
/// Ordering follows the lifecycle: a phase never moves back to an earlier one.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum DatabasePhase {
    /// Kubernetes objects are being created
    Creating,
    /// Data is being restored from a snapshot
    Initializing,
    /// The database is up
    Running,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabasePhase::Creating => write!(f, "Creating"),
            DatabasePhase::Initializing => write!(f, "Initializing"),
            DatabasePhase::Running => write!(f, "Running"),
        }
    }
}

impl Elasticsearch {
    /// Whether the operator already picked this object up
    pub fn is_stamped(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.creation_time.is_some())
    }

    /// Current phase, `None` when not yet reconciled
    pub fn phase(&self) -> Option<DatabasePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Snapshot source requested for initialization, if any
    pub fn snapshot_source(&self) -> Option<&SnapshotSourceSpec> {
        self.spec
            .init
            .as_ref()
            .and_then(|init| init.snapshot_source.as_ref())
    }
}
