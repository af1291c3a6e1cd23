//! Test fixtures and builders for Elasticsearch, Snapshot and DormantDatabase resources
//!
//! ```rust,ignore
//! let es = ElasticsearchBuilder::new("es1").replicas(3).backup("0 */6 * * *").build();
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use kube::core::ObjectMeta;

use elasticsearch_operator::OperatorConfig;
use elasticsearch_operator::controller::dormant_from_instance;
use elasticsearch_operator::crd::{
    BackupScheduleSpec, DormantDatabase, Elasticsearch, ElasticsearchSpec, InitSpec, MonitorSpec,
    Snapshot, SnapshotSourceSpec, SnapshotSpec, StorageSpec,
};
use elasticsearch_operator::resources::common::LABEL_DATABASE_KIND;

pub const NAMESPACE: &str = "default";

/// Operator configuration with waits short enough for paused-time tests
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        statefulset_ready_timeout: Duration::from_secs(30),
        restore_job_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_secs(1),
        ..OperatorConfig::default()
    }
}

/// Builder for Elasticsearch instances in [`NAMESPACE`]
pub struct ElasticsearchBuilder {
    name: String,
    namespace: String,
    spec: ElasticsearchSpec,
}

impl ElasticsearchBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: NAMESPACE.to_string(),
            spec: ElasticsearchSpec::default(),
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.spec.replicas = replicas;
        self
    }

    pub fn do_not_pause(mut self) -> Self {
        self.spec.do_not_pause = true;
        self
    }

    pub fn backup(mut self, cron: &str) -> Self {
        self.spec.backup_schedule = Some(BackupScheduleSpec {
            cron_expression: cron.to_string(),
            storage_secret_name: None,
        });
        self
    }

    pub fn snapshot_source(mut self, snapshot: &str) -> Self {
        self.spec.init = Some(InitSpec {
            snapshot_source: Some(SnapshotSourceSpec {
                namespace: None,
                name: snapshot.to_string(),
            }),
        });
        self
    }

    pub fn monitor(mut self, agent: &str) -> Self {
        self.spec.monitor = Some(MonitorSpec {
            agent: agent.to_string(),
            prometheus: None,
        });
        self
    }

    pub fn ssl(mut self) -> Self {
        self.spec.enable_ssl = true;
        self
    }

    pub fn storage(mut self, size: &str) -> Self {
        self.spec.storage = Some(StorageSpec {
            storage_class: Some("standard".to_string()),
            size: size.to_string(),
        });
        self
    }

    pub fn secrets(mut self, certificate: &str, database: &str) -> Self {
        self.spec.certificate_secret = Some(certificate.to_string());
        self.spec.database_secret = Some(database.to_string());
        self
    }

    pub fn build(self) -> Elasticsearch {
        let mut es = Elasticsearch::new(&self.name, self.spec);
        es.metadata.namespace = Some(self.namespace);
        es
    }
}

/// Instance with default settings
pub fn elasticsearch(name: &str) -> Elasticsearch {
    ElasticsearchBuilder::new(name).build()
}

pub fn snapshot(name: &str, database: &str) -> Snapshot {
    let mut snapshot = Snapshot::new(
        name,
        SnapshotSpec {
            database_name: database.to_string(),
            storage_secret_name: Some("snapshot-storage".to_string()),
            bucket: Some("backups".to_string()),
        },
    );
    snapshot.metadata.namespace = Some(NAMESPACE.to_string());
    snapshot
}

/// DormantDatabase for `es`, as the pause path writes it
pub fn dormant(es: &Elasticsearch) -> DormantDatabase {
    dormant_from_instance(es)
}

/// DormantDatabase named `name` left behind by a database of another kind
pub fn foreign_dormant(name: &str, kind: &str) -> DormantDatabase {
    let mut ddb = dormant_from_instance(&elasticsearch(name));
    ddb.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_DATABASE_KIND.to_string(),
            kind.to_string(),
        )])),
        ..Default::default()
    };
    ddb.spec.origin.spec.elasticsearch = None;
    ddb
}
