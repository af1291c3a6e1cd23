//! Common utilities for Kubernetes resource generation
//!
//! Labels and deterministic names shared by every generator, so that the
//! reconciler, the secret manager and the watchers agree on how derived
//! objects are found.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::Elasticsearch;

/// Kind tag written on every derived object and on DormantDatabases
pub const KIND: &str = "Elasticsearch";

/// Label carrying the database kind
pub const LABEL_DATABASE_KIND: &str = "searchdb.example.com/database-kind";

/// Label carrying the database (instance) name
pub const LABEL_DATABASE_NAME: &str = "searchdb.example.com/database-name";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "elasticsearch-operator";

/// Name of the Secret holding keystores for an instance
pub fn cert_secret_name(instance: &str) -> String {
    format!("{}-cert", instance)
}

/// Name of the Secret holding credentials and security policies for an instance
pub fn auth_secret_name(instance: &str) -> String {
    format!("{}-auth", instance)
}

/// Name of the StatefulSet for an instance
pub fn statefulset_name(instance: &str) -> String {
    instance.to_string()
}

/// Name of the per-instance Service
pub fn service_name(instance: &str) -> String {
    instance.to_string()
}

/// Identity labels `{kind, name}` used for selection and ownership checks
pub fn database_labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DATABASE_KIND.to_string(), KIND.to_string()),
        (LABEL_DATABASE_NAME.to_string(), instance.to_string()),
    ])
}

/// Labels for all resources belonging to an Elasticsearch instance
pub fn standard_labels(instance: &str) -> BTreeMap<String, String> {
    let mut labels = database_labels(instance);
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "elasticsearch".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        instance.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// Label selector matching every object of this database kind
pub fn kind_selector() -> String {
    format!("{}={}", LABEL_DATABASE_KIND, KIND)
}

/// Whether the given labels mark an object as owned by `instance`
pub fn labels_match_instance(labels: Option<&BTreeMap<String, String>>, instance: &str) -> bool {
    labels.is_some_and(|l| {
        l.get(LABEL_DATABASE_KIND).map(String::as_str) == Some(KIND)
            && l.get(LABEL_DATABASE_NAME).map(String::as_str) == Some(instance)
    })
}

/// Namespace of an instance, defaulting to "default" for objects read off a cluster-wide watch
pub fn instance_namespace(es: &Elasticsearch) -> String {
    es.namespace().unwrap_or_else(|| "default".to_string())
}
