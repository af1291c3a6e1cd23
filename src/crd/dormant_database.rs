//! DormantDatabase CRD definition
//!
//! A DormantDatabase preserves the spec of a paused database after its
//! resource was deleted. It is shared by every database operator, so the
//! kind of the original resource is carried as a label.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crd::ElasticsearchSpec;
use crate::resources::common::LABEL_DATABASE_KIND;

/// DormantDatabase is the Schema for the dormantdatabases API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "searchdb.example.com",
    version = "v1alpha1",
    kind = "DormantDatabase",
    plural = "dormantdatabases",
    shortname = "drmn",
    namespaced,
    derive = "PartialEq",
    status = "DormantDatabaseStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseSpec {
    /// The paused database as it was last observed
    pub origin: Origin,

    /// Request to pause the database workload
    #[serde(default)]
    pub pause: bool,

    /// Request to delete the database data permanently
    #[serde(default)]
    pub wipe_out: bool,

    /// Request to recreate the original database
    #[serde(default)]
    pub resume: bool,
}

/// Captured identity and spec of the original database
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub metadata: OriginMeta,
    pub spec: OriginSpec,
}

/// Metadata of the original database
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginMeta {
    pub name: String,

    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Spec of the original database, one field per database kind
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<ElasticsearchSpec>,
}

/// Status of the DormantDatabase
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DormantDatabase {
    /// Kind tag of the database this record was created from
    pub fn database_kind(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_DATABASE_KIND))
            .map(String::as_str)
    }

    /// Secret names referenced by the preserved Elasticsearch spec
    pub fn referenced_secrets(&self) -> Vec<&str> {
        self.spec
            .origin
            .spec
            .elasticsearch
            .as_ref()
            .map(|es| {
                [es.certificate_secret.as_deref(), es.database_secret.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect()
            })
            .unwrap_or_default()
    }
}
