//! Control-plane client abstraction
//!
//! The reconciler only talks to the cluster through [`ControlPlane`], so that
//! tests can swap in an in-memory implementation while production uses
//! [`KubeControlPlane`] on top of `kube::Api`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{DormantDatabase, Elasticsearch, ElasticsearchStatus, Snapshot};
use crate::resources::common::{FIELD_MANAGER, kind_selector};

/// Typed access to the objects the operator reads and writes
///
/// `get_*` methods return `Ok(None)` when the object does not exist. Writes
/// that carry a `resourceVersion` fail with a 409 when the object changed
/// underneath, which callers surface as a transient error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<Elasticsearch>>;

    async fn create_instance(&self, es: &Elasticsearch) -> Result<Elasticsearch>;

    /// Replace the whole object, guarded by its resourceVersion
    async fn replace_instance(&self, es: &Elasticsearch) -> Result<Elasticsearch>;

    /// Write the status subresource, guarded by `resource_version`
    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ElasticsearchStatus,
    ) -> Result<Elasticsearch>;

    async fn list_instances(&self, namespace: &str) -> Result<Vec<Elasticsearch>>;

    async fn get_dormant(&self, namespace: &str, name: &str) -> Result<Option<DormantDatabase>>;

    async fn create_dormant(&self, ddb: &DormantDatabase) -> Result<DormantDatabase>;

    /// Replace a DormantDatabase, guarded by its resourceVersion
    async fn replace_dormant(&self, ddb: &DormantDatabase) -> Result<DormantDatabase>;

    /// DormantDatabases of this database kind
    async fn list_dormant(&self, namespace: &str) -> Result<Vec<DormantDatabase>>;

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Delete a Secret; a missing Secret counts as deleted
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn create_statefulset(&self, sts: &StatefulSet) -> Result<StatefulSet>;

    /// Patch only `spec.replicas`
    async fn patch_statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<StatefulSet>;

    async fn create_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
}

/// [`ControlPlane`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String> {
    obj.namespace().ok_or(Error::MissingObjectKey("metadata.namespace"))
}

fn name_of<K: ResourceExt>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<Elasticsearch>> {
        Ok(self.api::<Elasticsearch>(namespace).get_opt(name).await?)
    }

    async fn create_instance(&self, es: &Elasticsearch) -> Result<Elasticsearch> {
        let api = self.api::<Elasticsearch>(&namespace_of(es)?);
        Ok(api.create(&post_params(), es).await?)
    }

    async fn replace_instance(&self, es: &Elasticsearch) -> Result<Elasticsearch> {
        let api = self.api::<Elasticsearch>(&namespace_of(es)?);
        Ok(api.replace(&name_of(es)?, &post_params(), es).await?)
    }

    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ElasticsearchStatus,
    ) -> Result<Elasticsearch> {
        let api = self.api::<Elasticsearch>(namespace);
        let status = serde_json::to_value(status)?;
        // A resourceVersion in a merge patch turns it into a conditional write
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        Ok(api
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list_instances(&self, namespace: &str) -> Result<Vec<Elasticsearch>> {
        let api = self.api::<Elasticsearch>(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_dormant(&self, namespace: &str, name: &str) -> Result<Option<DormantDatabase>> {
        Ok(self.api::<DormantDatabase>(namespace).get_opt(name).await?)
    }

    async fn create_dormant(&self, ddb: &DormantDatabase) -> Result<DormantDatabase> {
        let api = self.api::<DormantDatabase>(&namespace_of(ddb)?);
        Ok(api.create(&post_params(), ddb).await?)
    }

    async fn replace_dormant(&self, ddb: &DormantDatabase) -> Result<DormantDatabase> {
        let api = self.api::<DormantDatabase>(&namespace_of(ddb)?);
        Ok(api.replace(&name_of(ddb)?, &post_params(), ddb).await?)
    }

    async fn list_dormant(&self, namespace: &str) -> Result<Vec<DormantDatabase>> {
        let api = self.api::<DormantDatabase>(namespace);
        let lp = ListParams::default().labels(&kind_selector());
        Ok(api.list(&lp).await?.items)
    }

    async fn get_snapshot(&self, namespace: &str, name: &str) -> Result<Option<Snapshot>> {
        Ok(self.api::<Snapshot>(namespace).get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let api = self.api::<Secret>(&namespace_of(secret)?);
        Ok(api.create(&post_params(), secret).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api::<Secret>(namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.api::<Service>(namespace).get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let api = self.api::<Service>(&namespace_of(service)?);
        Ok(api.create(&post_params(), service).await?)
    }

    async fn get_statefulset(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.api::<StatefulSet>(namespace).get_opt(name).await?)
    }

    async fn create_statefulset(&self, sts: &StatefulSet) -> Result<StatefulSet> {
        let api = self.api::<StatefulSet>(&namespace_of(sts)?);
        Ok(api.create(&post_params(), sts).await?)
    }

    async fn patch_statefulset_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<StatefulSet> {
        let api = self.api::<StatefulSet>(namespace);
        let patch = json!({ "spec": { "replicas": replicas } });
        Ok(api
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let api = self.api::<Job>(&namespace_of(job)?);
        Ok(api.create(&post_params(), job).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(self.api::<Job>(namespace).get_opt(name).await?)
    }
}
