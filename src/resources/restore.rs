//! Restore Job generation
//!
//! A restore runs as a one-shot `batch/v1` Job that pulls a Snapshot from its
//! storage backend into a freshly created instance.

use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{Elasticsearch, Snapshot};
use crate::resources::common::{auth_secret_name, instance_namespace, service_name, standard_labels};
use crate::resources::secret::KEY_ADMIN_PASSWORD;
use crate::resources::service::HTTP_PORT;

/// Name of the restore Job for an instance and snapshot
pub fn restore_job_name(instance: &str, snapshot: &str) -> String {
    format!("{}-restore-{}", instance, snapshot)
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Generate the restore Job for `es` from `snapshot`
pub fn generate_restore_job(es: &Elasticsearch, snapshot: &Snapshot, image: &str) -> Job {
    let instance = es.name_any();
    let namespace = instance_namespace(es);
    let snapshot_name = snapshot.name_any();
    let labels = standard_labels(&instance);

    let mut env_vars = vec![
        env(
            "DB_HOST",
            format!("{}.{}.svc:{}", service_name(&instance), namespace, HTTP_PORT),
        ),
        env("SNAPSHOT_NAME", snapshot_name.clone()),
        env("SNAPSHOT_NAMESPACE", snapshot.namespace().unwrap_or_default()),
        env("SOURCE_DATABASE", snapshot.spec.database_name.clone()),
        EnvVar {
            name: "DB_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: es
                        .spec
                        .database_secret
                        .clone()
                        .unwrap_or_else(|| auth_secret_name(&instance)),
                    key: KEY_ADMIN_PASSWORD.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(bucket) = &snapshot.spec.bucket {
        env_vars.push(env("SNAPSHOT_BUCKET", bucket.clone()));
    }
    if let Some(secret) = &snapshot.spec.storage_secret_name {
        env_vars.push(env("STORAGE_SECRET_NAME", secret.clone()));
    }

    Job {
        metadata: ObjectMeta {
            name: Some(restore_job_name(&instance, &snapshot_name)),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(2),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "restore".to_string(),
                        image: Some(image.to_string()),
                        args: Some(vec!["restore".to_string()]),
                        env: Some(env_vars),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Terminal outcome of a Job, `None` while it is still running
pub fn job_outcome(status: Option<&JobStatus>) -> Option<bool> {
    let status = status?;
    let condition = |type_: &str| {
        status
            .conditions
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.type_ == type_ && c.status == "True"))
    };

    if condition("Complete") || status.succeeded.unwrap_or(0) > 0 {
        Some(true)
    } else if condition("Failed") {
        Some(false)
    } else {
        None
    }
}
