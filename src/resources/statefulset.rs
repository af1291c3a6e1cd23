//! StatefulSet generation for Elasticsearch instances
//!
//! One StatefulSet per instance. Pods resolve each other through the
//! namespace's governing Service, read the admin password from the
//! credential Secret and mount the keystores from the certificate Secret.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretKeySelector, SecretVolumeSource, SecurityContext,
    TCPSocketAction, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{Elasticsearch, ResourceList};
use crate::resources::common::{
    auth_secret_name, cert_secret_name, database_labels, standard_labels, statefulset_name,
};
use crate::resources::secret::KEY_ADMIN_PASSWORD;
use crate::resources::service::{HTTP_PORT, TRANSPORT_PORT};

/// Mount path of the certificate Secret inside database pods
pub const CERT_MOUNT_PATH: &str = "/elasticsearch/config/certs";

/// Mount path of the security policy documents inside database pods
pub const SECURITY_CONFIG_MOUNT_PATH: &str = "/elasticsearch/plugins/search-guard/sgconfig";

const DATA_MOUNT_PATH: &str = "/data";

/// Settings coming from the operator rather than from the instance spec
#[derive(Clone, Debug)]
pub struct WorkloadSettings<'a> {
    /// Image repository; the instance version is used as the tag
    pub image: &'a str,
    /// Name of the namespace's governing Service
    pub governing_service: &'a str,
}

fn quantities(list: &ResourceList) -> BTreeMap<String, Quantity> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &list.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &list.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    map
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Generate the StatefulSet for an instance
pub fn generate_statefulset(es: &Elasticsearch, settings: &WorkloadSettings<'_>) -> StatefulSet {
    let instance = es.name_any();
    let name = statefulset_name(&instance);
    let labels = standard_labels(&instance);
    let cert_secret = es
        .spec
        .certificate_secret
        .clone()
        .unwrap_or_else(|| cert_secret_name(&instance));
    let auth_secret = es
        .spec
        .database_secret
        .clone()
        .unwrap_or_else(|| auth_secret_name(&instance));

    let env_vars = vec![
        value_env("CLUSTER_NAME", instance.clone()),
        field_env("NODE_NAME", "metadata.name"),
        field_env("NAMESPACE", "metadata.namespace"),
        value_env(
            "DISCOVERY_SERVICE",
            format!("{}.{}", settings.governing_service, "$(NAMESPACE)"),
        ),
        value_env("NODE_COUNT", es.spec.replicas.max(0).to_string()),
        value_env("SSL_ENABLE", es.spec.enable_ssl.to_string()),
        value_env("KEYSTORE_TYPE", "PKCS12"),
        EnvVar {
            name: KEY_ADMIN_PASSWORD.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: auth_secret.clone(),
                    key: KEY_ADMIN_PASSWORD.to_string(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let volume_mounts = vec![
        VolumeMount {
            name: "data".to_string(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "certs".to_string(),
            mount_path: CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "sgconfig".to_string(),
            mount_path: SECURITY_CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];

    let mut volumes = vec![
        Volume {
            name: "certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(cert_secret),
                default_mode: Some(0o440),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "sgconfig".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(auth_secret),
                default_mode: Some(0o440),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    // Without storage, node data lives on an emptyDir
    let volume_claim_templates = match &es.spec.storage {
        Some(storage) => Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                labels: Some(database_labels(&instance)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: storage.storage_class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(storage.size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        None => {
            volumes.push(Volume {
                name: "data".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
            None
        }
    };

    // HTTP is behind basic auth, so readiness only checks the listener
    let readiness_probe = Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(HTTP_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(20),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(6),
        ..Default::default()
    };

    let container = Container {
        name: "elasticsearch".to_string(),
        image: Some(format!("{}:{}", settings.image, es.spec.version)),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![
            ContainerPort {
                container_port: HTTP_PORT,
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: TRANSPORT_PORT,
                name: Some("cluster".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(env_vars),
        volume_mounts: Some(volume_mounts),
        resources: es.spec.resources.as_ref().map(|r| ResourceRequirements {
            limits: r.limits.as_ref().map(quantities),
            requests: r.requests.as_ref().map(quantities),
            ..Default::default()
        }),
        readiness_probe: Some(readiness_probe),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: es.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(settings.governing_service.to_string()),
            replicas: Some(es.spec.replicas.max(0)),
            selector: LabelSelector {
                match_labels: Some(database_labels(&instance)),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            pod_management_policy: Some("Parallel".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    node_selector: if es.spec.node_selector.is_empty() {
                        None
                    } else {
                        Some(es.spec.node_selector.clone())
                    },
                    termination_grace_period_seconds: Some(30),
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether a StatefulSet reports all desired pods ready
pub fn is_statefulset_ready(sts: &StatefulSet) -> bool {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    ready >= desired
}
