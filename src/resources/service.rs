//! Service generation for Elasticsearch instances
//!
//! Two Services are involved per instance:
//! - a namespace-wide headless governing Service that gives StatefulSet pods
//!   stable DNS names for peer discovery
//! - a per-instance Service routing HTTP and transport traffic to the nodes

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Elasticsearch;
use crate::resources::common::{
    FIELD_MANAGER, KIND, LABEL_DATABASE_KIND, database_labels, service_name, standard_labels,
};

/// HTTP (REST) port
pub const HTTP_PORT: i32 = 9200;

/// Node-to-node transport port
pub const TRANSPORT_PORT: i32 = 9300;

fn port(name: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        target_port: Some(IntOrString::Int(number)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the headless governing Service shared by all instances in a namespace
pub fn generate_governing_service(name: &str, namespace: &str) -> Service {
    let labels = BTreeMap::from([
        (LABEL_DATABASE_KIND.to_string(), KIND.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ]);
    let selector = BTreeMap::from([(LABEL_DATABASE_KIND.to_string(), KIND.to_string())]);

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: Some(vec![port("cluster", TRANSPORT_PORT)]),
            // Peers must resolve each other before they report ready
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the per-instance Service
pub fn generate_instance_service(es: &Elasticsearch) -> Service {
    let instance = es.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(service_name(&instance)),
            namespace: es.namespace(),
            labels: Some(standard_labels(&instance)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(database_labels(&instance)),
            ports: Some(vec![
                port("http", HTTP_PORT),
                port("cluster", TRANSPORT_PORT),
            ]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
