//! Objects created for a running instance

use elasticsearch_operator::resources::service::{HTTP_PORT, TRANSPORT_PORT};
use elasticsearch_operator::resources::standard_labels;

use crate::common::*;

#[tokio::test]
async fn test_statefulset_mounts_the_recorded_secrets() {
    let h = Harness::new();
    let es = h
        .add(ElasticsearchBuilder::new("es1").replicas(2).build())
        .await;

    let sts = h.cp.statefulset(NAMESPACE, "es1").unwrap();
    let spec = sts.spec.unwrap();
    assert_eq!(spec.service_name.as_deref(), Some(test_config().governing_service.as_str()));

    let pod = spec.template.spec.unwrap();
    let volumes = pod.volumes.unwrap();
    let secret_of = |volume: &str| {
        volumes
            .iter()
            .find(|v| v.name == volume)
            .and_then(|v| v.secret.as_ref())
            .and_then(|s| s.secret_name.clone())
    };
    assert_eq!(secret_of("certs"), es.spec.certificate_secret);
    assert_eq!(secret_of("sgconfig"), es.spec.database_secret);
    assert!(volumes.iter().any(|v| v.name == "data" && v.empty_dir.is_some()));

    let container = &pod.containers[0];
    let password = container
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "ADMIN_PASSWORD")
        .and_then(|e| e.value_from.as_ref())
        .and_then(|v| v.secret_key_ref.as_ref())
        .unwrap();
    assert_eq!(Some(password.name.clone()), es.spec.database_secret);
}

#[tokio::test]
async fn test_persistent_storage_uses_claim_template() {
    let h = Harness::new();
    h.add(ElasticsearchBuilder::new("es1").storage("10Gi").build())
        .await;

    let spec = h.cp.statefulset(NAMESPACE, "es1").unwrap().spec.unwrap();
    let claims = spec.volume_claim_templates.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].metadata.name.as_deref(), Some("data"));
    let volumes = spec.template.spec.unwrap().volumes.unwrap();
    assert!(!volumes.iter().any(|v| v.name == "data"));
}

#[tokio::test]
async fn test_services_expose_http_and_transport() {
    let h = Harness::new();
    h.add(elasticsearch("es1")).await;
    h.add(elasticsearch("es2")).await;

    // One governing Service per namespace, one Service per instance
    let mut names = h.cp.service_names(NAMESPACE);
    names.sort();
    let mut expected = vec![
        test_config().governing_service,
        "es1".to_string(),
        "es2".to_string(),
    ];
    expected.sort();
    assert_eq!(names, expected);

    let sts = h.cp.statefulset(NAMESPACE, "es2").unwrap();
    assert_eq!(sts.metadata.labels, Some(standard_labels("es2")));
    let ports: Vec<i32> = sts.spec.unwrap().template.spec.unwrap().containers[0]
        .ports
        .clone()
        .unwrap()
        .iter()
        .map(|p| p.container_port)
        .collect();
    assert_eq!(ports, vec![HTTP_PORT, TRANSPORT_PORT]);
}
