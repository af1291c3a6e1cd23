//! Secret provisioning and release scenarios

use std::collections::BTreeMap;
use std::sync::Mutex;

use k8s_openapi::api::core::v1::Secret;
use kube::core::ObjectMeta;

use elasticsearch_operator::controller::{Error, ensure_database_secret};
use elasticsearch_operator::resources::certificate::{
    KEY_ADMIN_KEYSTORE, KEY_CA_PEM, KEY_CLIENT_KEYSTORE, KEY_NODE_KEYSTORE, KEY_PASSPHRASE,
    KEY_ROOT_KEYSTORE,
};
use elasticsearch_operator::resources::database_labels;
use elasticsearch_operator::resources::secret::{
    KEY_ADMIN_PASSWORD, KEY_INTERNAL_USERS, KEY_READALL_PASSWORD,
};

use crate::common::*;

fn keys(secret: &Secret) -> Vec<String> {
    secret.data.as_ref().unwrap().keys().cloned().collect()
}

#[tokio::test]
async fn test_secrets_are_created_once() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    assert_eq!(h.cp.secret_creates(), 2);

    // Replaying the create against the stored copy finds the references
    let ctx = h.reconciler().context();
    let again = ensure_database_secret(ctx, &es).await.unwrap();
    assert_eq!(again.spec.database_secret.as_deref(), Some("es1-auth"));
    assert_eq!(h.cp.secret_creates(), 2);
}

#[tokio::test]
async fn test_unrecorded_own_secret_is_adopted() {
    let h = Harness::new();
    h.cp.insert_secret(Secret {
        metadata: ObjectMeta {
            name: Some("es1-auth".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(database_labels("es1")),
            ..Default::default()
        },
        ..Default::default()
    });

    let es = h.add(elasticsearch("es1")).await;

    assert_eq!(es.spec.database_secret.as_deref(), Some("es1-auth"));
    // Only the certificate Secret was generated
    assert_eq!(h.cp.secret_creates(), 1);
}

#[tokio::test]
async fn test_foreign_secret_collision() {
    let h = Harness::new();
    h.cp.insert_secret(Secret {
        metadata: ObjectMeta {
            name: Some("es1-auth".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "something-else".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    });
    let es = h.cp.insert_instance(elasticsearch("es1"));

    let err = ensure_database_secret(h.reconciler().context(), &es)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SecretCollision(ref name) if name == "es1-auth"));
    assert!(h.cp.instance(NAMESPACE, "es1").unwrap().spec.database_secret.is_none());
}

#[tokio::test]
async fn test_collision_fails_create() {
    let h = Harness::new();
    h.cp.insert_secret(Secret {
        metadata: ObjectMeta {
            name: Some("es1-cert".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(database_labels("other")),
            ..Default::default()
        },
        ..Default::default()
    });

    h.add(elasticsearch("es1")).await;

    let warning = h
        .recorder
        .warnings()
        .into_iter()
        .find(|e| e.reason == elasticsearch_operator::controller::reasons::FAILED_TO_CREATE)
        .unwrap();
    assert!(warning.message.contains("es1-cert"));
    assert_eq!(h.cp.statefulset_count(), 0);
}

#[tokio::test]
async fn test_certificate_keys_without_client_tls() {
    let h = Harness::new();
    h.add(elasticsearch("es1")).await;

    let secret = h.cp.secret(NAMESPACE, "es1-cert").unwrap();
    let keys = keys(&secret);
    for key in [KEY_ROOT_KEYSTORE, KEY_NODE_KEYSTORE, KEY_ADMIN_KEYSTORE, KEY_PASSPHRASE] {
        assert!(keys.contains(&key.to_string()), "missing {key}");
    }
    assert!(!keys.contains(&KEY_CLIENT_KEYSTORE.to_string()));
    assert!(!keys.contains(&KEY_CA_PEM.to_string()));
}

#[tokio::test]
async fn test_certificate_keys_with_client_tls() {
    let h = Harness::new();
    h.add(ElasticsearchBuilder::new("es1").ssl().build()).await;

    let keys = keys(&h.cp.secret(NAMESPACE, "es1-cert").unwrap());
    assert!(keys.contains(&KEY_CLIENT_KEYSTORE.to_string()));
    assert!(keys.contains(&KEY_CA_PEM.to_string()));
}

#[tokio::test]
async fn test_credentials_secret_contents() {
    let h = Harness::new();
    h.add(elasticsearch("es1")).await;

    let secret = h.cp.secret(NAMESPACE, "es1-auth").unwrap();
    assert_eq!(secret.metadata.labels, Some(database_labels("es1")));
    let data = secret.data.unwrap();
    let admin = String::from_utf8(data[KEY_ADMIN_PASSWORD].0.clone()).unwrap();
    let readall = String::from_utf8(data[KEY_READALL_PASSWORD].0.clone()).unwrap();
    assert_ne!(admin, readall);

    let users = String::from_utf8(data[KEY_INTERNAL_USERS].0.clone()).unwrap();
    assert!(!users.contains(&admin), "plaintext password leaked");
}

#[tokio::test]
async fn test_dormant_deletion_releases_unshared_secrets() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    h.delete(&es).await;

    h.delete_dormant("es1").await;

    assert!(h.cp.secret(NAMESPACE, "es1-cert").is_none());
    assert!(h.cp.secret(NAMESPACE, "es1-auth").is_none());
}

#[tokio::test]
async fn test_dormant_deletion_keeps_shared_secrets() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    h.delete(&es).await;

    // A second live instance was pointed at the first one's credentials
    h.add(
        ElasticsearchBuilder::new("es2")
            .secrets("es2-cert", "es1-auth")
            .build(),
    )
    .await;

    h.delete_dormant("es1").await;

    assert!(h.cp.secret(NAMESPACE, "es1-cert").is_none());
    assert!(h.cp.secret(NAMESPACE, "es1-auth").is_some());
}

#[tokio::test]
async fn test_dormant_deletion_ignores_other_namespaces() {
    let h = Harness::new();
    let es = h.add(elasticsearch("es1")).await;
    h.delete(&es).await;
    h.add(
        ElasticsearchBuilder::new("es1")
            .namespace("other")
            .secrets("es1-cert", "es1-auth")
            .build(),
    )
    .await;

    h.delete_dormant("es1").await;

    assert!(h.cp.secret(NAMESPACE, "es1-cert").is_none());
}

#[tokio::test]
async fn test_secret_generation_yields_to_other_work() {
    let h = Harness::new();
    let order = Mutex::new(Vec::new());

    tokio::join!(
        async {
            h.add(elasticsearch("es1")).await;
            order.lock().unwrap().push("create");
        },
        async {
            order.lock().unwrap().push("sibling");
        },
    );

    // Key generation and hashing run off the task, so the sibling gets polled first
    assert_eq!(*order.lock().unwrap(), vec!["sibling", "create"]);
    assert_eq!(h.cp.secret_creates(), 2);
}
