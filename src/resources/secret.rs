//! Credential Secret generation
//!
//! The credential Secret carries the two built-in user passwords and the
//! Search Guard policy documents the nodes load on startup. The internal
//! users document embeds bcrypt hashes of the passwords, never plaintext.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use rand::Rng;

use crate::controller::error::{Error, Result};
use crate::crd::Elasticsearch;
use crate::resources::common::{auth_secret_name, database_labels};

pub const KEY_ADMIN_PASSWORD: &str = "ADMIN_PASSWORD";
pub const KEY_READALL_PASSWORD: &str = "READALL_PASSWORD";
pub const KEY_ACTION_GROUPS: &str = "sg_action_groups.yml";
pub const KEY_CONFIG: &str = "sg_config.yml";
pub const KEY_INTERNAL_USERS: &str = "sg_internal_users.yml";
pub const KEY_ROLES: &str = "sg_roles.yml";
pub const KEY_ROLES_MAPPING: &str = "sg_roles_mapping.yml";

pub const ADMIN_USER: &str = "admin";
pub const READALL_USER: &str = "readall";

const PASSWORD_LENGTH: usize = 16;

const ACTION_GROUPS: &str = r#"
UNLIMITED:
  - "*"

READ:
  - "indices:data/read*"
  - "indices:admin/mappings/fields/get*"

CLUSTER_COMPOSITE_OPS_RO:
  - "indices:data/read/mget"
  - "indices:data/read/msearch"
  - "indices:data/read/mtv"
  - "indices:data/read/coordinate-msearch*"
  - "indices:admin/aliases/exists*"
  - "indices:admin/aliases/get*"

CLUSTER_SNAPSHOT:
  - "indices:data/read/scroll*"

INDICES_SNAPSHOT:
  - "indices:admin/get"
"#;

const CONFIG: &str = r#"
searchguard:
  dynamic:
    authc:
      basic_internal_auth_domain:
        enabled: true
        order: 4
        http_authenticator:
          type: basic
          challenge: true
        authentication_backend:
          type: intern
"#;

const ROLES: &str = r#"
sg_all_access:
  cluster:
    - UNLIMITED
  indices:
    '*':
      '*':
        - UNLIMITED
  tenants:
    adm_tenant: RW
    test_tenant_ro: RW

sg_readall:
  cluster:
    - CLUSTER_COMPOSITE_OPS_RO
    - CLUSTER_SNAPSHOT
  indices:
    '*':
      '*':
        - READ
        - INDICES_SNAPSHOT
"#;

const ROLES_MAPPING: &str = r#"
sg_all_access:
  users:
    - admin

sg_readall:
  users:
    - readall
"#;

/// Generate a random alphanumeric password
pub fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Render the internal users document for the two built-in users
pub fn internal_users_document(admin_hash: &str, readall_hash: &str) -> String {
    format!(
        "\n{}:\n  hash: {}\n\n{}:\n  hash: {}\n",
        ADMIN_USER, admin_hash, READALL_USER, readall_hash
    )
}

fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| Error::HashError(e.to_string()))
}

/// Generate the credential Secret for an instance
pub fn generate_credentials_secret(es: &Elasticsearch) -> Result<Secret> {
    let instance = es.name_any();

    let admin_password = generate_password(PASSWORD_LENGTH);
    let readall_password = generate_password(PASSWORD_LENGTH);
    let admin_hash = hash_password(&admin_password)?;
    let readall_hash = hash_password(&readall_password)?;

    let data = BTreeMap::from([
        (
            KEY_ADMIN_PASSWORD.to_string(),
            ByteString(admin_password.into_bytes()),
        ),
        (
            KEY_READALL_PASSWORD.to_string(),
            ByteString(readall_password.into_bytes()),
        ),
        (
            KEY_ACTION_GROUPS.to_string(),
            ByteString(ACTION_GROUPS.as_bytes().to_vec()),
        ),
        (KEY_CONFIG.to_string(), ByteString(CONFIG.as_bytes().to_vec())),
        (
            KEY_INTERNAL_USERS.to_string(),
            ByteString(internal_users_document(&admin_hash, &readall_hash).into_bytes()),
        ),
        (KEY_ROLES.to_string(), ByteString(ROLES.as_bytes().to_vec())),
        (
            KEY_ROLES_MAPPING.to_string(),
            ByteString(ROLES_MAPPING.as_bytes().to_vec()),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(auth_secret_name(&instance)),
            namespace: es.namespace(),
            labels: Some(database_labels(&instance)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}
