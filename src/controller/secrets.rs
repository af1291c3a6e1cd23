//! Secret & certificate management
//!
//! Each instance owns two Secrets: the certificate Secret (`<name>-cert`)
//! with its keystores and the credential Secret (`<name>-auth`) with
//! passwords and security policies. Both are created at most once, looked up
//! by name and owner labels before anything is generated, and recorded on
//! the instance spec once they exist.
//!
//! Secrets outlive their instance: a DormantDatabase keeps referencing them
//! so a resumed database finds its old credentials. A Secret is only deleted
//! when no instance and no other DormantDatabase references it anymore.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{DormantDatabase, Elasticsearch, ElasticsearchSpec};
use crate::resources::certificate::generate_certificate_secret;
use crate::resources::common::{
    auth_secret_name, cert_secret_name, instance_namespace, labels_match_instance,
};
use crate::resources::secret::generate_credentials_secret;

/// The two Secret families an instance owns
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretFamily {
    Certificate,
    Credentials,
}

impl SecretFamily {
    fn reference(self, spec: &ElasticsearchSpec) -> Option<&String> {
        match self {
            SecretFamily::Certificate => spec.certificate_secret.as_ref(),
            SecretFamily::Credentials => spec.database_secret.as_ref(),
        }
    }

    fn set_reference(self, spec: &mut ElasticsearchSpec, name: String) {
        match self {
            SecretFamily::Certificate => spec.certificate_secret = Some(name),
            SecretFamily::Credentials => spec.database_secret = Some(name),
        }
    }

    fn secret_name(self, instance: &str) -> String {
        match self {
            SecretFamily::Certificate => cert_secret_name(instance),
            SecretFamily::Credentials => auth_secret_name(instance),
        }
    }

    /// Generate the Secret on the blocking pool
    ///
    /// Key generation, bcrypt hashing and keystore file IO all block.
    async fn generate(self, ctx: &Context, es: &Elasticsearch) -> Result<Secret> {
        let es = es.clone();
        let governing_service = ctx.config.governing_service.clone();
        tokio::task::spawn_blocking(move || match self {
            SecretFamily::Certificate => generate_certificate_secret(&es, &governing_service),
            SecretFamily::Credentials => generate_credentials_secret(&es),
        })
        .await
        .map_err(|e| match self {
            SecretFamily::Certificate => Error::CertificateError(e.to_string()),
            SecretFamily::Credentials => Error::HashError(e.to_string()),
        })?
    }
}

/// Ensure the certificate Secret exists and is referenced by the instance
pub async fn ensure_certificate_secret(ctx: &Context, es: &Elasticsearch) -> Result<Elasticsearch> {
    ensure_secret(ctx, es, SecretFamily::Certificate).await
}

/// Ensure the credential Secret exists and is referenced by the instance
pub async fn ensure_database_secret(ctx: &Context, es: &Elasticsearch) -> Result<Elasticsearch> {
    ensure_secret(ctx, es, SecretFamily::Credentials).await
}

/// Ensure a Secret of `family` for `es`
///
/// Returns the latest copy of the instance, which carries the Secret
/// reference once this succeeds.
pub async fn ensure_secret(
    ctx: &Context,
    es: &Elasticsearch,
    family: SecretFamily,
) -> Result<Elasticsearch> {
    if family.reference(&es.spec).is_some() {
        return Ok(es.clone());
    }

    let instance = es.name_any();
    let namespace = instance_namespace(es);
    let secret_name = family.secret_name(&instance);

    match ctx.control_plane.get_secret(&namespace, &secret_name).await? {
        Some(existing) => {
            // Never adopt a Secret that some other database owns
            if !labels_match_instance(existing.metadata.labels.as_ref(), &instance) {
                return Err(Error::SecretCollision(secret_name));
            }
            debug!(name = %instance, secret = %secret_name, "reusing existing secret");
        }
        None => {
            let secret = family.generate(ctx, es).await?;
            ctx.control_plane.create_secret(&secret).await?;
            info!(name = %instance, %namespace, secret = %secret_name, "created secret");
        }
    }

    record_reference(ctx, &namespace, &instance, family, secret_name).await
}

/// Write the Secret reference into the latest copy of the instance spec
async fn record_reference(
    ctx: &Context,
    namespace: &str,
    instance: &str,
    family: SecretFamily,
    secret_name: String,
) -> Result<Elasticsearch> {
    let mut latest = ctx
        .control_plane
        .get_instance(namespace, instance)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Elasticsearch {}/{}", namespace, instance)))?;

    if family.reference(&latest.spec) == Some(&secret_name) {
        return Ok(latest);
    }
    family.set_reference(&mut latest.spec, secret_name);
    // Carries the resourceVersion just read; a concurrent writer makes this fail
    ctx.control_plane.replace_instance(&latest).await
}

fn instance_references(es: &Elasticsearch, secret: &str) -> bool {
    es.spec.certificate_secret.as_deref() == Some(secret)
        || es.spec.database_secret.as_deref() == Some(secret)
}

/// Delete the Secrets of a removed DormantDatabase that nothing references anymore
///
/// Returns the names of the deleted Secrets.
pub async fn collect_dormant_secrets(ctx: &Context, ddb: &DormantDatabase) -> Result<Vec<String>> {
    let namespace = ddb
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let referenced = ddb.referenced_secrets();
    if referenced.is_empty() {
        return Ok(Vec::new());
    }

    let instances = ctx.control_plane.list_instances(&namespace).await?;
    let others: Vec<DormantDatabase> = ctx
        .control_plane
        .list_dormant(&namespace)
        .await?
        .into_iter()
        .filter(|other| other.name_any() != ddb.name_any())
        .collect();

    // A DormantDatabase delete is seen once, so every Secret gets its attempt
    let mut deleted = Vec::new();
    let mut first_error = None;
    for secret in referenced {
        let in_use = instances.iter().any(|es| instance_references(es, secret))
            || others
                .iter()
                .any(|other| other.referenced_secrets().contains(&secret));
        if in_use {
            debug!(%secret, %namespace, "secret still referenced, keeping it");
            continue;
        }

        match ctx.control_plane.delete_secret(&namespace, secret).await {
            Ok(()) => {
                info!(%secret, %namespace, "deleted unreferenced secret");
                deleted.push(secret.to_string());
            }
            Err(e) => {
                warn!(%secret, %namespace, error = %e, "failed to delete unreferenced secret");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(deleted),
    }
}
