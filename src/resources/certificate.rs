//! Certificate material for Elasticsearch instances
//!
//! Every instance gets its own certificate authority. The CA signs a node
//! certificate (transport and HTTP), an admin certificate used by the
//! security plugin's admin tool and, when client TLS is enabled, a client
//! certificate. Everything is packaged as PKCS#12 keystores protected by a
//! random passphrase stored next to them in the Secret.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::Elasticsearch;
use crate::resources::common::{cert_secret_name, database_labels, instance_namespace};
use crate::resources::secret::generate_password;

/// Keystore file extension
pub const KEYSTORE_EXT: &str = "p12";

pub const KEY_ROOT_KEYSTORE: &str = "root.p12";
pub const KEY_NODE_KEYSTORE: &str = "node.p12";
pub const KEY_ADMIN_KEYSTORE: &str = "sgadmin.p12";
pub const KEY_CLIENT_KEYSTORE: &str = "client.p12";
pub const KEY_CA_PEM: &str = "root.pem";
pub const KEY_PASSPHRASE: &str = "key_pass";

const ORGANIZATION: &str = "Elasticsearch Operator";
const CERT_VALIDITY_DAYS: i64 = 365 * 10;
const PASSPHRASE_LENGTH: usize = 16;

/// A certificate with its private key, both DER encoded
struct Issued {
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
}

/// Certificate authority for a single instance
struct InstanceCa {
    cert_pem: String,
    key: KeyPair,
    issued: Issued,
}

fn validity() -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(CERT_VALIDITY_DAYS))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn cert_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::CertificateError(format!("{}: {}", what, e))
}

fn generate_ca(instance: &str) -> Result<InstanceCa> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&format!("{}-ca", instance));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let (not_before, not_after) = validity();
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate().map_err(|e| cert_error("failed to generate CA key", e))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| cert_error("failed to self-sign CA certificate", e))?;

    Ok(InstanceCa {
        cert_pem: cert.pem(),
        issued: Issued {
            cert_der: cert.der().to_vec(),
            key_der: key.serialize_der(),
        },
        key,
    })
}

fn dns_names(names: &[String]) -> Result<Vec<SanType>> {
    names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .map_err(|e| cert_error(&format!("invalid DNS name '{}'", name), e))
        })
        .collect()
}

fn issue(
    ca: &InstanceCa,
    common_name: &str,
    sans: &[String],
    usages: Vec<ExtendedKeyUsagePurpose>,
) -> Result<Issued> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = usages;
    params.subject_alt_names = dns_names(sans)?;
    let (not_before, not_after) = validity();
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate()
        .map_err(|e| cert_error(&format!("failed to generate {} key", common_name), e))?;
    let issuer = Issuer::from_ca_cert_pem(&ca.cert_pem, &ca.key)
        .map_err(|e| cert_error("failed to load CA issuer", e))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| cert_error(&format!("failed to sign {} certificate", common_name), e))?;

    Ok(Issued {
        cert_der: cert.der().to_vec(),
        key_der: key.serialize_der(),
    })
}

/// DNS names a node is reachable under
pub fn node_dns_names(instance: &str, namespace: &str, governing_service: &str) -> Vec<String> {
    vec![
        "localhost".to_string(),
        instance.to_string(),
        format!("{}.{}", instance, namespace),
        format!("{}.{}.svc", instance, namespace),
        format!("*.{}.{}.svc", governing_service, namespace),
    ]
}

fn write_keystore(
    dir: &Path,
    file: &str,
    issued: &Issued,
    ca_der: Option<&[u8]>,
    passphrase: &str,
    alias: &str,
) -> Result<()> {
    let pfx = p12::PFX::new(&issued.cert_der, &issued.key_der, ca_der, passphrase, alias)
        .ok_or_else(|| Error::CertificateError(format!("failed to build keystore {}", file)))?;
    fs::write(dir.join(file), pfx.to_der())?;
    Ok(())
}

/// Generate the keystore files into `dir` and return the passphrase protecting them
pub fn write_keystores(
    dir: &Path,
    instance: &str,
    namespace: &str,
    governing_service: &str,
    client_tls: bool,
) -> Result<String> {
    let passphrase = generate_password(PASSPHRASE_LENGTH);

    let ca = generate_ca(instance)?;
    let node = issue(
        &ca,
        instance,
        &node_dns_names(instance, namespace, governing_service),
        vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ],
    )?;
    let admin = issue(
        &ca,
        "sgadmin",
        &[],
        vec![ExtendedKeyUsagePurpose::ClientAuth],
    )?;

    let ca_der = ca.issued.cert_der.as_slice();
    write_keystore(dir, KEY_ROOT_KEYSTORE, &ca.issued, None, &passphrase, "root")?;
    write_keystore(dir, KEY_NODE_KEYSTORE, &node, Some(ca_der), &passphrase, "node")?;
    write_keystore(dir, KEY_ADMIN_KEYSTORE, &admin, Some(ca_der), &passphrase, "sgadmin")?;

    if client_tls {
        let client = issue(
            &ca,
            "client",
            &[],
            vec![ExtendedKeyUsagePurpose::ClientAuth],
        )?;
        write_keystore(dir, KEY_CLIENT_KEYSTORE, &client, Some(ca_der), &passphrase, "client")?;
        fs::write(dir.join(KEY_CA_PEM), ca.cert_pem.as_bytes())?;
    }

    Ok(passphrase)
}

/// Generate the certificate Secret for an instance
///
/// Keystores are produced in a scratch directory which is removed once
/// its contents have been loaded into the Secret.
pub fn generate_certificate_secret(es: &Elasticsearch, governing_service: &str) -> Result<Secret> {
    let instance = es.name_any();
    let namespace = instance_namespace(es);

    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}-cert-", instance))
        .tempdir()?;
    debug!(name = %instance, dir = %scratch.path().display(), "generating keystores");

    let passphrase = write_keystores(
        scratch.path(),
        &instance,
        &namespace,
        governing_service,
        es.spec.enable_ssl,
    )?;

    let mut data = BTreeMap::new();
    for entry in fs::read_dir(scratch.path())? {
        let entry = entry?;
        let key = entry.file_name().to_string_lossy().into_owned();
        data.insert(key, ByteString(fs::read(entry.path())?));
    }
    data.insert(
        KEY_PASSPHRASE.to_string(),
        ByteString(passphrase.into_bytes()),
    );

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(cert_secret_name(&instance)),
            namespace: Some(namespace),
            labels: Some(database_labels(&instance)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}
