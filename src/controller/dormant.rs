//! Dormant database gatekeeping
//!
//! A DormantDatabase keeps a deleted database recoverable under its original
//! name. While it exists, the name may only host a database of the same kind.

use kube::ResourceExt;
use kube::core::ObjectMeta;
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{
    DormantDatabase, DormantDatabaseSpec, Elasticsearch, Origin, OriginMeta, OriginSpec,
};
use crate::resources::common::{KIND, database_labels, instance_namespace};

/// Outcome of the dormant check for an instance name
#[derive(Debug)]
pub enum Admission {
    /// No DormantDatabase holds the name
    Free,
    /// A DormantDatabase of the same kind holds the name; its data is recoverable
    Recoverable(Box<DormantDatabase>),
}

/// Decide whether `es` may be created or updated under its name
///
/// Fails with [`Error::DormantConflict`] when the name is held by a
/// DormantDatabase of a different kind.
pub async fn admit(ctx: &Context, es: &Elasticsearch) -> Result<Admission> {
    let namespace = instance_namespace(es);
    let name = es.name_any();

    let Some(ddb) = ctx.control_plane.get_dormant(&namespace, &name).await? else {
        debug!(%name, %namespace, "no dormant database");
        return Ok(Admission::Free);
    };

    match ddb.database_kind() {
        Some(kind) if kind == KIND => Ok(Admission::Recoverable(Box::new(ddb))),
        other => Err(Error::DormantConflict {
            namespace,
            name,
            kind: other.unwrap_or("<unknown>").to_string(),
        }),
    }
}

/// Build the DormantDatabase preserving `es`
pub fn dormant_from_instance(es: &Elasticsearch) -> DormantDatabase {
    let name = es.name_any();
    let namespace = instance_namespace(es);

    DormantDatabase {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(database_labels(&name)),
            ..Default::default()
        },
        spec: DormantDatabaseSpec {
            origin: Origin {
                metadata: OriginMeta {
                    name,
                    namespace,
                    labels: es.labels().clone(),
                    annotations: es.annotations().clone(),
                },
                spec: OriginSpec {
                    elasticsearch: Some(es.spec.clone()),
                },
            },
            pause: true,
            wipe_out: false,
            resume: false,
        },
        status: None,
    }
}
