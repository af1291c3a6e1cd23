//! Error types for the Elasticsearch controller

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity
/// (e.g., `KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The name is held by a DormantDatabase of another kind
    #[error("DormantDatabase {namespace}/{name} of kind {kind} already exists")]
    DormantConflict {
        namespace: String,
        name: String,
        kind: String,
    },

    /// A Secret with the deterministic name exists but belongs to someone else
    #[error("intended secret {0} already exists")]
    SecretCollision(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Password hash error: {0}")]
    HashError(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Monitor error: {0}")]
    MonitorError(String),

    #[error("Restore error: {0}")]
    RestoreError(String),
}

impl Error {
    /// Check if this error may resolve on a later event or resync
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors are not retryable, except 404, 409 Conflict and
                    // 429 TooManyRequests
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 404 || code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::NotFound(_) => true,
            Error::Timeout(_) => true,
            Error::IoError(_) => true,
            Error::SchedulerError(_) => true,
            Error::MonitorError(_) => true,
            Error::RestoreError(_) => true,
            // Needs operator intervention
            Error::ValidationError(_) => false,
            Error::DormantConflict { .. } => false,
            Error::SecretCollision(_) => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
            Error::CertificateError(_) => false,
            Error::HashError(_) => false,
        }
    }

    /// Name or ownership collision that blocks reconciliation
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::DormantConflict { .. } | Error::SecretCollision(_)
        )
    }

    /// The referenced object does not exist (yet)
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(api_err)) => api_err.code == 404,
            _ => false,
        }
    }

    /// Optimistic-concurrency rejection from the API server
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(api_err)) if api_err.code == 409)
    }

    /// A create lost the race against another writer of the same name
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::KubeError(kube::Error::Api(api_err))
                if api_err.code == 409 && api_err.reason == "AlreadyExists"
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
