use lamb_store::StorageError;

use crate::diagnostics::codes;
use crate::registry::RegistryError;

/// Failures a deployment can end with. Public operations return
/// `anyhow::Result` values carrying these so callers can `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("[LMB100] build failed: {message}")]
    Build { message: String },
    #[error("[LMB200] {operation} kept failing after retries: {message}")]
    Transient { operation: String, message: String },
    #[error("[LMB300] {operation} was denied: {message}")]
    PermissionDenied { operation: String, message: String },
    #[error("[LMB400] artifact {key} failed integrity verification: {reason}")]
    Integrity { key: String, reason: String },
    #[error("[LMB401] artifact {key} does not exist")]
    MissingArtifact { key: String },
    #[error("[LMB500] version {requested} of {name} is not newer than the latest stored version {latest}")]
    VersionConflict {
        name: String,
        requested: String,
        latest: String,
    },
    #[error("[LMB501] {0}")]
    InvalidInput(String),
    #[error("[LMB600] {operation} failed: {message}")]
    Provider { operation: String, message: String },
}

impl DeployError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Build { .. } => codes::BUILD,
            Self::Transient { .. } => codes::TRANSIENT,
            Self::PermissionDenied { .. } => codes::PERMISSION_DENIED,
            Self::Integrity { .. } => codes::INTEGRITY,
            Self::MissingArtifact { .. } => codes::MISSING_ARTIFACT,
            Self::VersionConflict { .. } => codes::VERSION_CONFLICT,
            Self::InvalidInput(_) => codes::INVALID_INPUT,
            Self::Provider { .. } => codes::PROVIDER,
        }
    }

    /// Errors the caller can fix by changing their input.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::InvalidInput(_))
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::VersionConflict { .. } => {
                Some("pass a version greater than the latest one, or omit --version to auto-assign")
            }
            Self::Transient { .. } => Some("the provider is throttling; rerun the same command"),
            Self::PermissionDenied { .. } => {
                Some("check that the configured credentials may access the bucket and registry")
            }
            Self::Integrity { .. } => Some("redeploy the artifact to write a fresh copy"),
            _ => None,
        }
    }

    pub(crate) fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    pub(crate) fn from_storage(operation: &str, err: StorageError) -> Self {
        match err {
            StorageError::Transient { .. } => Self::Transient {
                operation: operation.to_string(),
                message: err.to_string(),
            },
            StorageError::AccessDenied { .. } => Self::PermissionDenied {
                operation: operation.to_string(),
                message: err.to_string(),
            },
            StorageError::NotFound { key } => Self::MissingArtifact { key },
            StorageError::InvalidKey { .. } => Self::InvalidInput(err.to_string()),
            StorageError::CorruptMetadata { ref key, .. } => Self::Integrity {
                key: key.clone(),
                reason: err.to_string(),
            },
            StorageError::Io { .. } => Self::Provider {
                operation: operation.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn from_registry(operation: &str, err: RegistryError) -> Self {
        let message = err.to_string();
        let operation = operation.to_string();
        match err {
            RegistryError::Throttled { .. } => Self::Transient { operation, message },
            RegistryError::AccessDenied(_) => Self::PermissionDenied { operation, message },
            RegistryError::InvalidRequest(_) => Self::InvalidInput(message),
            RegistryError::Conflict(_)
            | RegistryError::NotFound(_)
            | RegistryError::Corrupt { .. }
            | RegistryError::Io(_) => Self::Provider { operation, message },
        }
    }
}

/// Finds the first [`DeployError`] in an error chain.
#[must_use]
pub fn deploy_error(err: &anyhow::Error) -> Option<&DeployError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DeployError>())
}
