//! Layer registry seam: numbered layer versions plus their permission
//! statements.

use std::io;

use lamb_domain::{
    digest_from_description, validate_artifact_name, LayerVersionRecord, PermissionGrant,
};
use lamb_store::{with_retry, RetryPolicy, Retryable};
use serde::{Deserialize, Serialize};

mod local;
mod memory;

pub use local::LocalLayerRegistry;
pub use memory::{MemoryLayerRegistry, RegistryOp};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry throttled {operation}: {message}")]
    Throttled { operation: String, message: String },
    #[error("registry access denied: {0}")]
    AccessDenied(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid registry request: {0}")]
    InvalidRequest(String),
    #[error("registry state for layer {layer} is corrupt: {message}")]
    Corrupt { layer: String, message: String },
    #[error("registry i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl Retryable for RegistryError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishLayerRequest {
    pub layer_name: String,
    pub storage_key: String,
    pub description: String,
    #[serde(default)]
    pub compatible_runtimes: Vec<String>,
}

/// Layer version store. Version numbers are assigned here, never by callers.
pub trait LayerRegistry: Send + Sync {
    /// All versions of a layer in ascending order; empty when never published.
    fn list_layer_versions(&self, layer_name: &str)
        -> Result<Vec<LayerVersionRecord>, RegistryError>;

    fn publish_layer_version(
        &self,
        request: &PublishLayerRequest,
    ) -> Result<LayerVersionRecord, RegistryError>;

    /// [`RegistryError::Conflict`] when the statement id is already present.
    fn add_permission(&self, grant: &PermissionGrant) -> Result<(), RegistryError>;

    /// [`RegistryError::NotFound`] when the statement or version is absent.
    fn remove_permission(
        &self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError>;

    fn list_permissions(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError>;
}

impl<T: LayerRegistry + ?Sized> LayerRegistry for std::sync::Arc<T> {
    fn list_layer_versions(
        &self,
        layer_name: &str,
    ) -> Result<Vec<LayerVersionRecord>, RegistryError> {
        (**self).list_layer_versions(layer_name)
    }

    fn publish_layer_version(
        &self,
        request: &PublishLayerRequest,
    ) -> Result<LayerVersionRecord, RegistryError> {
        (**self).publish_layer_version(request)
    }

    fn add_permission(&self, grant: &PermissionGrant) -> Result<(), RegistryError> {
        (**self).add_permission(grant)
    }

    fn remove_permission(
        &self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError> {
        (**self).remove_permission(layer_name, version, statement_id)
    }

    fn list_permissions(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError> {
        (**self).list_permissions(layer_name, version)
    }
}

/// Retries throttled registry calls with the given policy.
#[derive(Debug, Clone)]
pub struct RetryingRegistry<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: LayerRegistry> RetryingRegistry<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<R: LayerRegistry> LayerRegistry for RetryingRegistry<R> {
    fn list_layer_versions(
        &self,
        layer_name: &str,
    ) -> Result<Vec<LayerVersionRecord>, RegistryError> {
        with_retry(&self.policy, "list_layer_versions", || {
            self.inner.list_layer_versions(layer_name)
        })
    }

    fn publish_layer_version(
        &self,
        request: &PublishLayerRequest,
    ) -> Result<LayerVersionRecord, RegistryError> {
        with_retry(&self.policy, "publish_layer_version", || {
            self.inner.publish_layer_version(request)
        })
    }

    fn add_permission(&self, grant: &PermissionGrant) -> Result<(), RegistryError> {
        with_retry(&self.policy, "add_permission", || {
            self.inner.add_permission(grant)
        })
    }

    fn remove_permission(
        &self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError> {
        with_retry(&self.policy, "remove_permission", || {
            self.inner.remove_permission(layer_name, version, statement_id)
        })
    }

    fn list_permissions(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError> {
        with_retry(&self.policy, "list_permissions", || {
            self.inner.list_permissions(layer_name, version)
        })
    }
}

/// Persisted state of one layer, shared by both backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LayerState {
    /// Highest number ever assigned; numbers are never reused.
    #[serde(default)]
    last_version: u64,
    #[serde(default)]
    versions: Vec<StoredLayerVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLayerVersion {
    version: u64,
    storage_key: String,
    description: String,
    #[serde(default)]
    compatible_runtimes: Vec<String>,
    #[serde(default)]
    statements: Vec<PermissionGrant>,
}

impl LayerState {
    pub(crate) fn records(&self, layer_name: &str, arn_prefix: &str) -> Vec<LayerVersionRecord> {
        let mut records: Vec<LayerVersionRecord> = self
            .versions
            .iter()
            .map(|stored| LayerVersionRecord {
                layer_name: layer_name.to_string(),
                version: stored.version,
                arn: layer_version_arn(arn_prefix, layer_name, stored.version),
                digest: digest_from_description(&stored.description),
                description: stored.description.clone(),
                compatible_runtimes: stored.compatible_runtimes.clone(),
            })
            .collect();
        records.sort_by_key(|record| record.version);
        records
    }

    pub(crate) fn publish(
        &mut self,
        request: &PublishLayerRequest,
        arn_prefix: &str,
    ) -> LayerVersionRecord {
        self.last_version = self
            .last_version
            .max(self.versions.iter().map(|v| v.version).max().unwrap_or(0))
            + 1;
        let stored = StoredLayerVersion {
            version: self.last_version,
            storage_key: request.storage_key.clone(),
            description: request.description.clone(),
            compatible_runtimes: request.compatible_runtimes.clone(),
            statements: Vec::new(),
        };
        self.versions.push(stored);
        LayerVersionRecord {
            layer_name: request.layer_name.clone(),
            version: self.last_version,
            arn: layer_version_arn(arn_prefix, &request.layer_name, self.last_version),
            digest: digest_from_description(&request.description),
            description: request.description.clone(),
            compatible_runtimes: request.compatible_runtimes.clone(),
        }
    }

    pub(crate) fn add_statement(&mut self, grant: &PermissionGrant) -> Result<(), RegistryError> {
        let version = self.version_mut(&grant.layer_name, grant.version)?;
        if version
            .statements
            .iter()
            .any(|existing| existing.statement_id == grant.statement_id)
        {
            return Err(RegistryError::Conflict(format!(
                "statement {} on {}:{}",
                grant.statement_id, grant.layer_name, grant.version
            )));
        }
        version.statements.push(grant.clone());
        Ok(())
    }

    pub(crate) fn remove_statement(
        &mut self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError> {
        let stored = self.version_mut(layer_name, version)?;
        let before = stored.statements.len();
        stored
            .statements
            .retain(|existing| existing.statement_id != statement_id);
        if stored.statements.len() == before {
            return Err(RegistryError::NotFound(format!(
                "statement {statement_id} on {layer_name}:{version}"
            )));
        }
        Ok(())
    }

    pub(crate) fn statements(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError> {
        self.versions
            .iter()
            .find(|stored| stored.version == version)
            .map(|stored| stored.statements.clone())
            .ok_or_else(|| RegistryError::NotFound(format!("layer version {layer_name}:{version}")))
    }

    fn version_mut(
        &mut self,
        layer_name: &str,
        version: u64,
    ) -> Result<&mut StoredLayerVersion, RegistryError> {
        self.versions
            .iter_mut()
            .find(|stored| stored.version == version)
            .ok_or_else(|| RegistryError::NotFound(format!("layer version {layer_name}:{version}")))
    }
}

#[must_use]
pub fn layer_version_arn(arn_prefix: &str, layer_name: &str, version: u64) -> String {
    format!("{arn_prefix}:layer:{layer_name}:{version}")
}

pub(crate) fn check_layer_name(layer_name: &str) -> Result<(), RegistryError> {
    validate_artifact_name(layer_name).map_err(|err| RegistryError::InvalidRequest(err.to_string()))
}
