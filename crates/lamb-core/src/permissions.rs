//! Idempotent layer-version permission changes.
//!
//! Statement ids are derived from the grant itself, so a repeated grant hits
//! the registry's conflict and a revoke finds the statement without any local
//! bookkeeping.

use anyhow::Result;
use lamb_domain::PermissionGrant;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    registry::{LayerRegistry, RegistryError},
    DeployError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionChange {
    Added,
    AlreadyPresent,
    Removed,
    AlreadyAbsent,
}

impl PermissionChange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::AlreadyPresent => "already-present",
            Self::Removed => "removed",
            Self::AlreadyAbsent => "already-absent",
        }
    }
}

pub fn grant(registry: &dyn LayerRegistry, grant: &PermissionGrant) -> Result<PermissionChange> {
    match registry.add_permission(grant) {
        Ok(()) => {
            info!(
                layer = %grant.layer_name,
                version = grant.version,
                statement = %grant.statement_id,
                "permission granted"
            );
            Ok(PermissionChange::Added)
        }
        Err(RegistryError::Conflict(_)) => {
            debug!(statement = %grant.statement_id, "permission already present");
            Ok(PermissionChange::AlreadyPresent)
        }
        Err(err) => Err(DeployError::from_registry("add layer permission", err).into()),
    }
}

/// Removes the statement the same grant would have created.
pub fn revoke(registry: &dyn LayerRegistry, grant: &PermissionGrant) -> Result<PermissionChange> {
    revoke_statement(registry, &grant.layer_name, grant.version, &grant.statement_id)
}

pub fn revoke_statement(
    registry: &dyn LayerRegistry,
    layer_name: &str,
    version: u64,
    statement_id: &str,
) -> Result<PermissionChange> {
    match registry.remove_permission(layer_name, version, statement_id) {
        Ok(()) => {
            info!(layer = layer_name, version, statement = statement_id, "permission revoked");
            Ok(PermissionChange::Removed)
        }
        Err(RegistryError::NotFound(_)) => {
            debug!(statement = statement_id, "permission already absent");
            Ok(PermissionChange::AlreadyAbsent)
        }
        Err(err) => Err(DeployError::from_registry("remove layer permission", err).into()),
    }
}

#[cfg(test)]
mod tests {
    use lamb_domain::LayerPermissionAction;
    use lamb_store::FaultKind;

    use super::*;
    use crate::registry::{MemoryLayerRegistry, PublishLayerRequest, RegistryOp};

    fn registry_with_version() -> MemoryLayerRegistry {
        let registry = MemoryLayerRegistry::new();
        registry
            .publish_layer_version(&PublishLayerRequest {
                layer_name: "shared".into(),
                storage_key: "lambda/layer/shared/x.zip".into(),
                description: String::new(),
                compatible_runtimes: Vec::new(),
            })
            .expect("publish");
        registry
    }

    fn org_grant() -> PermissionGrant {
        PermissionGrant::new(
            "shared",
            1,
            "*",
            LayerPermissionAction::GetLayerVersion,
            Some("o-abc123"),
        )
    }

    #[test]
    fn repeated_grant_leaves_one_statement() -> Result<()> {
        let registry = registry_with_version();
        assert_eq!(grant(&registry, &org_grant())?, PermissionChange::Added);
        assert_eq!(grant(&registry, &org_grant())?, PermissionChange::AlreadyPresent);
        assert_eq!(registry.list_permissions("shared", 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn revoke_twice_succeeds() -> Result<()> {
        let registry = registry_with_version();
        grant(&registry, &org_grant())?;
        assert_eq!(revoke(&registry, &org_grant())?, PermissionChange::Removed);
        assert_eq!(revoke(&registry, &org_grant())?, PermissionChange::AlreadyAbsent);
        assert!(registry.list_permissions("shared", 1)?.is_empty());
        Ok(())
    }

    #[test]
    fn explicit_statement_id_round_trips() -> Result<()> {
        let registry = registry_with_version();
        let named = org_grant().with_statement_id("share-with-org");
        assert_eq!(grant(&registry, &named)?, PermissionChange::Added);
        assert_eq!(grant(&registry, &named)?, PermissionChange::AlreadyPresent);
        assert_eq!(
            revoke(&registry, &org_grant())?,
            PermissionChange::AlreadyAbsent
        );
        assert_eq!(
            revoke_statement(&registry, "shared", 1, "share-with-org")?,
            PermissionChange::Removed
        );
        assert!(registry.list_permissions("shared", 1)?.is_empty());
        Ok(())
    }

    #[test]
    fn denied_grant_is_a_permission_error() {
        let registry = registry_with_version();
        registry.inject_faults(RegistryOp::AddPermission, FaultKind::AccessDenied, 1);
        let err = grant(&registry, &org_grant()).unwrap_err();
        assert_eq!(
            crate::error::deploy_error(&err).map(DeployError::code),
            Some("LMB300")
        );
    }
}
