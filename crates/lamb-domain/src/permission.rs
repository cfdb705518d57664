use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const STATEMENT_HASH_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerPermissionAction {
    #[serde(rename = "lambda:GetLayerVersion")]
    GetLayerVersion,
    #[serde(rename = "lambda:ListLayerVersions")]
    ListLayerVersions,
}

impl LayerPermissionAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetLayerVersion => "lambda:GetLayerVersion",
            Self::ListLayerVersions => "lambda:ListLayerVersions",
        }
    }

    /// Action name without the service prefix, used in statement ids.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::GetLayerVersion => "GetLayerVersion",
            Self::ListLayerVersions => "ListLayerVersions",
        }
    }
}

impl Default for LayerPermissionAction {
    fn default() -> Self {
        Self::GetLayerVersion
    }
}

impl FromStr for LayerPermissionAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "lambda:GetLayerVersion" | "GetLayerVersion" => Ok(Self::GetLayerVersion),
            "lambda:ListLayerVersions" | "ListLayerVersions" => Ok(Self::ListLayerVersions),
            other => Err(format!("unknown layer permission action '{other}'")),
        }
    }
}

impl fmt::Display for LayerPermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub layer_name: String,
    pub version: u64,
    pub principal: String,
    pub action: LayerPermissionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub statement_id: String,
}

impl PermissionGrant {
    #[must_use]
    pub fn new(
        layer_name: &str,
        version: u64,
        principal: &str,
        action: LayerPermissionAction,
        organization_id: Option<&str>,
    ) -> Self {
        let statement_id =
            build_statement_id(layer_name, version, principal, action, organization_id);
        Self {
            layer_name: layer_name.to_string(),
            version,
            principal: principal.to_string(),
            action,
            organization_id: organization_id.map(ToString::to_string),
            statement_id,
        }
    }

    /// Uses a caller-chosen statement id instead of the derived one. Revoking
    /// it later needs the same id.
    #[must_use]
    pub fn with_statement_id(mut self, statement_id: &str) -> Self {
        self.statement_id = statement_id.trim().to_string();
        self
    }
}

/// Deterministic statement id for one grant. Same inputs, same id, so a
/// repeated grant collides with the existing statement and a revoke can find it
/// again without any local state.
#[must_use]
pub fn build_statement_id(
    layer_name: &str,
    version: u64,
    principal: &str,
    action: LayerPermissionAction,
    organization_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(layer_name.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(version.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(principal.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(action.as_str().as_bytes());
    hasher.update(b"\n");
    if let Some(org) = organization_id {
        hasher.update(org.trim().as_bytes());
    }
    let hash = hex::encode(hasher.finalize());
    format!("{}-{}", action.short_name(), &hash[..STATEMENT_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_id_is_stable_and_input_sensitive() {
        let base = build_statement_id(
            "layer",
            3,
            "123456789012",
            LayerPermissionAction::GetLayerVersion,
            None,
        );
        assert_eq!(
            base,
            build_statement_id(
                "layer",
                3,
                "123456789012",
                LayerPermissionAction::GetLayerVersion,
                None
            )
        );
        assert!(base.starts_with("GetLayerVersion-"));
        assert_eq!(base.len(), "GetLayerVersion-".len() + 16);

        let other_version = build_statement_id(
            "layer",
            4,
            "123456789012",
            LayerPermissionAction::GetLayerVersion,
            None,
        );
        let other_org = build_statement_id(
            "layer",
            3,
            "123456789012",
            LayerPermissionAction::GetLayerVersion,
            Some("o-abc"),
        );
        let other_action = build_statement_id(
            "layer",
            3,
            "123456789012",
            LayerPermissionAction::ListLayerVersions,
            None,
        );
        assert_ne!(base, other_version);
        assert_ne!(base, other_org);
        assert_ne!(base, other_action);
    }

    #[test]
    fn explicit_statement_id_replaces_derived_one() {
        let grant = PermissionGrant::new(
            "layer",
            2,
            "123456789012",
            LayerPermissionAction::GetLayerVersion,
            None,
        )
        .with_statement_id(" share-with-billing ");
        assert_eq!(grant.statement_id, "share-with-billing");
        assert_eq!(grant.principal, "123456789012");
    }

    #[test]
    fn statement_id_uses_only_safe_characters() {
        let id = build_statement_id(
            "layer",
            1,
            "arn:aws:iam::123456789012:root",
            LayerPermissionAction::GetLayerVersion,
            None,
        );
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn actions_parse_with_or_without_prefix() {
        assert_eq!(
            "lambda:ListLayerVersions".parse::<LayerPermissionAction>(),
            Ok(LayerPermissionAction::ListLayerVersions)
        );
        assert_eq!(
            "GetLayerVersion".parse::<LayerPermissionAction>(),
            Ok(LayerPermissionAction::GetLayerVersion)
        );
        assert!("lambda:InvokeFunction"
            .parse::<LayerPermissionAction>()
            .is_err());
    }
}
