//! Shared data model for Lambda layer and source artifact deployments.

pub mod context;
pub mod digest;
pub mod keys;
pub mod permission;
pub mod records;
pub mod version;

pub use context::{
    ArtifactKind, BuildContext, BuildStrategy, IgnoreRules, ToolPaths, DEFAULT_RUNTIME_PACKAGES,
};
pub use digest::{ContentDigest, DigestError};
pub use keys::{
    artifact_key, digest_from_description, layer_description, validate_artifact_name, SourceKey,
    StorageLayout, DIGEST_METADATA_KEY,
};
pub use permission::{build_statement_id, LayerPermissionAction, PermissionGrant};
pub use records::{
    ArtifactRecord, LayerDeployment, LayerVersionRecord, SourceArtifactsDeployment,
};
pub use version::{next_auto_version, VersionToken, ZFILL};
