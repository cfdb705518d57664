// Public operation surface used by the CLI and other crates. Each function
// takes its backends through `Effects` so callers can swap in local or
// in-memory implementations.

use std::path::PathBuf;

use anyhow::Result;
use lamb_domain::{
    ArtifactRecord, BuildContext, ContentDigest, IgnoreRules, LayerDeployment,
    LayerVersionRecord, PermissionGrant, SourceArtifactsDeployment, StorageLayout,
};

use crate::{
    builder::{self, BuiltArtifact},
    deployer::{Deployer, LayerDeployRequest, SourceDeployRequest},
    effects::Effects,
    hasher,
    permissions::{self, PermissionChange},
    publisher, resolver,
    resolver::SourceVersion,
    store::{ArtifactStore, ArtifactUpload, StoredArtifact},
};

/// Digest over `paths`; each root contributes its entries under its own name.
pub fn compute_digest_of_paths(paths: &[PathBuf], rules: &IgnoreRules) -> Result<ContentDigest> {
    hasher::digest_paths(paths, rules)
}

pub fn get_latest_layer_version(
    effects: &dyn Effects,
    layer_name: &str,
) -> Result<Option<LayerVersionRecord>> {
    resolver::latest_layer(effects.registry(), layer_name)
}

pub fn get_latest_source_version(
    effects: &dyn Effects,
    layout: &StorageLayout,
    name: &str,
) -> Result<Option<SourceVersion>> {
    resolver::latest_source(effects.storage(), layout, name)
}

#[must_use]
pub fn is_current_same_as_latest(current: &ContentDigest, latest: Option<&ContentDigest>) -> bool {
    resolver::unchanged(current, latest)
}

pub fn build_artifact(effects: &dyn Effects, context: &BuildContext) -> Result<BuiltArtifact> {
    builder::build(context, effects.runner())
}

pub fn upload_artifact(effects: &dyn Effects, upload: &ArtifactUpload<'_>) -> Result<StoredArtifact> {
    ArtifactStore::new(effects.storage()).put(upload)
}

pub fn publish_layer(
    effects: &dyn Effects,
    layer_name: &str,
    storage_key: &str,
    digest: &ContentDigest,
    compatible_runtimes: &[String],
) -> Result<LayerVersionRecord> {
    publisher::publish_layer(
        effects.registry(),
        layer_name,
        storage_key,
        digest,
        compatible_runtimes,
    )
}

pub fn deploy_layer(
    effects: &dyn Effects,
    layout: &StorageLayout,
    request: &LayerDeployRequest,
) -> Result<LayerDeployment> {
    Deployer::from_effects(effects, layout.clone()).deploy_layer(request)
}

pub fn deploy_source_artifacts(
    effects: &dyn Effects,
    layout: &StorageLayout,
    request: &SourceDeployRequest,
) -> Result<SourceArtifactsDeployment> {
    Deployer::from_effects(effects, layout.clone()).deploy_source(request)
}

pub fn grant_permission(effects: &dyn Effects, grant: &PermissionGrant) -> Result<PermissionChange> {
    permissions::grant(effects.registry(), grant)
}

pub fn revoke_permission(effects: &dyn Effects, grant: &PermissionGrant) -> Result<PermissionChange> {
    permissions::revoke(effects.registry(), grant)
}

pub fn revoke_statement(
    effects: &dyn Effects,
    layer_name: &str,
    version: u64,
    statement_id: &str,
) -> Result<PermissionChange> {
    permissions::revoke_statement(effects.registry(), layer_name, version, statement_id)
}

/// Downloads `key` and checks the archive against its recorded digest.
pub fn verify_artifact(effects: &dyn Effects, key: &str) -> Result<ArtifactRecord> {
    Ok(ArtifactStore::new(effects.storage()).fetch_verified(key)?.record)
}
