//! Looks up what was deployed last. Always asks the backends; nothing here is
//! cached between runs.

use anyhow::Result;
use lamb_domain::{ContentDigest, LayerVersionRecord, SourceKey, StorageLayout, VersionToken};
use lamb_store::ObjectStorage;
use serde::Serialize;
use tracing::debug;

use crate::{registry::LayerRegistry, DeployError};

/// Latest stored version of a source artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceVersion {
    pub version: String,
    pub digest: ContentDigest,
    pub key: String,
}

/// Highest published version of `layer_name`, or `None` when it was never
/// published.
pub fn latest_layer(
    registry: &dyn LayerRegistry,
    layer_name: &str,
) -> Result<Option<LayerVersionRecord>> {
    let versions = registry
        .list_layer_versions(layer_name)
        .map_err(|err| DeployError::from_registry("list layer versions", err))?;
    let latest = versions.into_iter().max_by_key(|record| record.version);
    match &latest {
        Some(record) => debug!(
            layer = layer_name,
            version = record.version,
            has_digest = record.digest.is_some(),
            "latest layer version"
        ),
        None => debug!(layer = layer_name, "layer has no published versions"),
    }
    Ok(latest)
}

/// Highest stored version of source artifact `name`. Keys under the listing
/// prefix that do not look like `{version}/{digest}.zip` are skipped.
pub fn latest_source(
    storage: &dyn ObjectStorage,
    layout: &StorageLayout,
    name: &str,
) -> Result<Option<SourceVersion>> {
    let prefix = layout.source_listing_prefix(name);
    let objects = storage
        .list_objects(&prefix)
        .map_err(|err| DeployError::from_storage("list source artifacts", err))?;

    let mut latest: Option<(VersionToken, SourceKey)> = None;
    for object in objects {
        let Some(parsed) = SourceKey::parse(&prefix, &object.key) else {
            debug!(key = %object.key, "skipping unrecognized key");
            continue;
        };
        let token = VersionToken::new(&parsed.version);
        if latest.as_ref().map_or(true, |(best, _)| token > *best) {
            latest = Some((token, parsed));
        }
    }
    Ok(latest.map(|(_, parsed)| SourceVersion {
        version: parsed.version,
        digest: parsed.digest,
        key: parsed.key,
    }))
}

/// Strict equality; a missing latest digest always counts as changed.
#[must_use]
pub fn unchanged(current: &ContentDigest, latest: Option<&ContentDigest>) -> bool {
    latest.is_some_and(|latest| latest == current)
}
