use anyhow::Result;
use lamb_domain::{layer_description, ContentDigest, LayerVersionRecord};
use tracing::info;

use crate::{
    registry::{LayerRegistry, PublishLayerRequest},
    resolver::unchanged,
    DeployError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishDecision {
    NoPriorVersion,
    /// The latest version already carries this digest.
    Unchanged(LayerVersionRecord),
    Changed(LayerVersionRecord),
}

impl PublishDecision {
    #[must_use]
    pub fn should_publish(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoPriorVersion => "no-prior-version",
            Self::Unchanged(_) => "unchanged",
            Self::Changed(_) => "changed",
        }
    }
}

/// Compares the latest published version with the freshly built digest. A
/// latest version without an embedded digest counts as changed.
#[must_use]
pub fn decide(latest: Option<LayerVersionRecord>, digest: &ContentDigest) -> PublishDecision {
    match latest {
        None => PublishDecision::NoPriorVersion,
        Some(record) if unchanged(digest, record.digest.as_ref()) => {
            PublishDecision::Unchanged(record)
        }
        Some(record) => PublishDecision::Changed(record),
    }
}

/// Publishes a new layer version pointing at an uploaded archive. The version
/// number comes from the registry.
pub fn publish_layer(
    registry: &dyn LayerRegistry,
    layer_name: &str,
    storage_key: &str,
    digest: &ContentDigest,
    compatible_runtimes: &[String],
) -> Result<LayerVersionRecord> {
    let request = PublishLayerRequest {
        layer_name: layer_name.to_string(),
        storage_key: storage_key.to_string(),
        description: layer_description(digest),
        compatible_runtimes: compatible_runtimes.to_vec(),
    };
    let record = registry
        .publish_layer_version(&request)
        .map_err(|err| DeployError::from_registry("publish layer version", err))?;
    info!(
        layer = layer_name,
        version = record.version,
        digest = digest.short(12),
        "layer version published"
    );
    Ok(record)
}
