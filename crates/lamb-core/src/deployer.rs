//! End-to-end deployment: build, compare with the latest deployed digest,
//! upload, publish.
//!
//! Every step is fail-fast. A run that uploads and then fails to publish leaves
//! the archive under its content-addressed key, and the next run reuses it.

use anyhow::{anyhow, bail, Result};
use lamb_domain::{
    next_auto_version, validate_artifact_name, ArtifactKind, BuildContext, LayerDeployment,
    SourceArtifactsDeployment, StorageLayout, VersionToken,
};
use lamb_store::{ObjectMetadata, ObjectStorage};
use tracing::info;

use crate::{
    builder::{build, BuiltArtifact},
    effects::Effects,
    process::CommandRunner,
    publisher::{decide, publish_layer, PublishDecision},
    registry::LayerRegistry,
    resolver::{latest_layer, latest_source, unchanged},
    store::{ArtifactStore, ArtifactUpload},
    DeployError,
};

#[derive(Debug, Clone)]
pub struct LayerDeployRequest {
    pub layer_name: String,
    pub context: BuildContext,
    pub compatible_runtimes: Vec<String>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct SourceDeployRequest {
    pub name: String,
    /// Explicit version token; `None` continues the zero-padded counter.
    pub version: Option<String>,
    pub context: BuildContext,
    pub metadata: ObjectMetadata,
}

pub struct Deployer<'a> {
    storage: &'a dyn ObjectStorage,
    registry: &'a dyn LayerRegistry,
    runner: &'a dyn CommandRunner,
    layout: StorageLayout,
}

impl<'a> Deployer<'a> {
    pub fn new(
        storage: &'a dyn ObjectStorage,
        registry: &'a dyn LayerRegistry,
        runner: &'a dyn CommandRunner,
        layout: StorageLayout,
    ) -> Self {
        Self {
            storage,
            registry,
            runner,
            layout,
        }
    }

    pub fn from_effects(effects: &'a dyn Effects, layout: StorageLayout) -> Self {
        Self::new(effects.storage(), effects.registry(), effects.runner(), layout)
    }

    pub fn deploy_layer(&self, request: &LayerDeployRequest) -> Result<LayerDeployment> {
        let name = request.layer_name.as_str();
        check_name(name)?;
        check_kind(&request.context, ArtifactKind::Layer)?;

        let built = self.build(&request.context)?;
        let key = self.layout.layer_key(name, &built.digest);
        let latest = latest_layer(self.registry, name)?;
        let decision = decide(latest, &built.digest);
        info!(layer = name, decision = decision.label(), "compared with latest layer version");

        if let PublishDecision::Unchanged(record) = decision {
            return Ok(LayerDeployment {
                layer_name: name.to_string(),
                layer_version: record.version,
                layer_version_arn: record.arn,
                storage_key: key,
                digest: built.digest,
                is_new: false,
            });
        }

        ArtifactStore::new(self.storage).put(&ArtifactUpload {
            name,
            version: None,
            key: &key,
            digest: &built.digest,
            archive: &built.archive_path,
            metadata: &request.metadata,
        })?;
        let record = publish_layer(
            self.registry,
            name,
            &key,
            &built.digest,
            &request.compatible_runtimes,
        )?;
        Ok(LayerDeployment {
            layer_name: name.to_string(),
            layer_version: record.version,
            layer_version_arn: record.arn,
            storage_key: key,
            digest: built.digest,
            is_new: true,
        })
    }

    /// Deploys a source artifact under `{root}/source/{name}/{version}/`.
    ///
    /// Unchanged content returns the latest stored version untouched. Changed
    /// content needs a version above the latest one; an explicit version that
    /// is not is a [`DeployError::VersionConflict`].
    pub fn deploy_source(&self, request: &SourceDeployRequest) -> Result<SourceArtifactsDeployment> {
        let name = request.name.as_str();
        check_name(name)?;
        check_kind(&request.context, ArtifactKind::Source)?;

        let built = self.build(&request.context)?;
        let latest = latest_source(self.storage, &self.layout, name)?;
        if let Some(latest) = &latest {
            if unchanged(&built.digest, Some(&latest.digest)) {
                info!(source = name, version = %latest.version, "source artifact unchanged");
                return Ok(SourceArtifactsDeployment {
                    name: name.to_string(),
                    version: latest.version.clone(),
                    storage_key: latest.key.clone(),
                    digest: built.digest,
                    is_new: false,
                });
            }
        }

        let latest_token = latest.as_ref().map(|latest| VersionToken::new(&latest.version));
        let version = match &request.version {
            Some(requested) => {
                check_version(requested)?;
                if let Some(latest) = &latest_token {
                    if VersionToken::new(requested) <= *latest {
                        bail!(DeployError::VersionConflict {
                            name: name.to_string(),
                            requested: requested.trim().to_string(),
                            latest: latest.to_string(),
                        });
                    }
                }
                requested.trim().to_string()
            }
            None => next_auto_version(latest_token.as_ref()).ok_or_else(|| {
                anyhow!(DeployError::InvalidInput(format!(
                    "latest version of {name} is {}, which is not a counter; pass --version",
                    latest_token
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                )))
            })?,
        };

        let key = self.layout.source_key(name, &version, &built.digest);
        ArtifactStore::new(self.storage).put(&ArtifactUpload {
            name,
            version: Some(version.as_str()),
            key: &key,
            digest: &built.digest,
            archive: &built.archive_path,
            metadata: &request.metadata,
        })?;
        info!(source = name, version = %version, key = %key, "source artifact deployed");
        Ok(SourceArtifactsDeployment {
            name: name.to_string(),
            version,
            storage_key: key,
            digest: built.digest,
            is_new: true,
        })
    }

    fn build(&self, context: &BuildContext) -> Result<BuiltArtifact> {
        build(context, self.runner)
    }
}

fn check_name(name: &str) -> Result<()> {
    validate_artifact_name(name).map_err(|err| anyhow!(DeployError::InvalidInput(err.to_string())))
}

fn check_kind(context: &BuildContext, expected: ArtifactKind) -> Result<()> {
    if context.kind == expected {
        Ok(())
    } else {
        bail!(DeployError::InvalidInput(format!(
            "build context produces a {} artifact, expected {}",
            context.kind.as_str(),
            expected.as_str()
        )))
    }
}

/// Version tokens become one key segment.
fn check_version(version: &str) -> Result<()> {
    validate_artifact_name(version.trim())
        .map_err(|err| anyhow!(DeployError::InvalidInput(format!("invalid version: {err}"))))
}
