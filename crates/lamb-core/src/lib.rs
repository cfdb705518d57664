mod archive;
mod builder;
mod config;
mod deployer;
mod diagnostics;
mod effects;
mod error;
mod hasher;
mod lock;
mod outcome;
mod permissions;
mod process;
mod publisher;
mod registry;
mod resolver;
mod store;

pub mod api;

pub use crate::api::{
    build_artifact, compute_digest_of_paths, deploy_layer, deploy_source_artifacts,
    get_latest_layer_version, get_latest_source_version, grant_permission,
    is_current_same_as_latest, publish_layer, revoke_permission, revoke_statement,
    upload_artifact, verify_artifact,
};
pub use crate::archive::write_archive;
pub use crate::builder::{build, BuiltArtifact};
pub use crate::config::{Config, GlobalOptions};
pub use crate::deployer::{Deployer, LayerDeployRequest, SourceDeployRequest};
pub use crate::diagnostics::{codes, commands as diag_commands};
pub use crate::effects::{CustomEffects, Effects, SystemEffects};
pub use crate::error::{deploy_error, DeployError};
pub use crate::hasher::{collect_files, digest_archive, digest_entries, digest_paths, digest_tree, TreeEntry};
pub use crate::outcome::{format_status_message, to_json_response, CommandStatus, ExecutionOutcome};
pub use crate::permissions::PermissionChange;
pub use crate::process::{run_command, CommandRunner, RunOutput, SystemRunner};
pub use crate::publisher::{decide, PublishDecision};
pub use crate::registry::{
    layer_version_arn, LayerRegistry, LocalLayerRegistry, MemoryLayerRegistry,
    PublishLayerRequest, RegistryError, RegistryOp, RetryingRegistry,
};
pub use crate::resolver::SourceVersion;
pub use crate::store::{ArtifactStore, ArtifactUpload, StoredArtifact, VerifiedArtifact};
