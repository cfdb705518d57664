use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;

/// One archive stored under a content-addressed key. Never rewritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub key: String,
    pub digest: ContentDigest,
    pub size: u64,
    /// RFC 3339, as reported by the storage backend.
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A published layer version. The version number and ARN always come from the
/// registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerVersionRecord {
    pub layer_name: String,
    pub version: u64,
    pub arn: String,
    /// `None` when the version was published without an embedded digest.
    pub digest: Option<ContentDigest>,
    pub description: String,
    #[serde(default)]
    pub compatible_runtimes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDeployment {
    pub layer_name: String,
    pub layer_version: u64,
    pub layer_version_arn: String,
    pub storage_key: String,
    pub digest: ContentDigest,
    pub is_new: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceArtifactsDeployment {
    pub name: String,
    pub version: String,
    pub storage_key: String,
    pub digest: ContentDigest,
    pub is_new: bool,
}
