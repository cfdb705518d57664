//! Storage key conventions shared with previously deployed artifacts.
//!
//! ```text
//! {root}/layer/{layer_name}/{digest}.zip
//! {root}/source/{name}/{version}/{digest}.zip
//! ```

use anyhow::{bail, Result};

use crate::digest::ContentDigest;

/// Object metadata field holding the content digest.
pub const DIGEST_METADATA_KEY: &str = "sha256";

const LAYER_DIR: &str = "layer";
const SOURCE_DIR: &str = "source";
const ARCHIVE_EXT: &str = ".zip";
const DESCRIPTION_TAG: &str = "content-sha256:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageLayout {
    root: String,
}

impl StorageLayout {
    /// `root` is a key prefix such as `projects/demo/lambda`; surrounding
    /// slashes are ignored.
    #[must_use]
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn layer_prefix(&self) -> String {
        self.join(LAYER_DIR)
    }

    #[must_use]
    pub fn source_prefix(&self) -> String {
        self.join(SOURCE_DIR)
    }

    #[must_use]
    pub fn layer_key(&self, layer_name: &str, digest: &ContentDigest) -> String {
        artifact_key(&self.layer_prefix(), layer_name, digest)
    }

    #[must_use]
    pub fn source_key(&self, name: &str, version: &str, digest: &ContentDigest) -> String {
        artifact_key(&self.source_prefix(), &format!("{name}/{version}"), digest)
    }

    /// Listing prefix covering every stored version of a source artifact.
    #[must_use]
    pub fn source_listing_prefix(&self, name: &str) -> String {
        format!("{}/{name}/", self.source_prefix())
    }

    fn join(&self, segment: &str) -> String {
        if self.root.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{segment}", self.root)
        }
    }
}

/// `{prefix}/{artifact_name}/{digest}.zip`
#[must_use]
pub fn artifact_key(prefix: &str, artifact_name: &str, digest: &ContentDigest) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{artifact_name}/{digest}{ARCHIVE_EXT}")
    } else {
        format!("{prefix}/{artifact_name}/{digest}{ARCHIVE_EXT}")
    }
}

/// A stored source artifact key split back into its version token and digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceKey {
    pub key: String,
    pub version: String,
    pub digest: ContentDigest,
}

impl SourceKey {
    /// Parses `{listing_prefix}{version}/{digest}.zip`; anything else is `None`.
    #[must_use]
    pub fn parse(listing_prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(listing_prefix)?;
        let (version, file) = rest.split_once('/')?;
        if version.is_empty() || file.contains('/') {
            return None;
        }
        let digest = file.strip_suffix(ARCHIVE_EXT)?.parse().ok()?;
        Some(Self {
            key: key.to_string(),
            version: version.to_string(),
            digest,
        })
    }
}

/// Registry description for a published layer; carries the digest so later
/// runs can compare without downloading the archive.
#[must_use]
pub fn layer_description(digest: &ContentDigest) -> String {
    format!("{DESCRIPTION_TAG}{digest}")
}

#[must_use]
pub fn digest_from_description(description: &str) -> Option<ContentDigest> {
    description
        .split_whitespace()
        .find_map(|token| token.strip_prefix(DESCRIPTION_TAG))
        .and_then(|raw| raw.parse().ok())
}

/// Artifact and layer names end up inside storage keys and registry ids.
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("artifact name must not be empty");
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        bail!("artifact name {name:?} contains unsupported character {bad:?}");
    }
    if name.starts_with('.') {
        bail!("artifact name {name:?} must not start with '.'");
    }
    Ok(())
}
