//! Content-addressed archive upload and verified read-back.

use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use lamb_domain::{ArtifactRecord, ContentDigest, DIGEST_METADATA_KEY};
use lamb_store::{ObjectInfo, ObjectMetadata, ObjectStorage};
use serde::Serialize;
use tracing::{debug, info};

use crate::{hasher::digest_archive, DeployError};

const NAME_METADATA_KEY: &str = "artifact-name";
const VERSION_METADATA_KEY: &str = "artifact-version";

/// One archive to place at `key`.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactUpload<'a> {
    pub name: &'a str,
    pub version: Option<&'a str>,
    pub key: &'a str,
    pub digest: &'a ContentDigest,
    pub archive: &'a Path,
    /// Extra object metadata; the reserved fields always win.
    pub metadata: &'a ObjectMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub record: ArtifactRecord,
    /// `false` when an identical object was already present.
    pub uploaded: bool,
}

#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    pub record: ArtifactRecord,
    pub body: Vec<u8>,
}

pub struct ArtifactStore<'a> {
    storage: &'a dyn ObjectStorage,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(storage: &'a dyn ObjectStorage) -> Self {
        Self { storage }
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head(key)?.is_some())
    }

    /// Uploads the archive unless an object with the same digest already sits
    /// at the key. An object at the key recording a different digest is an
    /// integrity failure and is never overwritten.
    pub fn put(&self, upload: &ArtifactUpload<'_>) -> Result<StoredArtifact> {
        if let Some(existing) = self.head(upload.key)? {
            let recorded = recorded_digest(upload.key, &existing.metadata)?;
            if &recorded != upload.digest {
                return Err(DeployError::Integrity {
                    key: upload.key.to_string(),
                    reason: format!(
                        "stored object records digest {recorded}, expected {}",
                        upload.digest
                    ),
                }
                .into());
            }
            debug!(key = upload.key, "identical artifact already stored");
            return Ok(StoredArtifact {
                record: record_from(upload.name, &existing, recorded),
                uploaded: false,
            });
        }

        let body = fs::read(upload.archive)
            .with_context(|| format!("failed to read {}", upload.archive.display()))?;
        let actual = digest_archive(&body)
            .with_context(|| format!("failed to read archive {}", upload.archive.display()))?;
        if &actual != upload.digest {
            return Err(DeployError::Integrity {
                key: upload.key.to_string(),
                reason: format!(
                    "archive {} contains {actual}, expected {}",
                    upload.archive.display(),
                    upload.digest
                ),
            }
            .into());
        }

        let mut metadata = upload.metadata.clone();
        metadata.insert(DIGEST_METADATA_KEY.to_string(), upload.digest.to_string());
        metadata.insert(NAME_METADATA_KEY.to_string(), upload.name.to_string());
        if let Some(version) = upload.version {
            metadata.insert(VERSION_METADATA_KEY.to_string(), version.to_string());
        }
        self.storage
            .put_object(upload.key, &body, &metadata)
            .map_err(|err| DeployError::from_storage("upload artifact", err))?;
        info!(key = upload.key, bytes = body.len(), "artifact uploaded");

        let created_at = self.head(upload.key)?.and_then(|stored| stored.last_modified);
        Ok(StoredArtifact {
            record: ArtifactRecord {
                name: upload.name.to_string(),
                key: upload.key.to_string(),
                digest: upload.digest.clone(),
                size: body.len() as u64,
                created_at,
                version: upload.version.map(str::to_string),
            },
            uploaded: true,
        })
    }

    /// Downloads `key` and recomputes its digest from the archive entries.
    pub fn fetch_verified(&self, key: &str) -> Result<VerifiedArtifact> {
        let object = self
            .storage
            .get_object(key)
            .map_err(|err| DeployError::from_storage("fetch artifact", err))?;
        let recorded = recorded_digest(key, &object.info.metadata)?;
        let actual = digest_archive(&object.body).map_err(|err| DeployError::Integrity {
            key: key.to_string(),
            reason: format!("archive is unreadable: {err:#}"),
        })?;
        if actual != recorded {
            return Err(DeployError::Integrity {
                key: key.to_string(),
                reason: format!("content hashes to {actual}, metadata records {recorded}"),
            }
            .into());
        }
        let name = object
            .info
            .metadata
            .get(NAME_METADATA_KEY)
            .cloned()
            .unwrap_or_default();
        Ok(VerifiedArtifact {
            record: record_from(&name, &object.info, recorded),
            body: object.body,
        })
    }

    fn head(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.storage
            .head_object(key)
            .map_err(|err| anyhow!(DeployError::from_storage("check artifact", err)))
    }
}

fn recorded_digest(key: &str, metadata: &ObjectMetadata) -> Result<ContentDigest> {
    let raw = metadata.get(DIGEST_METADATA_KEY).ok_or_else(|| DeployError::Integrity {
        key: key.to_string(),
        reason: format!("metadata field {DIGEST_METADATA_KEY} is missing"),
    })?;
    raw.parse().map_err(|err| {
        anyhow!(DeployError::Integrity {
            key: key.to_string(),
            reason: format!("metadata field {DIGEST_METADATA_KEY} is invalid: {err}"),
        })
    })
}

fn record_from(name: &str, info: &ObjectInfo, digest: ContentDigest) -> ArtifactRecord {
    ArtifactRecord {
        name: name.to_string(),
        key: info.key.clone(),
        digest,
        size: info.size,
        created_at: info.last_modified.clone(),
        version: info.metadata.get(VERSION_METADATA_KEY).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use lamb_domain::{IgnoreRules, StorageLayout};
    use lamb_store::{MemoryObjectStorage, StorageOp};

    use super::*;
    use crate::{archive::write_archive, error::deploy_error, hasher::collect_files};

    struct Fixture {
        _temp: tempfile::TempDir,
        archive: std::path::PathBuf,
        digest: ContentDigest,
    }

    fn fixture(contents: &str) -> Result<Fixture> {
        let temp = tempfile::tempdir()?;
        let tree = temp.path().join("tree");
        fs::create_dir_all(&tree)?;
        fs::write(tree.join("handler.py"), contents)?;
        let entries = collect_files(&tree, &IgnoreRules::default())?;
        let digest = crate::hasher::digest_entries(&entries)?;
        let archive = temp.path().join("layer.zip");
        write_archive(&entries, &archive)?;
        Ok(Fixture {
            _temp: temp,
            archive,
            digest,
        })
    }

    fn upload<'a>(fx: &'a Fixture, key: &'a str, metadata: &'a ObjectMetadata) -> ArtifactUpload<'a> {
        ArtifactUpload {
            name: "mylayer",
            version: None,
            key,
            digest: &fx.digest,
            archive: &fx.archive,
            metadata,
        }
    }

    #[test]
    fn second_put_skips_transfer() -> Result<()> {
        let fx = fixture("print(1)")?;
        let storage = MemoryObjectStorage::new();
        let store = ArtifactStore::new(&storage);
        let key = StorageLayout::new("lambda").layer_key("mylayer", &fx.digest);
        let mut extra = ObjectMetadata::new();
        extra.insert("team".into(), "payments".into());

        let first = store.put(&upload(&fx, &key, &extra))?;
        let second = store.put(&upload(&fx, &key, &extra))?;
        assert!(first.uploaded);
        assert!(!second.uploaded);
        assert_eq!(first.record.digest, second.record.digest);
        assert_eq!(storage.calls(StorageOp::Put), 1);
        assert!(store.exists(&key)?);
        Ok(())
    }

    #[test]
    fn read_back_matches_uploaded_digest() -> Result<()> {
        let fx = fixture("print(2)")?;
        let storage = MemoryObjectStorage::new();
        let store = ArtifactStore::new(&storage);
        let key = StorageLayout::new("lambda").layer_key("mylayer", &fx.digest);
        store.put(&upload(&fx, &key, &ObjectMetadata::new()))?;

        let verified = store.fetch_verified(&key)?;
        assert_eq!(verified.record.digest, fx.digest);
        assert_eq!(verified.record.name, "mylayer");
        assert_eq!(verified.body, fs::read(&fx.archive)?);
        Ok(())
    }

    #[test]
    fn tampered_or_unlabelled_objects_fail_verification() -> Result<()> {
        let fx = fixture("print(3)")?;
        let other = fixture("print(4)")?;
        let storage = MemoryObjectStorage::new();
        let store = ArtifactStore::new(&storage);
        let key = StorageLayout::new("lambda").layer_key("mylayer", &fx.digest);
        store.put(&upload(&fx, &key, &ObjectMetadata::new()))?;

        assert!(storage.tamper(&key, &fs::read(&other.archive)?));
        let err = store.fetch_verified(&key).unwrap_err();
        assert_eq!(deploy_error(&err).map(DeployError::code), Some("LMB400"));

        assert!(storage.remove_metadata(&key, DIGEST_METADATA_KEY));
        let err = store.fetch_verified(&key).unwrap_err();
        assert_eq!(deploy_error(&err).map(DeployError::code), Some("LMB400"));

        let err = store.fetch_verified("lambda/layer/mylayer/absent.zip").unwrap_err();
        assert_eq!(deploy_error(&err).map(DeployError::code), Some("LMB401"));
        Ok(())
    }

    #[test]
    fn archive_must_match_claimed_digest() -> Result<()> {
        let fx = fixture("print(5)")?;
        let other = fixture("print(6)")?;
        let storage = MemoryObjectStorage::new();
        let store = ArtifactStore::new(&storage);
        let key = StorageLayout::new("lambda").layer_key("mylayer", &other.digest);
        let metadata = ObjectMetadata::new();
        let mismatched = ArtifactUpload {
            digest: &other.digest,
            ..upload(&fx, &key, &metadata)
        };
        let err = store.put(&mismatched).unwrap_err();
        assert_eq!(deploy_error(&err).map(DeployError::code), Some("LMB400"));
        assert!(storage.is_empty());
        Ok(())
    }
}
