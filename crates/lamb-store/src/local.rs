use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::{
    format_timestamp, validate_key, ObjectInfo, ObjectMetadata, ObjectStorage, StorageError,
    StoredObject,
};

pub(crate) const META_DIR: &str = ".lamb-meta";
const TEMP_PREFIX: &str = ".tmp";

/// A directory used as a bucket. Object `a/b.zip` lives at `<root>/a/b.zip`,
/// its metadata at `<root>/.lamb-meta/a/b.zip.json`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    metadata: ObjectMetadata,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        let mut path = key
            .split('/')
            .fold(self.root.join(META_DIR), |path, segment| path.join(segment))
            .into_os_string();
        path.push(".json");
        PathBuf::from(path)
    }

    fn read_sidecar(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let path = self.sidecar_path(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ObjectMetadata::new())
            }
            Err(err) => return Err(StorageError::from_io("head", key, err)),
        };
        let sidecar: Sidecar =
            serde_json::from_str(&contents).map_err(|err| StorageError::CorruptMetadata {
                key: key.to_string(),
                message: err.to_string(),
            })?;
        Ok(sidecar.metadata)
    }

    fn info_for(&self, key: &str, path: &Path) -> Result<Option<ObjectInfo>, StorageError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::from_io("head", key, err)),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            last_modified: meta.modified().ok().and_then(format_timestamp),
            metadata: self.read_sidecar(key)?,
        }))
    }
}

fn write_atomic(path: &Path, bytes: &[u8], key: &str) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| StorageError::from_io("put", key, err))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|err| StorageError::from_io("put", key, err))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| StorageError::from_io("put", key, err))?;
    persist(tmp, path, key)
}

fn persist(tmp: NamedTempFile, path: &Path, key: &str) -> Result<(), StorageError> {
    tmp.persist(path)
        .map(|_| ())
        .map_err(|err| StorageError::from_io("put", key, err.error))
}

impl ObjectStorage for LocalObjectStorage {
    fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        validate_key(key)?;
        self.info_for(key, &self.object_path(key))
    }

    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        // The sidecar lands first: a visible object always has its metadata.
        let sidecar = Sidecar {
            metadata: metadata.clone(),
        };
        let encoded =
            serde_json::to_vec_pretty(&sidecar).map_err(|err| StorageError::CorruptMetadata {
                key: key.to_string(),
                message: err.to_string(),
            })?;
        write_atomic(&self.sidecar_path(key), &encoded, key)?;
        write_atomic(&self.object_path(key), body, key)?;
        debug!(key, bytes = body.len(), "stored object");
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let path = self.object_path(key);
        let body = fs::read(&path).map_err(|err| StorageError::from_io("get", key, err))?;
        let info = self
            .info_for(key, &path)?
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        Ok(StoredObject { info, body })
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut objects = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != META_DIR);
        for entry in walker {
            let entry = entry.map_err(|err| {
                let io = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                StorageError::from_io("list", prefix, io)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(TEMP_PREFIX)
            {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(info) = self.info_for(&key, entry.path())? {
                objects.push(info);
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
