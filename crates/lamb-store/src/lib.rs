//! Object storage seam for content-addressed artifact archives.
//!
//! Everything above this crate talks to an [`ObjectStorage`]; the workspace
//! ships a directory-backed bucket ([`LocalObjectStorage`]) and an in-memory
//! one for tests ([`MemoryObjectStorage`]).

use std::{
    collections::BTreeMap,
    fs::File,
    io,
    path::Path,
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

mod local;
mod memory;
mod retry;

pub use local::LocalObjectStorage;
pub use memory::{FaultKind, MemoryObjectStorage, StorageOp};
pub use retry::{with_retry, RetryPolicy, Retryable, RetryingStorage};

/// User metadata attached to an object. Ordered so sidecars and logs are stable.
pub type ObjectMetadata = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {key} does not exist")]
    NotFound { key: String },
    #[error("access denied for {key}")]
    AccessDenied { key: String },
    #[error("{op} {key} failed transiently: {message}")]
    Transient {
        op: &'static str,
        key: String,
        message: String,
    },
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("metadata for {key} is unreadable: {message}")]
    CorruptMetadata { key: String, message: String },
    #[error("{op} {key} failed: {source}")]
    Io {
        op: &'static str,
        key: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Throttling, timeouts and interrupted transfers; safe to retry because
    /// every write is keyed by content.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn from_io(op: &'static str, key: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                key: key.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::AccessDenied {
                key: key.to_string(),
            },
            io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::Transient {
                    op,
                    key: key.to_string(),
                    message: err.to_string(),
                }
            }
            _ => Self::Io {
                op,
                key: key.to_string(),
                source: err,
            },
        }
    }
}

/// Listing / head result for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// RFC 3339.
    pub last_modified: Option<String>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: Vec<u8>,
}

/// Blocking object storage. Keys are `/`-separated and never start with `/`.
///
/// A `put_object` either stores the full body with its metadata or leaves no
/// visible object behind.
pub trait ObjectStorage: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError>;

    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;

    fn get_object(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// Every object whose key starts with `prefix`, sorted by key.
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;
}

impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        (**self).head_object(key)
    }

    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        (**self).put_object(key, body, metadata)
    }

    fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        (**self).get_object(key)
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        (**self).list_objects(prefix)
    }
}

/// Rejects keys that could escape a directory bucket or collide with its
/// bookkeeping.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("key must not start or end with '/'"));
    }
    if key.contains('\\') {
        return Err(invalid("key must use '/' separators"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("key contains an empty segment")),
            "." | ".." => return Err(invalid("key contains a relative segment")),
            _ => {}
        }
    }
    if key.split('/').next() == Some(local::META_DIR) {
        return Err(invalid("key uses a reserved prefix"));
    }
    Ok(())
}

pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn format_timestamp(at: SystemTime) -> Option<String> {
    OffsetDateTime::from(at)
        .format(&time::format_description::well_known::Rfc3339)
        .ok()
}
