use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    format_timestamp, validate_key, ObjectInfo, ObjectMetadata, ObjectStorage, StorageError,
    StoredObject,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Head,
    Put,
    Get,
    List,
}

impl StorageOp {
    fn label(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Put => "put",
            Self::Get => "get",
            Self::List => "list",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    AccessDenied,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    metadata: ObjectMetadata,
    last_modified: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, MemoryObject>,
    faults: HashMap<StorageOp, Vec<FaultKind>>,
    calls: HashMap<StorageOp, usize>,
}

/// In-process bucket with call counters and scripted failures.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    state: Mutex<State>,
}

impl MemoryObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` calls of `op` fail with `kind` before reaching the data.
    pub fn inject_faults(&self, op: StorageOp, kind: FaultKind, count: usize) {
        self.state()
            .faults
            .entry(op)
            .or_default()
            .extend(std::iter::repeat(kind).take(count));
    }

    /// Calls of `op` attempted so far, including failed ones.
    #[must_use]
    pub fn calls(&self, op: StorageOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Replaces an object's body in place, keeping its metadata.
    pub fn tamper(&self, key: &str, body: &[u8]) -> bool {
        match self.state().objects.get_mut(key) {
            Some(object) => {
                object.body = body.to_vec();
                true
            }
            None => false,
        }
    }

    pub fn remove_metadata(&self, key: &str, field: &str) -> bool {
        self.state()
            .objects
            .get_mut(key)
            .and_then(|object| object.metadata.remove(field))
            .is_some()
    }

    fn enter(&self, op: StorageOp, key: &str) -> Result<MutexGuard<'_, State>, StorageError> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        let fault = state
            .faults
            .get_mut(&op)
            .filter(|queue| !queue.is_empty())
            .map(|queue| queue.remove(0));
        match fault {
            Some(FaultKind::Transient) => Err(StorageError::Transient {
                op: op.label(),
                key: key.to_string(),
                message: "injected throttling".to_string(),
            }),
            Some(FaultKind::AccessDenied) => Err(StorageError::AccessDenied {
                key: key.to_string(),
            }),
            None => Ok(state),
        }
    }
}

fn info(key: &str, object: &MemoryObject) -> ObjectInfo {
    ObjectInfo {
        key: key.to_string(),
        size: object.body.len() as u64,
        last_modified: object.last_modified.clone(),
        metadata: object.metadata.clone(),
    }
}

impl ObjectStorage for MemoryObjectStorage {
    fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        validate_key(key)?;
        let state = self.enter(StorageOp::Head, key)?;
        Ok(state.objects.get(key).map(|object| info(key, object)))
    }

    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut state = self.enter(StorageOp::Put, key)?;
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                body: body.to_vec(),
                metadata: metadata.clone(),
                last_modified: format_timestamp(std::time::SystemTime::now()),
            },
        );
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;
        let state = self.enter(StorageOp::Get, key)?;
        let object = state.objects.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        Ok(StoredObject {
            info: info(key, object),
            body: object.body.clone(),
        })
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let state = self.enter(StorageOp::List, prefix)?;
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| info(key, object))
            .collect())
    }
}
