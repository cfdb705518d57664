use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::PathBuf,
};

use fs4::FileExt;
use lamb_domain::{LayerVersionRecord, PermissionGrant};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{check_layer_name, LayerRegistry, LayerState, PublishLayerRequest, RegistryError};

const ARN_PREFIX: &str = "arn:lamb:local";

/// Registry kept as one JSON document per layer under `root`. Every mutation
/// runs under an exclusive lock on `<layer>.lock` and replaces the document
/// atomically.
#[derive(Debug, Clone)]
pub struct LocalLayerRegistry {
    root: PathBuf,
}

struct StateLock {
    _file: File,
}

impl LocalLayerRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn state_path(&self, layer_name: &str) -> PathBuf {
        self.root.join(format!("{layer_name}.json"))
    }

    fn lock(&self, layer_name: &str) -> Result<StateLock, RegistryError> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(format!("{layer_name}.lock")))?;
        file.lock_exclusive()?;
        Ok(StateLock { _file: file })
    }

    fn load(&self, layer_name: &str) -> Result<LayerState, RegistryError> {
        let path = self.state_path(layer_name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LayerState::default())
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&contents).map_err(|err| RegistryError::Corrupt {
            layer: layer_name.to_string(),
            message: err.to_string(),
        })
    }

    fn store(&self, layer_name: &str, state: &LayerState) -> Result<(), RegistryError> {
        let encoded = serde_json::to_vec_pretty(state).map_err(|err| RegistryError::Corrupt {
            layer: layer_name.to_string(),
            message: err.to_string(),
        })?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.state_path(layer_name))
            .map_err(|err| RegistryError::Io(err.error))?;
        Ok(())
    }

    fn update<T>(
        &self,
        layer_name: &str,
        mutate: impl FnOnce(&mut LayerState) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        check_layer_name(layer_name)?;
        let _lock = self.lock(layer_name)?;
        let mut state = self.load(layer_name)?;
        let value = mutate(&mut state)?;
        self.store(layer_name, &state)?;
        Ok(value)
    }
}

impl LayerRegistry for LocalLayerRegistry {
    fn list_layer_versions(
        &self,
        layer_name: &str,
    ) -> Result<Vec<LayerVersionRecord>, RegistryError> {
        check_layer_name(layer_name)?;
        Ok(self.load(layer_name)?.records(layer_name, ARN_PREFIX))
    }

    fn publish_layer_version(
        &self,
        request: &PublishLayerRequest,
    ) -> Result<LayerVersionRecord, RegistryError> {
        let record = self.update(&request.layer_name, |state| {
            Ok(state.publish(request, ARN_PREFIX))
        })?;
        debug!(layer = %record.layer_name, version = record.version, "layer version recorded");
        Ok(record)
    }

    fn add_permission(&self, grant: &PermissionGrant) -> Result<(), RegistryError> {
        self.update(&grant.layer_name, |state| state.add_statement(grant))
    }

    fn remove_permission(
        &self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError> {
        self.update(layer_name, |state| {
            state.remove_statement(layer_name, version, statement_id)
        })
    }

    fn list_permissions(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError> {
        check_layer_name(layer_name)?;
        self.load(layer_name)?.statements(layer_name, version)
    }
}
