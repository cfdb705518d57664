use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use lamb_domain::{LayerVersionRecord, PermissionGrant};
use lamb_store::FaultKind;

use super::{check_layer_name, LayerRegistry, LayerState, PublishLayerRequest, RegistryError};

const ARN_PREFIX: &str = "arn:lamb:memory";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    List,
    Publish,
    AddPermission,
    RemovePermission,
}

#[derive(Debug, Default)]
struct Inner {
    layers: BTreeMap<String, LayerState>,
    calls: HashMap<RegistryOp, usize>,
    faults: HashMap<RegistryOp, Vec<FaultKind>>,
}

/// In-process registry with call counters and scripted failures.
#[derive(Debug, Default)]
pub struct MemoryLayerRegistry {
    inner: Mutex<Inner>,
}

impl MemoryLayerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` calls of `op` fail with `kind`.
    pub fn inject_faults(&self, op: RegistryOp, kind: FaultKind, count: usize) {
        self.inner()
            .faults
            .entry(op)
            .or_default()
            .extend(std::iter::repeat(kind).take(count));
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.inner().layers.len()
    }

    #[must_use]
    pub fn calls(&self, op: RegistryOp) -> usize {
        self.inner().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: RegistryOp) -> Result<MutexGuard<'_, Inner>, RegistryError> {
        let mut inner = self.inner();
        *inner.calls.entry(op).or_default() += 1;
        let fault = inner
            .faults
            .get_mut(&op)
            .filter(|queue| !queue.is_empty())
            .map(|queue| queue.remove(0));
        match fault {
            Some(FaultKind::Transient) => Err(RegistryError::Throttled {
                operation: format!("{op:?}"),
                message: "rate exceeded".to_string(),
            }),
            Some(FaultKind::AccessDenied) => Err(RegistryError::AccessDenied(format!("{op:?}"))),
            None => Ok(inner),
        }
    }
}

impl LayerRegistry for MemoryLayerRegistry {
    fn list_layer_versions(
        &self,
        layer_name: &str,
    ) -> Result<Vec<LayerVersionRecord>, RegistryError> {
        check_layer_name(layer_name)?;
        let inner = self.enter(RegistryOp::List)?;
        Ok(inner
            .layers
            .get(layer_name)
            .map(|state| state.records(layer_name, ARN_PREFIX))
            .unwrap_or_default())
    }

    fn publish_layer_version(
        &self,
        request: &PublishLayerRequest,
    ) -> Result<LayerVersionRecord, RegistryError> {
        check_layer_name(&request.layer_name)?;
        let mut inner = self.enter(RegistryOp::Publish)?;
        Ok(inner
            .layers
            .entry(request.layer_name.clone())
            .or_default()
            .publish(request, ARN_PREFIX))
    }

    fn add_permission(&self, grant: &PermissionGrant) -> Result<(), RegistryError> {
        let mut inner = self.enter(RegistryOp::AddPermission)?;
        inner
            .layers
            .get_mut(&grant.layer_name)
            .ok_or_else(|| RegistryError::NotFound(format!("layer {}", grant.layer_name)))?
            .add_statement(grant)
    }

    fn remove_permission(
        &self,
        layer_name: &str,
        version: u64,
        statement_id: &str,
    ) -> Result<(), RegistryError> {
        let mut inner = self.enter(RegistryOp::RemovePermission)?;
        inner
            .layers
            .get_mut(layer_name)
            .ok_or_else(|| RegistryError::NotFound(format!("layer {layer_name}")))?
            .remove_statement(layer_name, version, statement_id)
    }

    fn list_permissions(
        &self,
        layer_name: &str,
        version: u64,
    ) -> Result<Vec<PermissionGrant>, RegistryError> {
        let inner = self.inner();
        inner
            .layers
            .get(layer_name)
            .ok_or_else(|| RegistryError::NotFound(format!("layer {layer_name}")))?
            .statements(layer_name, version)
    }
}
