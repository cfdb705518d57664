use std::sync::Arc;

use lamb_store::{LocalObjectStorage, ObjectStorage, RetryingStorage};

use crate::{
    config::Config,
    process::{CommandRunner, SystemRunner},
    registry::{LayerRegistry, LocalLayerRegistry, RetryingRegistry},
};

/// Side effects a deployment performs.
pub trait Effects: Send + Sync {
    fn storage(&self) -> &dyn ObjectStorage;
    fn registry(&self) -> &dyn LayerRegistry;
    fn runner(&self) -> &dyn CommandRunner;
}

pub struct SystemEffects {
    storage: Arc<RetryingStorage<LocalObjectStorage>>,
    registry: Arc<RetryingRegistry<LocalLayerRegistry>>,
    runner: Arc<SystemRunner>,
}

impl SystemEffects {
    /// Local directory backends wrapped in the configured retry policy.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage: Arc::new(RetryingStorage::new(
                LocalObjectStorage::new(&config.storage_root),
                config.retry,
            )),
            registry: Arc::new(RetryingRegistry::new(
                LocalLayerRegistry::new(&config.registry_root),
                config.retry,
            )),
            runner: Arc::new(SystemRunner),
        }
    }
}

impl Effects for SystemEffects {
    fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    fn registry(&self) -> &dyn LayerRegistry {
        self.registry.as_ref()
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
}

/// Caller-supplied backends, e.g. in-memory ones in tests.
pub struct CustomEffects<S, R, C> {
    pub storage: S,
    pub registry: R,
    pub runner: C,
}

impl<S, R, C> Effects for CustomEffects<S, R, C>
where
    S: ObjectStorage,
    R: LayerRegistry,
    C: CommandRunner,
{
    fn storage(&self) -> &dyn ObjectStorage {
        &self.storage
    }

    fn registry(&self) -> &dyn LayerRegistry {
        &self.registry
    }

    fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }
}
