#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Result};
use lamb_core::{
    CommandRunner, CustomEffects, LayerDeployRequest, MemoryLayerRegistry, RetryingRegistry,
    RunOutput, SourceDeployRequest,
};
use lamb_domain::{ArtifactKind, BuildContext, BuildStrategy, StorageLayout};
use lamb_store::{MemoryObjectStorage, ObjectMetadata, RetryPolicy, RetryingStorage};
use tempfile::TempDir;

pub struct NoTools;

impl CommandRunner for NoTools {
    fn run(&self, program: &str, _: &[String], _: &[(String, String)], _: &Path) -> Result<RunOutput> {
        bail!("{program} must not run during stage-and-zip builds")
    }
}

pub type TestEffects = CustomEffects<
    RetryingStorage<Arc<MemoryObjectStorage>>,
    RetryingRegistry<Arc<MemoryLayerRegistry>>,
    NoTools,
>;

/// In-memory backends plus handles to inspect them after a deploy.
pub struct Harness {
    pub storage: Arc<MemoryObjectStorage>,
    pub registry: Arc<MemoryLayerRegistry>,
    pub effects: TestEffects,
    pub layout: StorageLayout,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_attempts(3)
    }

    pub fn with_attempts(attempts: usize) -> Self {
        let storage = Arc::new(MemoryObjectStorage::new());
        let registry = Arc::new(MemoryLayerRegistry::new());
        let effects = CustomEffects {
            storage: RetryingStorage::new(Arc::clone(&storage), RetryPolicy::immediate(attempts)),
            registry: RetryingRegistry::new(Arc::clone(&registry), RetryPolicy::immediate(attempts)),
            runner: NoTools,
        };
        Self {
            storage,
            registry,
            effects,
            layout: StorageLayout::new("lambda"),
        }
    }
}

/// A small python package laid out like a layer's sources.
pub struct Project {
    pub temp: TempDir,
    pub package: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let package = temp.path().join("mylib");
        fs::create_dir_all(package.join("sub")).expect("package dir");
        fs::write(package.join("__init__.py"), "VERSION = 1\n").expect("init");
        fs::write(package.join("sub/util.py"), "def helper():\n    return 1\n").expect("util");
        Self { temp, package }
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.package.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn context(&self, kind: ArtifactKind) -> BuildContext {
        BuildContext::new(kind, self.temp.path().join("build"), BuildStrategy::StageAndZip)
            .with_sources([self.package.clone()])
    }

    pub fn layer_request(&self, layer_name: &str) -> LayerDeployRequest {
        LayerDeployRequest {
            layer_name: layer_name.to_string(),
            context: self.context(ArtifactKind::Layer),
            compatible_runtimes: vec!["python3.11".to_string()],
            metadata: ObjectMetadata::new(),
        }
    }

    pub fn source_request(&self, name: &str, version: Option<&str>) -> SourceDeployRequest {
        SourceDeployRequest {
            name: name.to_string(),
            version: version.map(str::to_string),
            context: self.context(ArtifactKind::Source),
            metadata: ObjectMetadata::new(),
        }
    }
}
