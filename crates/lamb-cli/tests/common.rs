#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;

/// A scratch project with its own bucket and registry directories.
pub struct Sandbox {
    temp: TempDir,
}

impl Sandbox {
    pub fn new(prefix: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        fs::create_dir_all(temp.path().join("project/src/mylib")).expect("project dir");
        Self { temp }
    }

    pub fn project(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn bucket(&self) -> PathBuf {
        self.temp.path().join("bucket")
    }

    pub fn registry(&self) -> PathBuf {
        self.temp.path().join("registry")
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.project().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn lamb(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("lamb");
        cmd.current_dir(self.project())
            .env("LAMB_STORAGE_PATH", self.bucket())
            .env("LAMB_REGISTRY_PATH", self.registry())
            .env("LAMB_RETRY_BASE_MS", "1")
            .env("NO_COLOR", "1")
            .env_remove("LAMB_STORAGE_PREFIX");
        cmd
    }

    /// Runs `lamb --json <args>` and returns the parsed envelope.
    pub fn json(&self, args: &[&str]) -> (Assert, Value) {
        let assert = self.lamb().arg("--json").args(args).assert();
        let payload = parse_json(&assert);
        (assert, payload)
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    serde_json::from_str(stdout.trim()).unwrap_or_else(|err| panic!("invalid json {stdout:?}: {err}"))
}

pub fn bucket_objects(root: &Path) -> Vec<String> {
    let mut found = Vec::new();
    collect(root, root, &mut found);
    found.sort();
    found
}

fn collect(root: &Path, dir: &Path, found: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, found);
        } else if path.extension().is_some_and(|ext| ext == "zip") {
            let rel = path.strip_prefix(root).expect("under root");
            found.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}
