use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lamb_domain::{StorageLayout, ToolPaths};
use lamb_store::RetryPolicy;
use serde::{Deserialize, Serialize};

const STORAGE_PATH_ENV: &str = "LAMB_STORAGE_PATH";
const REGISTRY_PATH_ENV: &str = "LAMB_REGISTRY_PATH";
const STORAGE_PREFIX_ENV: &str = "LAMB_STORAGE_PREFIX";
const RETRY_ATTEMPTS_ENV: &str = "LAMB_RETRY_ATTEMPTS";
const RETRY_BASE_MS_ENV: &str = "LAMB_RETRY_BASE_MS";
const PIP_ENV: &str = "LAMB_PIP";
const PYTHON_ENV: &str = "LAMB_PYTHON";
const POETRY_ENV: &str = "LAMB_POETRY";

const DEFAULT_STORAGE_PREFIX: &str = "lambda";
const HOME_DIR: &str = ".lamb";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the local object-storage bucket.
    pub storage_root: PathBuf,
    /// Directory holding the local layer registry state.
    pub registry_root: PathBuf,
    /// Key prefix every artifact is stored under.
    pub storage_prefix: String,
    pub retry: RetryPolicy,
    pub tools: ToolPaths,
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric setting is malformed or no home directory
    /// is available for the default paths.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let storage_root = match snapshot.var(STORAGE_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_home()?.join("bucket"),
        };
        let registry_root = match snapshot.var(REGISTRY_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_home()?.join("registry"),
        };
        let storage_prefix = snapshot
            .var(STORAGE_PREFIX_ENV)
            .unwrap_or(DEFAULT_STORAGE_PREFIX)
            .trim_matches('/')
            .to_string();

        let defaults = RetryPolicy::default();
        let attempts = parse_number(snapshot, RETRY_ATTEMPTS_ENV)?
            .map_or(defaults.attempts, |value| value as usize);
        let base_delay = parse_number(snapshot, RETRY_BASE_MS_ENV)?
            .map_or(defaults.base_delay, Duration::from_millis);

        let mut tools = ToolPaths::default();
        if let Some(pip) = snapshot.var(PIP_ENV) {
            tools.pip = PathBuf::from(pip);
        }
        if let Some(python) = snapshot.var(PYTHON_ENV) {
            tools.python = PathBuf::from(python);
        }
        if let Some(poetry) = snapshot.var(POETRY_ENV) {
            tools.poetry = PathBuf::from(poetry);
        }

        Ok(Self {
            storage_root,
            registry_root,
            storage_prefix,
            retry: RetryPolicy::new(attempts, base_delay),
            tools,
        })
    }

    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.storage_prefix)
    }
}

fn default_home() -> Result<PathBuf> {
    dirs_next::home_dir()
        .map(|home| home.join(HOME_DIR))
        .ok_or_else(|| anyhow!("home directory not found; set {STORAGE_PATH_ENV} and {REGISTRY_PATH_ENV}"))
}

fn parse_number(snapshot: &EnvSnapshot, key: &str) -> Result<Option<u64>> {
    snapshot
        .var(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn snapshot_values_override_defaults() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            (STORAGE_PATH_ENV, "/srv/bucket"),
            (REGISTRY_PATH_ENV, "/srv/registry"),
            (STORAGE_PREFIX_ENV, "/teams/payments/"),
            (RETRY_ATTEMPTS_ENV, "5"),
            (RETRY_BASE_MS_ENV, "0"),
            (PIP_ENV, "/opt/py/bin/pip"),
        ]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.storage_root, PathBuf::from("/srv/bucket"));
        assert_eq!(config.registry_root, PathBuf::from("/srv/registry"));
        assert_eq!(config.layout().layer_prefix(), "teams/payments/layer");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::ZERO);
        assert_eq!(config.tools.pip, PathBuf::from("/opt/py/bin/pip"));
        assert_eq!(config.tools.poetry, PathBuf::from("poetry"));
        Ok(())
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let snapshot = EnvSnapshot::testing(&[
            (STORAGE_PATH_ENV, "/srv/bucket"),
            (REGISTRY_PATH_ENV, "/srv/registry"),
            (RETRY_ATTEMPTS_ENV, "three"),
        ]);
        let err = Config::from_snapshot(&snapshot).unwrap_err();
        assert!(err.to_string().contains(RETRY_ATTEMPTS_ENV));
    }

    #[test]
    #[serial]
    fn from_env_reads_process_environment() -> Result<()> {
        let temp = tempfile::tempdir()?;
        env::set_var(STORAGE_PATH_ENV, temp.path().join("bucket"));
        env::set_var(REGISTRY_PATH_ENV, temp.path().join("registry"));
        env::remove_var(STORAGE_PREFIX_ENV);
        let config = Config::from_env();
        env::remove_var(STORAGE_PATH_ENV);
        env::remove_var(REGISTRY_PATH_ENV);

        let config = config?;
        assert_eq!(config.storage_root, temp.path().join("bucket"));
        assert_eq!(config.storage_prefix, DEFAULT_STORAGE_PREFIX);
        Ok(())
    }
}
