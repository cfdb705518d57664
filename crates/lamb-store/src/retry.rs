use std::{thread, time::Duration};

use tracing::warn;

use crate::{ObjectInfo, ObjectMetadata, ObjectStorage, StorageError, StoredObject};

const DEFAULT_ATTEMPTS: usize = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Errors that may clear up on their own.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Bounded exponential backoff: `base, 2*base, 4*base, ...` capped at `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// No sleeping between attempts; used by tests.
    #[must_use]
    pub fn immediate(attempts: usize) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned unchanged.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wraps a backend so every call goes through [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryingStorage<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ObjectStorage> RetryingStorage<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<S: ObjectStorage> ObjectStorage for RetryingStorage<S> {
    fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        with_retry(&self.policy, "head_object", || self.inner.head_object(key))
    }

    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        with_retry(&self.policy, "put_object", || {
            self.inner.put_object(key, body, metadata)
        })
    }

    fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        with_retry(&self.policy, "get_object", || self.inner.get_object(key))
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        with_retry(&self.policy, "list_objects", || {
            self.inner.list_objects(prefix)
        })
    }
}
