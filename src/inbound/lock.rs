//! Per-file locks
//!
//! Scanners of the same connector, or of several connectors sharing a lock
//! factory, lock every file before processing it so that concurrent poll
//! cycles never route the same file twice.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Default wait for a file lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Held file lock, released on drop
#[derive(Debug)]
pub struct FileLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl FileLockGuard {
    /// Key the lock was taken for
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Hands out exclusive locks keyed by name
#[async_trait]
pub trait LockFactory: Debug + Send + Sync {
    /// Try to lock `key`, giving up after `timeout`
    ///
    /// `None` means somebody else holds the lock.
    async fn try_lock(&self, key: &str, timeout: Duration) -> Option<FileLockGuard>;
}

/// Process-local lock factory
#[derive(Debug, Default)]
pub struct LocalLockFactory {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalLockFactory {
    /// Create an empty lock factory
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // forget locks nobody holds any more
        locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }
}

#[async_trait]
impl LockFactory for LocalLockFactory {
    async fn try_lock(&self, key: &str, timeout: Duration) -> Option<FileLockGuard> {
        let lock = self.lock_for(key);
        let guard = tokio::time::timeout(timeout, lock.lock_owned()).await.ok()?;
        Some(FileLockGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }
}
