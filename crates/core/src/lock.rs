//! Lock providers — mutual exclusion keyed by resource name.
//!
//! The tool registry asks a [`LockProvider`] for a lock around any tool call
//! that names a resource (usually a file path). Locks are per key: two calls
//! on the same path serialize, calls on different paths never wait for each
//! other.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// A held lock. Dropping it releases the lock.
pub struct LockGuard {
    _inner: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wrap any RAII guard whose `Drop` releases the underlying lock.
    pub fn new(inner: impl Send + Sync + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LockGuard")
    }
}

/// A mutual-exclusion service keyed by an arbitrary string.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Wait until the lock for `key` is free and take it.
    async fn acquire(&self, key: &str) -> LockGuard;
}

/// In-process lock provider: one async mutex per key.
///
/// Entries are created on first use and kept for the provider's lifetime, so
/// the map grows with the number of distinct keys ever locked.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

#[async_trait]
impl LockProvider for KeyedLocks {
    async fn acquire(&self, key: &str) -> LockGuard {
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        trace!(key, "Lock acquired");
        LockGuard::new(guard)
    }
}
