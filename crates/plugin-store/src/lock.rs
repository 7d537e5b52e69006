//! Per-key async mutual exclusion with FIFO handoff.
//!
//! Mutations of a plugin are serialized by taking the lock keyed by its id.
//! Operations on distinct keys run concurrently; operations on the same key
//! run strictly in arrival order.
//!
//! A released lock is handed directly to the oldest live waiter instead of
//! being made available to whoever polls first. Waiters whose futures are
//! dropped while queued are skipped, and a waiter dropped after it was
//! handed the lock passes it on.
//!
//! # Examples
//!
//! ```
//! use plugin_store::LockRegistry;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let locks = LockRegistry::new();
//!
//! let value = locks.with_lock("my-plugin", || async { 42 }).await;
//! assert_eq!(value, 42);
//! assert!(!locks.is_locked("my-plugin"));
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Debug, Default)]
struct LockEntry {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Registry of named async locks.
///
/// Cloning is cheap and yields a handle to the same lock table. Entries are
/// created on first use of a key and live as long as the registry.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    entries: Arc<Mutex<HashMap<String, LockEntry>>>,
}

impl LockRegistry {
    /// Creates an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, waiting behind earlier callers.
    ///
    /// The lock is held until the returned guard is released or dropped.
    pub async fn acquire(&self, key: &str) -> PathLockGuard {
        loop {
            let Some(rx) = self.take_or_enqueue(key) else {
                trace!("Lock acquired immediately: {key}");
                return PathLockGuard::new(self.clone(), key);
            };

            let mut pending = PendingAcquire {
                registry: self.clone(),
                key: key.to_string(),
                rx,
                granted: false,
            };

            if pending.wait().await {
                trace!("Lock handed over: {key}");
                return PathLockGuard::new(self.clone(), key);
            }
        }
    }

    /// Runs `op` while holding the lock for `key`.
    ///
    /// The lock is released on every exit path, including panics and
    /// cancellation of the returned future.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire(key).await;
        let output = op().await;
        guard.release();
        output
    }

    /// Returns `true` if `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.table().get(key).is_some_and(|entry| entry.locked)
    }

    /// Number of live waiters queued on `key`.
    #[must_use]
    pub fn queued(&self, key: &str) -> usize {
        self.table().get(key).map_or(0, |entry| {
            entry.waiters.iter().filter(|tx| !tx.is_closed()).count()
        })
    }

    /// Number of keys ever used with this registry.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.table().len()
    }

    /// Takes the lock if free, otherwise enqueues a waiter and returns its
    /// receiving half.
    fn take_or_enqueue(&self, key: &str) -> Option<oneshot::Receiver<()>> {
        let mut table = self.table();
        let entry = table.entry(key.to_string()).or_default();

        if entry.locked {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push_back(tx);
            Some(rx)
        } else {
            entry.locked = true;
            None
        }
    }

    /// Hands the lock for `key` to the next live waiter, or frees it.
    fn release_key(&self, key: &str) {
        let mut table = self.table();
        let Some(entry) = table.get_mut(key) else {
            return;
        };

        while let Some(waiter) = entry.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }

        entry.locked = false;
        trace!("Lock released: {key}");
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queued acquisition. Passes the lock on if dropped after being granted.
struct PendingAcquire {
    registry: LockRegistry,
    key: String,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl PendingAcquire {
    /// Waits for the handoff. Returns `false` if the sender vanished without
    /// granting the lock.
    async fn wait(&mut self) -> bool {
        self.granted = (&mut self.rx).await.is_ok();
        self.granted
    }
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            trace!("Waiter dropped after handoff, passing lock on: {}", self.key);
            self.registry.release_key(&self.key);
        }
    }
}

/// Guard holding a named lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct PathLockGuard {
    registry: LockRegistry,
    key: String,
    released: bool,
}

impl PathLockGuard {
    fn new(registry: LockRegistry, key: &str) -> Self {
        Self {
            registry,
            key: key.to_string(),
            released: false,
        }
    }

    /// Key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock, handing it to the next waiter.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release_key(&self.key);
        }
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
