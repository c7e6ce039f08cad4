use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use aquafarm_core::ServiceError;

/// Lock key serializing appends to one cycle's ledger.
pub fn cycle_key(cycle_id: &str) -> String {
    format!("cycle:{cycle_id}")
}

/// Lock key serializing cycle opens on one pond.
pub fn pond_key(pond_id: &str) -> String {
    format!("pond:{pond_id}")
}

/// Lock key serializing a pond's cycle-less ledger.
pub fn pond_level_key(pond_id: &str) -> String {
    format!("pond-level:{pond_id}")
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Keyed async mutexes with bounded waiting.
///
/// Entries are created on first use and dropped again when the last holder
/// or waiter lets go, so the map only tracks keys currently held or awaited.
pub struct LockRegistry {
    locks: Arc<LockMap>,
    timeout: Duration,
}

/// Held locks. Released on drop.
#[must_use]
pub struct LedgerLock {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<String>,
    locks: Arc<LockMap>,
}

impl fmt::Debug for LedgerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerLock")
            .field("keys", &self.keys)
            .field("held", &self.guards.len())
            .finish()
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        self.guards.clear();
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            // Only the map's own reference left: nobody holds or awaits it.
            if map.get(key).is_some_and(|h| Arc::strong_count(h) == 1) {
                map.remove(key);
            }
        }
    }
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(key.to_string()).or_default())
    }

    pub async fn acquire(&self, key: &str) -> Result<LedgerLock, ServiceError> {
        self.acquire_all(&[key]).await
    }

    /// Acquire several keys in sorted order so two callers locking the same
    /// pair can never deadlock. Duplicates are taken once.
    ///
    /// Fails with `Conflict` once the timeout elapses; locks taken so far are
    /// released.
    pub async fn acquire_all(&self, keys: &[&str]) -> Result<LedgerLock, ServiceError> {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut held = LedgerLock {
            guards: Vec::with_capacity(keys.len()),
            keys: Vec::with_capacity(keys.len()),
            locks: Arc::clone(&self.locks),
        };
        for key in keys {
            let handle = self.handle(key);
            held.keys.push(key.to_string());
            let acquired = tokio::time::timeout_at(deadline, handle.lock_owned()).await;
            match acquired {
                Ok(guard) => held.guards.push(guard),
                Err(_) => {
                    warn!("lock {key} not acquired within {:?}", self.timeout);
                    return Err(ServiceError::Conflict(format!(
                        "{key} is busy; retry later"
                    )));
                }
            }
        }
        Ok(held)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
