use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key population locks.
///
/// The first request for a key takes the lock and goes upstream; the others
/// wait on it and then re-read the cache. A lock is removed from the map
/// when its last holder lets go.
#[derive(Default)]
pub struct InFlight {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request is populating `key`
    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.clone().lock_owned().await;

        FlightGuard {
            owner: self,
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of keys currently being populated or waited on
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while a request populates one key
pub struct FlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Release first so the next waiter can proceed
        self.guard.take();

        let mut locks = self.owner.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = locks.get(&self.key) {
            // Only the map and this guard still reference the lock
            if Arc::ptr_eq(current, &self.lock) && Arc::strong_count(&self.lock) == 2 {
                locks.remove(&self.key);
            }
        }
    }
}
