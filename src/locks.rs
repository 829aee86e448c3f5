use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per store, so clear/reset never race a generate run on the
/// same marker-tagged entities. Entries live only while someone holds or waits
/// for them.
#[derive(Clone, Default)]
pub struct StoreLocks {
    inner: Registry,
}

impl StoreLocks {
    /// Waits for exclusive access to `store`. The guard releases on drop.
    pub async fn lock_owned(&self, store: &str) -> StoreGuard {
        let entry = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(store.to_string()).or_default().clone()
        };
        StoreGuard {
            guard: Some(entry.lock_owned().await),
            store: store.to_string(),
            registry: self.inner.clone(),
        }
    }
}

/// Exclusive access to one store. Dropping the last guard or waiter for a store
/// removes its entry.
pub struct StoreGuard {
    guard: Option<OwnedMutexGuard<()>>,
    store: String,
    registry: Registry,
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // waiters hold a clone of the entry while they wait
        if map
            .get(&self.store)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.store);
        }
    }
}
