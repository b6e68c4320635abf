//! Per-database mutual exclusion for export, restore and retention.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct DatabaseLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DatabaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, database: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(database.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `database`
    pub async fn acquire(&self, database: &str) -> OwnedMutexGuard<()> {
        self.lock_for(database).await.lock_owned().await
    }

    /// Exclusive access to `database`, or `None` if an operation holds it
    pub async fn try_acquire(&self, database: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(database).await.try_lock_owned().ok()
    }

    pub async fn is_busy(&self, database: &str) -> bool {
        self.lock_for(database).await.try_lock().is_err()
    }
}
