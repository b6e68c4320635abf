//! In-process document store.
//!
//! Used by tests and dry runs in place of a live MongoDB. Supports simulated
//! disconnection and per-collection read/write failures so partial-failure
//! paths can be exercised.

use super::{is_system_collection, DocumentStore};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use mongodb::bson::Document;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct MemoryStore {
    name: String,
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    connected: AtomicBool,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    failing_inserts: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collections: Mutex::new(BTreeMap::new()),
            connected: AtomicBool::new(true),
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            failing_inserts: Mutex::new(HashSet::new()),
        }
    }

    /// Create (or replace) a collection with the given documents
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        lock(&self.collections).insert(collection.to_string(), documents);
    }

    /// Snapshot of a collection's documents, `None` if it does not exist
    pub fn documents(&self, collection: &str) -> Option<Vec<Document>> {
        lock(&self.collections).get(collection).cloned()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every subsequent read of `collection` fail
    pub fn fail_reads(&self, collection: &str) {
        lock(&self.failing_reads).insert(collection.to_string());
    }

    /// Make every subsequent delete/insert on `collection` fail
    pub fn fail_writes(&self, collection: &str) {
        lock(&self.failing_writes).insert(collection.to_string());
    }

    /// Let deletes on `collection` succeed but make inserts fail
    pub fn fail_inserts(&self, collection: &str) {
        lock(&self.failing_inserts).insert(collection.to_string());
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackupError::Connection(format!(
                "not connected to database '{}'",
                self.name
            )))
        }
    }

    fn check_write(&self, collection: &str) -> Result<()> {
        self.check_connected()?;
        if lock(&self.failing_writes).contains(collection) {
            return Err(BackupError::collection(collection, "simulated write failure"));
        }
        Ok(())
    }
}

// A poisoned lock only means another test thread panicked mid-update; the
// map itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.check_connected()
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.check_connected()?;
        Ok(lock(&self.collections)
            .keys()
            .filter(|name| !is_system_collection(name))
            .cloned()
            .collect())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.check_connected()?;
        if lock(&self.failing_reads).contains(collection) {
            return Err(BackupError::collection(collection, "simulated read failure"));
        }
        Ok(lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        self.check_write(collection)?;
        let mut collections = lock(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        let deleted = docs.len() as u64;
        docs.clear();
        Ok(deleted)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<u64> {
        self.check_write(collection)?;
        if lock(&self.failing_inserts).contains(collection) {
            return Err(BackupError::collection(collection, "simulated insert failure"));
        }
        let inserted = documents.len() as u64;
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(inserted)
    }
}
