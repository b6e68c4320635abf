//! Document store abstraction the exporter and restore loader run against.
//!
//! Callers pass a connected handle in explicitly; nothing here reaches for
//! process-wide connection state.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::utils::errors::Result;
use async_trait::async_trait;
use mongodb::bson::Document;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this handle is bound to
    fn database_name(&self) -> &str;

    /// Liveness check; fails with `BackupError::Connection`
    async fn ping(&self) -> Result<()>;

    /// User collections (`system.*` excluded)
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Every document of a collection, fully materialized
    async fn find_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Delete every document of a collection, returning the count
    async fn delete_all(&self, collection: &str) -> Result<u64>;

    /// Insert documents in bulk, returning the count
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<u64>;
}

pub(crate) fn is_system_collection(name: &str) -> bool {
    name.starts_with("system.")
}
