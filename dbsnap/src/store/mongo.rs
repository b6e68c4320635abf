//! MongoDB-backed store using the official async driver.

use super::{is_system_collection, DocumentStore};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Client, Collection, Database};
use tracing::info;

pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect and ping. The connection string must name a default database
    /// (`mongodb://host:27017/<database>`).
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| BackupError::Connection(e.to_string()))?;
        let db = client.default_database().ok_or_else(|| {
            BackupError::Config("connection string does not name a database".into())
        })?;

        let store = Self { client, db };
        store.ping().await?;
        info!(database = %store.db.name(), "Connected to MongoDB");
        Ok(store)
    }

    /// Close the driver's connection pool
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

/// Views can be read but not cleared or refilled, so they are not backed up.
fn plain_collections() -> Document {
    doc! { "type": { "$ne": "view" } }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| BackupError::Connection(e.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = self
            .db
            .list_collection_names()
            .filter(plain_collections())
            .await?;
        names.retain(|name| !is_system_collection(name));
        Ok(names)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        let cursor = self.collection(collection).find(doc! {}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_all(&self, collection: &str) -> Result<u64> {
        let result = self.collection(collection).delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }
        let result = self.collection(collection).insert_many(documents).await?;
        Ok(result.inserted_ids.len() as u64)
    }
}
