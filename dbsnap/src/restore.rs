//! Restore loader: replace live collections with an archive's contents.
//!
//! Everything that can reject the archive (missing file, bad gzip, bad JSON,
//! bad tags) happens before the first deletion. Replacement is all-or-nothing
//! per collection only: the store has no cross-collection transaction, and a
//! crash between one collection's delete and its insert leaves that
//! collection empty. Documents are fully decoded up front to keep that window
//! as short as a single `insert_many`.

use crate::archive::{read_archive, ArchiveMetadata};
use crate::store::DocumentStore;
use crate::utils::errors::{BackupError, Result};
use mongodb::bson::Document;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Operator checkpoint between reading the archive and touching live data.
pub enum RestoreGate {
    /// Proceed immediately
    Immediate,
    /// Wait, cancellable with Ctrl+C
    Delay(Duration),
    /// Ask; `false` cancels the restore
    Confirm(Box<dyn Fn(&ArchiveMetadata, usize) -> bool + Send + Sync>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionFailure {
    pub collection: String,
    pub error: String,
    /// Live documents were deleted before the insert failed
    pub cleared: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub collections_restored: usize,
    pub documents_restored: u64,
    /// Archived as empty; live data left untouched
    pub collections_skipped: usize,
    pub collections_failed: usize,
    pub failures: Vec<CollectionFailure>,
    pub duration_ms: u64,
}

impl RestoreResult {
    fn record_failure(&mut self, collection: String, err: &BackupError, cleared: bool) {
        self.collections_failed += 1;
        self.failures.push(CollectionFailure {
            collection,
            error: err.to_string(),
            cleared,
        });
    }
}

impl RestoreGate {
    async fn pass(&self, metadata: &ArchiveMetadata, documents: usize) -> Result<()> {
        match self {
            RestoreGate::Immediate => Ok(()),
            RestoreGate::Delay(delay) => {
                warn!(
                    "Restore will overwrite live collections in {}s, press Ctrl+C to cancel",
                    delay.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(()),
                    _ = tokio::signal::ctrl_c() => Err(BackupError::Cancelled),
                }
            }
            RestoreGate::Confirm(confirm) => {
                if confirm(metadata, documents) {
                    Ok(())
                } else {
                    Err(BackupError::Cancelled)
                }
            }
        }
    }
}

/// Restore the archive at `path` into `store`.
pub async fn run_restore(
    store: &dyn DocumentStore,
    path: &Path,
    gate: &RestoreGate,
) -> Result<RestoreResult> {
    let start = Instant::now();

    info!(file = %path.display(), "Reading backup archive");
    let archive = read_archive(path).await?;
    let documents = archive.document_count();

    info!(
        database = %archive.metadata.database,
        created_at = %archive.metadata.created_at.to_rfc3339(),
        collections = archive.metadata.collection_count,
        documents,
        target = %store.database_name(),
        "Archive loaded"
    );

    gate.pass(&archive.metadata, documents).await?;
    store.ping().await?;

    let mut result = RestoreResult::default();
    for (name, docs) in archive.data {
        if docs.is_empty() {
            info!(collection = %name, "Archived collection is empty, leaving live data untouched");
            result.collections_skipped += 1;
            continue;
        }

        match replace_collection(store, &name, docs).await {
            Ok(inserted) => {
                info!(collection = %name, documents = inserted, "Collection restored");
                result.collections_restored += 1;
                result.documents_restored += inserted;
            }
            Err(Replace::DeleteFailed(e)) => {
                error!(collection = %name, error = %e, "Failed to clear collection, skipping insert");
                result.record_failure(name, &e, false);
            }
            Err(Replace::InsertFailed { deleted, error: e }) => {
                error!(
                    collection = %name,
                    deleted,
                    error = %e,
                    "Collection was cleared but not repopulated, re-run the restore to recover it"
                );
                result.record_failure(name, &e, true);
            }
        }
    }

    result.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        restored = result.collections_restored,
        documents = result.documents_restored,
        skipped = result.collections_skipped,
        failed = result.collections_failed,
        duration_ms = result.duration_ms,
        "Restore complete"
    );
    Ok(result)
}

enum Replace {
    DeleteFailed(BackupError),
    InsertFailed { deleted: u64, error: BackupError },
}

async fn replace_collection(
    store: &dyn DocumentStore,
    collection: &str,
    docs: Vec<Document>,
) -> std::result::Result<u64, Replace> {
    let deleted = store
        .delete_all(collection)
        .await
        .map_err(Replace::DeleteFailed)?;
    tracing::debug!(collection, deleted, "Cleared live collection");
    store
        .insert_many(collection, docs)
        .await
        .map_err(|error| Replace::InsertFailed { deleted, error })
}
