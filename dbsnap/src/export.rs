//! Snapshot exporter: one run, one archive file.

use crate::archive::codec::TaggingPolicy;
use crate::archive::naming::ArchiveName;
use crate::archive::{compress, Archive, ArchiveMetadata};
use crate::config::BackupConfig;
use crate::retention::{self, bytes_to_mb, round2, RetentionReport};
use crate::store::DocumentStore;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Outcome of one export run. Failures are reported here, never raised.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(rename = "fileSizeMB", skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,
    #[serde(rename = "originalSizeMB", skip_serializing_if = "Option::is_none")]
    pub original_size_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<usize>,
    /// Collections whose read failed; archived as empty lists
    pub failed_collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionReport>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportResult {
    pub fn failure(err: &BackupError, duration_ms: u64) -> Self {
        Self {
            success: false,
            duration_ms,
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

struct Snapshot {
    archive: Archive,
    failed_collections: Vec<String>,
}

struct WrittenArchive {
    name: String,
    path: PathBuf,
    compressed_bytes: u64,
    original_bytes: u64,
}

/// Export every collection of `store` into a new archive under `config.dir`,
/// then sweep old archives down to `config.max_backups`.
pub async fn run_export(store: &dyn DocumentStore, config: &BackupConfig) -> ExportResult {
    let start = Instant::now();
    let elapsed = || start.elapsed().as_millis() as u64;

    if config.tagging.is_lossy() {
        warn!(
            policy = ?config.tagging,
            "Tagging policy only tags identifier fields; other ObjectIds will restore as strings"
        );
    }

    let snapshot = match take_snapshot(store).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Database backup failed");
            return ExportResult::failure(&e, elapsed());
        }
    };

    let collections = snapshot.archive.data.len();
    let documents = snapshot.archive.document_count();
    let database = snapshot.archive.metadata.database.clone();
    let created_at = snapshot.archive.metadata.created_at;

    let written =
        match write_archive(&config.dir, &database, created_at, snapshot.archive, config.tagging)
            .await
        {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "Failed to write backup archive");
                return ExportResult::failure(&e, elapsed());
            }
        };

    let retention = match retention::sweep(&config.dir, config.max_backups).await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "Retention sweep failed after export");
            Some(RetentionReport {
                errors: vec![e.to_string()],
                ..RetentionReport::default()
            })
        }
    };

    let ratio = if written.original_bytes > 0 {
        round2((1.0 - written.compressed_bytes as f64 / written.original_bytes as f64) * 100.0)
    } else {
        0.0
    };

    let result = ExportResult {
        success: true,
        file_name: Some(written.name),
        file_path: Some(written.path),
        file_size_mb: Some(bytes_to_mb(written.compressed_bytes)),
        original_size_mb: Some(bytes_to_mb(written.original_bytes)),
        compression_ratio_pct: Some(ratio),
        collections: Some(collections),
        documents: Some(documents),
        failed_collections: snapshot.failed_collections,
        retention,
        duration_ms: elapsed(),
        error: None,
    };

    info!(
        file = result.file_name.as_deref().unwrap_or_default(),
        collections,
        documents,
        size_mb = result.file_size_mb.unwrap_or_default(),
        ratio_pct = ratio,
        failed = result.failed_collections.len(),
        duration_ms = result.duration_ms,
        "Database backup complete"
    );
    result
}

async fn take_snapshot(store: &dyn DocumentStore) -> Result<Snapshot> {
    store.ping().await?;

    let database = store.database_name().to_string();
    let created_at = Utc::now();
    let names = store.list_collections().await?;
    info!(database = %database, collections = names.len(), "Starting database backup");

    let mut data = BTreeMap::new();
    let mut failed_collections = Vec::new();
    for name in names {
        match store.find_all(&name).await {
            Ok(docs) => {
                debug!(collection = %name, documents = docs.len(), "Collection exported");
                data.insert(name, docs);
            }
            Err(e) => {
                warn!(collection = %name, error = %e, "Failed to read collection, archiving it empty");
                failed_collections.push(name.clone());
                data.insert(name, Vec::new());
            }
        }
    }

    Ok(Snapshot {
        archive: Archive {
            metadata: ArchiveMetadata::new(&database, created_at, data.len()),
            data,
        },
        failed_collections,
    })
}

async fn write_archive(
    dir: &Path,
    database: &str,
    created_at: DateTime<Utc>,
    archive: Archive,
    policy: TaggingPolicy,
) -> Result<WrittenArchive> {
    tokio::fs::create_dir_all(dir).await?;

    let (original_bytes, compressed) = tokio::task::spawn_blocking(move || {
        let json = archive.to_json_bytes(policy)?;
        let compressed = compress(&json)?;
        Ok::<_, BackupError>((json.len() as u64, compressed))
    })
    .await??;

    let name = unused_name(dir, database, created_at).await?;
    let path = dir.join(&name);
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

    // Readers only ever see a complete archive under the final name.
    let written = match write_synced(&tmp, &compressed).await {
        Ok(()) => tokio::fs::rename(&tmp, &path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            debug!(file = %tmp.display(), error = %cleanup, "Temporary archive not removed");
        }
        return Err(e.into());
    }

    Ok(WrittenArchive {
        name,
        path,
        compressed_bytes: compressed.len() as u64,
        original_bytes,
    })
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Next free name for this second. Same-second collisions continue after
/// the highest sequence already on disk, so a newer archive never sorts
/// below an older one.
async fn unused_name(dir: &Path, database: &str, created_at: DateTime<Utc>) -> Result<String> {
    let base = ArchiveName::new(database, created_at);
    let mut sequence = 1;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(existing) = ArchiveName::parse(&entry.file_name().to_string_lossy()) {
            if existing.database == base.database && existing.timestamp == base.timestamp {
                sequence = sequence.max(existing.sequence + 1);
            }
        }
    }

    loop {
        let name = base.clone().with_sequence(sequence).file_name();
        if !tokio::fs::try_exists(dir.join(&name)).await? {
            return Ok(name);
        }
        sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{read_archive, read_raw_archive};
    use crate::retention::list_archives;
    use crate::store::MemoryStore;
    use mongodb::bson::{doc, oid::ObjectId};
    use tempfile::TempDir;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new("marketplace");
        store.seed(
            "users",
            vec![
                doc! { "_id": ObjectId::new(), "name": "Alice" },
                doc! { "_id": ObjectId::new(), "name": "Bob" },
            ],
        );
        store.seed("ads", vec![doc! { "_id": ObjectId::new(), "title": "Kandy villa" }]);
        store.seed("leaderboards", Vec::new());
        store
    }

    #[tokio::test]
    async fn test_export_writes_complete_archive() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store();

        let result = run_export(&store, &BackupConfig::new(dir.path())).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.collections, Some(3));
        assert_eq!(result.documents, Some(3));
        assert!(result.failed_collections.is_empty());
        let name = result.file_name.clone().unwrap();
        assert!(name.starts_with("backup_marketplace_"));
        assert!(name.ends_with(".json.gz"));

        let archive = read_archive(&result.file_path.unwrap()).await.unwrap();
        assert_eq!(archive.metadata.database, "marketplace");
        assert_eq!(archive.metadata.collection_count, 3);
        let keys: Vec<_> = archive.data.keys().cloned().collect();
        assert_eq!(keys, vec!["ads", "leaderboards", "users"]);
        assert!(archive.data["leaderboards"].is_empty());
        assert_eq!(archive.data["users"], store.documents("users").unwrap());
    }

    #[tokio::test]
    async fn test_failed_collection_is_archived_empty() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store();
        store.fail_reads("ads");

        let result = run_export(&store, &BackupConfig::new(dir.path())).await;

        assert!(result.success);
        assert_eq!(result.failed_collections, vec!["ads".to_string()]);
        let raw = read_raw_archive(&result.file_path.unwrap()).await.unwrap();
        assert_eq!(raw.data["ads"], serde_json::json!([]));
        assert_eq!(raw.data["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_store_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store();
        store.set_connected(false);

        let result = run_export(&store, &BackupConfig::new(dir.path().join("backups"))).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("connection"));
        assert!(result.file_name.is_none());
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_disk_write_failure_leaves_no_archive() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("backups");
        std::fs::write(&not_a_dir, b"occupied").unwrap();

        let result = run_export(&seeded_store(), &BackupConfig::new(&not_a_dir)).await;

        assert!(!result.success);
        assert!(!result.error.clone().unwrap_or_default().is_empty());
        assert!(result.file_name.is_none());
        assert!(result.file_path.is_none());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["durationMs"].is_u64());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["backups".to_string()]);
        assert_eq!(std::fs::read(&not_a_dir).unwrap(), b"occupied");
    }

    #[tokio::test]
    async fn test_id_fields_policy_flattens_other_object_ids() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("marketplace");
        let id = ObjectId::new();
        let featured = ObjectId::new();
        store.seed("ads", vec![doc! { "_id": id, "featured": featured }]);
        let config = BackupConfig {
            tagging: TaggingPolicy::IdFields,
            ..BackupConfig::new(dir.path())
        };
        assert!(config.tagging.is_lossy());
        assert!(!TaggingPolicy::All.is_lossy());

        let result = run_export(&store, &config).await;

        assert!(result.success);
        let archive = read_archive(&result.file_path.unwrap()).await.unwrap();
        let ad = &archive.data["ads"][0];
        assert_eq!(ad.get_object_id("_id").unwrap(), id);
        assert_eq!(ad.get_str("featured").unwrap(), featured.to_hex());
    }

    #[tokio::test]
    async fn test_retention_bound_after_repeated_exports() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store();
        let config = BackupConfig {
            max_backups: 3,
            ..BackupConfig::new(dir.path())
        };

        let mut written = Vec::new();
        for _ in 0..5 {
            let result = run_export(&store, &config).await;
            assert!(result.success);
            written.push(result.file_name.unwrap());
        }

        let remaining: Vec<_> = list_archives(dir.path())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        let mut newest: Vec<_> = written.into_iter().rev().take(3).collect();
        assert_eq!(remaining.len(), 3);
        newest.sort();
        let mut sorted = remaining.clone();
        sorted.sort();
        assert_eq!(sorted, newest);
    }

    #[tokio::test]
    async fn test_no_temporary_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store();

        let first = run_export(&store, &BackupConfig::new(dir.path())).await;
        let second = run_export(&store, &BackupConfig::new(dir.path())).await;

        assert_ne!(first.file_name, second.file_name);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
