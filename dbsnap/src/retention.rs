//! Archive listing and retention sweeps.

use crate::archive::naming::ArchiveName;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// One archive file on disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub name: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    #[serde(skip)]
    parsed: ArchiveName,
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub kept: usize,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Archives in `dir`, newest first. A missing directory has no archives.
pub async fn list_archives(dir: &Path) -> Result<Vec<ArchiveInfo>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut archives = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(parsed) = ArchiveName::parse(&name) else {
            continue;
        };
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable archive entry");
                continue;
            }
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        archives.push(ArchiveInfo {
            path: entry.path(),
            modified_at: DateTime::<Utc>::from(modified),
            size_bytes: metadata.len(),
            size_mb: bytes_to_mb(metadata.len()),
            name,
            parsed,
        });
    }

    // Newest first; same-mtime ties fall back to the name's own timestamp.
    archives.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.parsed.timestamp.cmp(&a.parsed.timestamp))
            .then_with(|| b.parsed.sequence.cmp(&a.parsed.sequence))
    });
    Ok(archives)
}

/// Most recent archive in `dir`, if any.
pub async fn latest_archive(dir: &Path) -> Result<Option<ArchiveInfo>> {
    Ok(list_archives(dir).await?.into_iter().next())
}

/// Delete every archive beyond the newest `keep`. `keep` is at least 1.
pub async fn sweep(dir: &Path, keep: usize) -> Result<RetentionReport> {
    let keep = keep.max(1);
    let archives = list_archives(dir).await?;
    let mut report = RetentionReport {
        kept: archives.len().min(keep),
        ..RetentionReport::default()
    };

    for old in archives.into_iter().skip(keep) {
        match tokio::fs::remove_file(&old.path).await {
            Ok(()) => {
                info!(file = %old.name, "Removed old backup");
                report.deleted.push(old.name);
            }
            Err(e) => {
                let err = BackupError::Retention {
                    file: old.name,
                    message: e.to_string(),
                };
                warn!("{err}");
                report.errors.push(err.to_string());
            }
        }
    }

    if !report.deleted.is_empty() {
        info!(
            deleted = report.deleted.len(),
            kept = report.kept,
            "Retention sweep complete"
        );
    }
    Ok(report)
}
