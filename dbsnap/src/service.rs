//! Entry points for schedulers, admin endpoints and the CLI.
//!
//! Every operation that touches the backup directory or the live database
//! holds the per-database lock for its whole duration.

use crate::config::BackupConfig;
use crate::export::{run_export, ExportResult};
use crate::lock::DatabaseLocks;
use crate::restore::{run_restore, RestoreGate, RestoreResult};
use crate::retention::{self, ArchiveInfo, RetentionReport};
use crate::store::DocumentStore;
use crate::utils::errors::{BackupError, Result};
use crate::verify::{verify_archive, VerificationReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct BackupService {
    store: Arc<dyn DocumentStore>,
    config: BackupConfig,
    locks: Arc<DatabaseLocks>,
}

impl BackupService {
    pub fn new(store: Arc<dyn DocumentStore>, config: BackupConfig) -> Self {
        Self::with_locks(store, config, Arc::new(DatabaseLocks::new()))
    }

    /// Share a lock registry between services bound to the same databases
    pub fn with_locks(
        store: Arc<dyn DocumentStore>,
        config: BackupConfig,
        locks: Arc<DatabaseLocks>,
    ) -> Self {
        Self {
            store,
            config,
            locks,
        }
    }

    pub fn database_name(&self) -> &str {
        self.store.database_name()
    }

    pub async fn is_busy(&self) -> bool {
        self.locks.is_busy(self.database_name()).await
    }

    /// Resolves once no export, restore or sweep holds the database
    pub async fn wait_idle(&self) {
        drop(self.locks.acquire(self.database_name()).await);
    }

    pub async fn run_export(&self) -> ExportResult {
        let _guard = self.locks.acquire(self.database_name()).await;
        run_export(self.store.as_ref(), &self.config).await
    }

    /// Export unless another operation already holds the database
    pub async fn try_run_export(&self) -> Option<ExportResult> {
        let _guard = self.locks.try_acquire(self.database_name()).await?;
        Some(run_export(self.store.as_ref(), &self.config).await)
    }

    pub async fn run_restore(&self, archive: &str, gate: &RestoreGate) -> Result<RestoreResult> {
        let path = resolve_archive(&self.config.dir, archive);
        let _guard = self.locks.acquire(self.database_name()).await;
        run_restore(self.store.as_ref(), &path, gate).await
    }

    pub async fn list_archives(&self) -> Result<Vec<ArchiveInfo>> {
        retention::list_archives(&self.config.dir).await
    }

    /// Verify `archive`, or the most recent archive when `None`.
    pub async fn verify_archive(
        &self,
        archive: Option<&str>,
        sample: &[String],
    ) -> Result<VerificationReport> {
        verify_in_dir(&self.config.dir, archive, sample).await
    }

    pub async fn sweep(&self) -> Result<RetentionReport> {
        let _guard = self.locks.acquire(self.database_name()).await;
        retention::sweep(&self.config.dir, self.config.max_backups).await
    }
}

/// Verify an archive in `dir` without a database connection. `None` picks
/// the most recent archive.
pub async fn verify_in_dir(
    dir: &Path,
    archive: Option<&str>,
    sample: &[String],
) -> Result<VerificationReport> {
    let path = match archive {
        Some(name) => resolve_archive(dir, name),
        None => retention::latest_archive(dir)
            .await?
            .map(|info| info.path)
            .ok_or_else(|| BackupError::NotFound(format!("no archives in {}", dir.display())))?,
    };
    verify_archive(&path, sample).await
}

/// A bare file name lives in the backup directory; anything with a
/// directory component is taken as a path.
pub fn resolve_archive(dir: &Path, archive: &str) -> PathBuf {
    let path = Path::new(archive);
    if path.components().count() > 1 || path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}
