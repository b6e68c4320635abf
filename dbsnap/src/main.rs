//! dbsnap - command line entry point
//!
//! Operator commands for exporting, restoring, listing, sweeping and
//! verifying database archives.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dbsnap::archive::ArchiveMetadata;
use dbsnap::{retention, service, utils, BackupService, Config, MongoStore, RestoreGate};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MongoDB connection string (overrides config and MONGODB_URI)
    #[arg(long)]
    uri: Option<String>,

    /// Backup directory (overrides config and BACKUP_DIR)
    #[arg(long, value_name = "DIR")]
    backup_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot every collection into a new archive
    Export,
    /// Replace live collections with an archive's contents
    Restore {
        /// Archive file name (in the backup directory) or path
        archive: String,
        /// Skip the interactive prompt; wait the configured delay instead
        #[arg(long)]
        yes: bool,
    },
    /// List archives, newest first
    List,
    /// Check that identifiers in an archive are properly typed
    Verify {
        /// Archive file name or path (default: most recent)
        archive: Option<String>,
        /// Collections to inspect (default: every non-empty collection)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,
    },
    /// Delete archives beyond the retention limit
    Sweep {
        /// Number of archives to keep (default: configured max_backups)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides();
    if let Some(uri) = args.uri {
        config.database.uri = Some(uri);
    }
    if let Some(dir) = args.backup_dir {
        config.backup.dir = dir;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    run(args.command, &config).await
}

/// Only `export` and `restore` connect; the rest work on the backup
/// directory alone.
async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Export => {
            let store = connect(config).await?;
            let result = BackupService::new(store.clone(), config.backup.clone())
                .run_export()
                .await;
            store.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                bail!(result.error.unwrap_or_else(|| "export failed".into()));
            }
        }
        Command::Restore { archive, yes } => {
            let gate = if yes {
                RestoreGate::Delay(config.backup.restore_delay())
            } else {
                RestoreGate::Confirm(Box::new(confirm_on_stdin))
            };
            let store = connect(config).await?;
            let result = BackupService::new(store.clone(), config.backup.clone())
                .run_restore(&archive, &gate)
                .await;
            store.shutdown().await;

            let result = result?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.collections_failed > 0 {
                bail!("{} collection(s) failed to restore", result.collections_failed);
            }
        }
        Command::List => {
            let archives = retention::list_archives(&config.backup.dir).await?;
            if archives.is_empty() {
                println!("No archives in {}", config.backup.dir.display());
            }
            for archive in archives {
                println!(
                    "{}  {:>10.2} MB  {}",
                    archive.modified_at.format("%Y-%m-%d %H:%M:%S"),
                    archive.size_mb,
                    archive.name
                );
            }
        }
        Command::Verify {
            archive,
            collections,
        } => {
            let report =
                service::verify_in_dir(&config.backup.dir, archive.as_deref(), &collections)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.passed() {
                bail!(
                    "verification failed: {} untyped identifier(s) in {}",
                    report.regression_count,
                    report.archive
                );
            }
        }
        Command::Sweep { keep } => {
            let keep = keep.unwrap_or(config.backup.max_backups);
            let report = retention::sweep(&config.backup.dir, keep).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<MongoStore>> {
    let uri = config
        .database
        .uri
        .as_deref()
        .context("no database URI; set MONGODB_URI, --uri or [database].uri")?;
    Ok(Arc::new(MongoStore::connect(uri).await?))
}

fn confirm_on_stdin(metadata: &ArchiveMetadata, documents: usize) -> bool {
    println!(
        "Archive of '{}' taken {} ({} collections, {} documents).",
        metadata.database,
        metadata.created_at.to_rfc3339(),
        metadata.collection_count,
        documents
    );
    print!("Live collections will be overwritten. Type 'yes' to continue: ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim() == "yes",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsnap::bson::{doc, oid::ObjectId};
    use dbsnap::config::BackupConfig;
    use dbsnap::MemoryStore;
    use tempfile::TempDir;

    fn offline_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.database.uri = None;
        config.backup = BackupConfig::new(dir);
        config
    }

    async fn export_one(dir: &std::path::Path) -> String {
        let store = Arc::new(MemoryStore::new("marketplace"));
        store.seed("users", vec![doc! { "_id": ObjectId::new(), "name": "Alice" }]);
        let result = BackupService::new(store, BackupConfig::new(dir)).run_export().await;
        assert!(result.success, "{:?}", result.error);
        result.file_name.unwrap()
    }

    #[tokio::test]
    async fn test_archive_commands_need_no_database() {
        let dir = TempDir::new().unwrap();
        let name = export_one(dir.path()).await;
        let config = offline_config(dir.path());

        run(
            Command::Verify {
                archive: None,
                collections: Vec::new(),
            },
            &config,
        )
        .await
        .unwrap();
        run(
            Command::Verify {
                archive: Some(name),
                collections: vec!["users".into()],
            },
            &config,
        )
        .await
        .unwrap();
        run(Command::List, &config).await.unwrap();
        run(Command::Sweep { keep: Some(1) }, &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_export_without_uri_fails_before_connecting() {
        let dir = TempDir::new().unwrap();
        let config = offline_config(dir.path());

        let err = run(Command::Export, &config).await.unwrap_err();

        assert!(err.to_string().contains("no database URI"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
