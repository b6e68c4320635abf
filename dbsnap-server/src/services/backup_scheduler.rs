use crate::state::AppState;
use dbsnap::ExportResult;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    pub async fn schedule_export(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                let database = state.backups.database_name().to_string();
                tracing::info!(database = %database, "Starting scheduled backup");

                match state.backups.try_run_export().await {
                    Some(result) => log_result(&database, &result),
                    None => tracing::warn!(
                        database = %database,
                        "Skipping scheduled backup: another backup or restore is running"
                    ),
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Backup scheduled");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

fn log_result(database: &str, result: &ExportResult) {
    if result.success {
        tracing::info!(
            database = %database,
            file = result.file_name.as_deref().unwrap_or_default(),
            size_mb = result.file_size_mb.unwrap_or_default(),
            failed_collections = result.failed_collections.len(),
            duration_ms = result.duration_ms,
            "Scheduled backup finished"
        );
    } else {
        tracing::error!(
            database = %database,
            error = result.error.as_deref().unwrap_or("unknown error"),
            duration_ms = result.duration_ms,
            "Scheduled backup failed"
        );
    }
}
