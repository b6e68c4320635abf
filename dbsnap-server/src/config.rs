use dbsnap::BackupConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub mongodb_uri: String,
    pub backup: BackupConfig,
    pub backup_cron: String,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mongodb_uri = std::env::var("MONGODB_URI")
            .map_err(|_| anyhow::anyhow!("MONGODB_URI is not set"))?;

        let mut backup = BackupConfig::new(PathBuf::from(
            std::env::var("BACKUP_DIR").unwrap_or_else(|_| "backups".into()),
        ));
        if let Some(max) = std::env::var("MAX_BACKUPS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            backup.max_backups = max;
        }

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3100),
            mongodb_uri,
            backup,
            // sec min hour day month weekday
            backup_cron: std::env::var("BACKUP_CRON").unwrap_or_else(|_| "0 0 2 * * *".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        })
    }
}
