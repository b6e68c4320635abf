use crate::config::AppConfig;
use dbsnap::BackupService;

pub struct AppState {
    pub backups: BackupService,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(backups: BackupService, config: AppConfig) -> Self {
        Self { backups, config }
    }
}
