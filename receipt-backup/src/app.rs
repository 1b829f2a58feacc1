//! Application state and initialization
//!
//! Builds every service from a data directory and a backup root.
//! All services are made available through AppState.

use crate::config::{EXPORTS_DIR, LOCAL_DB_NAME, RECEIPTS_DIR, STAGING_DIR};
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::events::EventBus;
use crate::remote::{DirectoryBackupStore, RemoteBackupMetadata, RemoteBackupStore};
use crate::services::{
    BackupAssembler, BackupLifecycleController, ImportReconciler, SettingsService,
};
use crate::storage::{ReceiptFiles, ZipArchiveWriter};
use std::path::PathBuf;
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub app_data_dir: PathBuf,
    pub repo: Repository,
    pub settings: SettingsService,
    pub events: EventBus,
    pub receipt_files: ReceiptFiles,
    pub remote: Arc<DirectoryBackupStore>,
    pub backups: BackupLifecycleController,
}

impl AppState {
    /// Set up directories, the local database and every service
    pub async fn initialize(app_data_dir: PathBuf, remote_root: PathBuf) -> Result<Self> {
        tracing::info!("Initializing application in {:?}", app_data_dir);

        std::fs::create_dir_all(&app_data_dir)?;
        std::fs::create_dir_all(app_data_dir.join(EXPORTS_DIR))?;
        std::fs::create_dir_all(app_data_dir.join(STAGING_DIR))?;

        let settings = SettingsService::new(app_data_dir.clone());
        let device_id = settings.device_sync_id().await?;
        let interval = settings.receipt_download_interval().await?;

        let pool = create_pool(&app_data_dir.join(LOCAL_DB_NAME)).await?;
        let repo = Repository::new(pool);

        let receipt_files = ReceiptFiles::new(app_data_dir.join(RECEIPTS_DIR));
        receipt_files.initialize().await?;

        let events = EventBus::new();
        let staging_dir = app_data_dir.join(STAGING_DIR);
        let remote = Arc::new(DirectoryBackupStore::new(remote_root, staging_dir.clone()));
        let remote_store: Arc<dyn RemoteBackupStore> = remote.clone();

        let assembler = BackupAssembler::new(
            Arc::new(ZipArchiveWriter),
            app_data_dir.join(EXPORTS_DIR),
            staging_dir,
        );
        let reconciler = ImportReconciler::new(
            remote_store.clone(),
            repo.clone(),
            receipt_files.clone(),
            events.clone(),
            interval,
        );
        let backups = BackupLifecycleController::new(
            remote_store,
            Arc::new(settings.clone()),
            repo.clone(),
            assembler,
            reconciler,
            events.clone(),
            device_id,
        );

        tracing::info!("Application initialized successfully");

        Ok(Self {
            app_data_dir,
            repo,
            settings,
            events,
            receipt_files,
            remote,
            backups,
        })
    }

    /// Find a listed snapshot by device id or device name
    pub async fn find_snapshot(&self, device: &str) -> Result<Option<RemoteBackupMetadata>> {
        let snapshots = self.backups.list().await?;
        Ok(snapshots
            .iter()
            .find(|s| s.sync_device_id == device)
            .or_else(|| snapshots.iter().find(|s| s.sync_device_name == device))
            .cloned())
    }

    /// Release the database before exit
    pub async fn shutdown(&self) {
        self.repo.close().await;
    }
}
