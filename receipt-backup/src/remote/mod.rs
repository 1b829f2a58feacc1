//! Remote backup storage
//!
//! The remote store is an external collaborator: it lists snapshots,
//! downloads snapshot databases and receipt files, and deletes
//! snapshots. `DirectoryBackupStore` is a folder-backed implementation.

pub mod directory;

pub use directory::DirectoryBackupStore;

use crate::database::DownloadedDatabase;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one remote snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBackupMetadata {
    /// Device id of the installation that uploaded the snapshot
    pub sync_device_id: String,
    pub sync_device_name: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteBackupMetadata {
    pub fn new(sync_device_id: &str, sync_device_name: &str) -> Self {
        Self {
            sync_device_id: sync_device_id.to_string(),
            sync_device_name: sync_device_name.to_string(),
            created_at: Utc::now(),
        }
    }
}

// Snapshots are identified by their device
impl PartialEq for RemoteBackupMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.sync_device_id == other.sync_device_id
    }
}

impl Eq for RemoteBackupMetadata {}

/// One receipt image or attachment pulled from remote storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl DownloadedFile {
    pub fn new(filename: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.to_string(),
            data: data.into(),
        }
    }
}

/// Database plus every file of a snapshot
#[derive(Debug)]
pub struct FullSnapshot {
    pub database: DownloadedDatabase,
    pub files: Vec<DownloadedFile>,
}

/// Remote backup provider
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteBackupStore: Send + Sync {
    /// All snapshots visible to the account, in provider order
    async fn list_remote_snapshots(&self) -> Result<Vec<RemoteBackupMetadata>>;

    async fn download_full_snapshot(&self, metadata: &RemoteBackupMetadata)
        -> Result<FullSnapshot>;

    async fn download_database_only(
        &self,
        metadata: &RemoteBackupMetadata,
    ) -> Result<DownloadedDatabase>;

    async fn download_receipt_file(&self, sync_id: &str) -> Result<DownloadedFile>;

    async fn delete_snapshot(&self, metadata: &RemoteBackupMetadata) -> Result<()>;
}

/// Local link between this installation and the backup provider
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait BackupConfiguration: Send + Sync {
    /// Detach this device from the provider
    async fn clear_current_backup_configuration(&self) -> Result<()>;
}
