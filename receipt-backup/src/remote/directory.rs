//! Folder-backed remote store
//!
//! Layout under the root:
//!
//! ```text
//! <device id>/metadata.json      snapshot metadata
//! <device id>/manifest.json      files of the snapshot with checksums
//! <device id>/receipts_sync.db   snapshot database
//! files/<sync id>/<file name>    receipt files shared by all snapshots
//! ```
//!
//! Downloads are staged into a private staging directory.

use super::{DownloadedFile, FullSnapshot, RemoteBackupMetadata, RemoteBackupStore};
use crate::config::{SNAPSHOT_MANIFEST_FILE, SNAPSHOT_METADATA_FILE, SYNC_DB_NAME};
use crate::database::DownloadedDatabase;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

const FILES_DIR: &str = "files";

/// Files belonging to one snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: String,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sync_id: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
}

/// Remote store kept in a local or mounted folder
#[derive(Clone, Debug)]
pub struct DirectoryBackupStore {
    root: PathBuf,
    staging_dir: PathBuf,
}

impl DirectoryBackupStore {
    pub fn new(root: PathBuf, staging_dir: PathBuf) -> Self {
        Self { root, staging_dir }
    }

    /// Upload a snapshot: its database file plus `(sync id, file)` pairs.
    /// Replaces any earlier snapshot of the same device.
    pub async fn publish_snapshot(
        &self,
        metadata: &RemoteBackupMetadata,
        database: &Path,
        files: &[(String, DownloadedFile)],
    ) -> Result<()> {
        let snapshot_dir = self.snapshot_dir(&metadata.sync_device_id)?;
        tracing::info!(
            "Publishing snapshot for {} to {:?}",
            metadata.sync_device_name,
            snapshot_dir
        );

        fs::create_dir_all(&snapshot_dir).await?;
        fs::copy(database, snapshot_dir.join(SYNC_DB_NAME)).await?;

        let mut manifest = SnapshotManifest {
            version: env!("CARGO_PKG_VERSION").to_string(),
            files: Vec::with_capacity(files.len()),
        };

        for (sync_id, file) in files {
            validate_component(sync_id)?;
            validate_component(&file.filename)?;

            let file_dir = self.root.join(FILES_DIR).join(sync_id);
            fs::create_dir_all(&file_dir).await?;
            fs::write(file_dir.join(&file.filename), &file.data).await?;

            manifest.files.push(ManifestEntry {
                sync_id: sync_id.clone(),
                filename: file.filename.clone(),
                size: file.data.len() as u64,
                checksum: calculate_checksum(&file.data),
            });
        }

        fs::write(
            snapshot_dir.join(SNAPSHOT_MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )
        .await?;
        fs::write(
            snapshot_dir.join(SNAPSHOT_METADATA_FILE),
            serde_json::to_string_pretty(metadata)?,
        )
        .await?;

        tracing::debug!("Published {} files", manifest.files.len());
        Ok(())
    }

    fn snapshot_dir(&self, device_id: &str) -> Result<PathBuf> {
        validate_component(device_id)?;
        if device_id == FILES_DIR {
            return Err(AppError::Remote(format!("Reserved device id: {}", device_id)));
        }
        Ok(self.root.join(device_id))
    }

    async fn existing_snapshot_dir(&self, metadata: &RemoteBackupMetadata) -> Result<PathBuf> {
        let dir = self.snapshot_dir(&metadata.sync_device_id)?;
        if !fs::try_exists(dir.join(SNAPSHOT_METADATA_FILE)).await? {
            return Err(AppError::Remote(format!(
                "No snapshot for device {}",
                metadata.sync_device_id
            )));
        }
        Ok(dir)
    }

    async fn stage_database(&self, snapshot_dir: &Path) -> Result<DownloadedDatabase> {
        let staged_dir = self.staging_dir.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&staged_dir).await?;

        let staged = staged_dir.join(SYNC_DB_NAME);
        fs::copy(snapshot_dir.join(SYNC_DB_NAME), &staged)
            .await
            .map_err(|e| AppError::Remote(format!("Failed to download database: {}", e)))?;

        tracing::debug!("Staged snapshot database at {:?}", staged);
        Ok(DownloadedDatabase::new(staged))
    }

    async fn read_manifest(&self, snapshot_dir: &Path) -> Result<SnapshotManifest> {
        let path = snapshot_dir.join(SNAPSHOT_MANIFEST_FILE);
        if !fs::try_exists(&path).await? {
            return Ok(SnapshotManifest::default());
        }

        let content = fs::read_to_string(&path).await?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Remote(format!("Invalid snapshot manifest: {}", e)))
    }

    async fn download_manifest_files(&self, manifest: &SnapshotManifest) -> Result<Vec<DownloadedFile>> {
        let mut files = Vec::with_capacity(manifest.files.len());

        for entry in &manifest.files {
            validate_component(&entry.sync_id)?;
            validate_component(&entry.filename)?;

            let path = self
                .root
                .join(FILES_DIR)
                .join(&entry.sync_id)
                .join(&entry.filename);
            let data = fs::read(&path)
                .await
                .map_err(|e| AppError::Remote(format!("Failed to download {}: {}", entry.filename, e)))?;

            let actual = calculate_checksum(&data);
            if actual != entry.checksum {
                return Err(AppError::Remote(format!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    entry.filename, entry.checksum, actual
                )));
            }

            files.push(DownloadedFile {
                filename: entry.filename.clone(),
                data,
            });
        }

        Ok(files)
    }
}

#[async_trait::async_trait]
impl RemoteBackupStore for DirectoryBackupStore {
    async fn list_remote_snapshots(&self) -> Result<Vec<RemoteBackupMetadata>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let metadata_path = entry.path().join(SNAPSHOT_METADATA_FILE);
            if entry.file_name() == FILES_DIR || !metadata_path.is_file() {
                continue;
            }

            let content = fs::read_to_string(&metadata_path).await?;
            match serde_json::from_str::<RemoteBackupMetadata>(&content) {
                Ok(metadata) => snapshots.push(metadata),
                Err(e) => tracing::warn!("Skipping unreadable snapshot {:?}: {}", metadata_path, e),
            }
        }

        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(snapshots)
    }

    async fn download_full_snapshot(
        &self,
        metadata: &RemoteBackupMetadata,
    ) -> Result<FullSnapshot> {
        let snapshot_dir = self.existing_snapshot_dir(metadata).await?;
        let manifest = self.read_manifest(&snapshot_dir).await?;
        let database = self.stage_database(&snapshot_dir).await?;

        match self.download_manifest_files(&manifest).await {
            Ok(files) => {
                tracing::info!(
                    "Downloaded snapshot of {} with {} files",
                    metadata.sync_device_name,
                    files.len()
                );
                Ok(FullSnapshot { database, files })
            }
            Err(e) => {
                database.discard().await;
                Err(e)
            }
        }
    }

    async fn download_database_only(
        &self,
        metadata: &RemoteBackupMetadata,
    ) -> Result<DownloadedDatabase> {
        let snapshot_dir = self.existing_snapshot_dir(metadata).await?;
        self.stage_database(&snapshot_dir).await
    }

    async fn download_receipt_file(&self, sync_id: &str) -> Result<DownloadedFile> {
        validate_component(sync_id)?;
        let dir = self.root.join(FILES_DIR).join(sync_id);

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::Remote(format!("Receipt file {} not found: {}", sync_id, e)))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().is_file() {
                let data = fs::read(entry.path()).await?;
                return Ok(DownloadedFile {
                    filename: entry.file_name().to_string_lossy().to_string(),
                    data,
                });
            }
        }

        Err(AppError::Remote(format!("Receipt file {} not found", sync_id)))
    }

    async fn delete_snapshot(&self, metadata: &RemoteBackupMetadata) -> Result<()> {
        let snapshot_dir = self.existing_snapshot_dir(metadata).await?;
        fs::remove_dir_all(&snapshot_dir)
            .await
            .map_err(|e| AppError::Remote(format!("Failed to delete snapshot: {}", e)))?;

        tracing::info!("Deleted remote snapshot of {}", metadata.sync_device_name);
        Ok(())
    }
}

fn validate_component(value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
        && !value.chars().any(char::is_control);

    if valid {
        Ok(())
    } else {
        Err(AppError::Remote(format!("Invalid path component: {:?}", value)))
    }
}

fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
