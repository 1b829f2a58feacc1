//! Backup lifecycle
//!
//! High-level operations on remote snapshots: listing, exporting to a
//! ZIP archive, restoring into the local database and deleting. Every
//! operation reports one coarse error per kind; the detailed cause is
//! only logged.

use crate::database::Repository;
use crate::error::{AppError, Result};
use crate::events::{AppEvent, EventBus};
use crate::remote::{BackupConfiguration, FullSnapshot, RemoteBackupMetadata, RemoteBackupStore};
use crate::services::assembler::BackupAssembler;
use crate::services::import::{ImportReconciler, ImportReport};
use crate::storage::ArchiveOutcome;
use std::path::PathBuf;
use std::sync::Arc;

/// Whether `snapshot` was uploaded by the installation with `local_device_id`
pub fn is_current_device(snapshot: &RemoteBackupMetadata, local_device_id: &str) -> bool {
    snapshot.sync_device_id == local_device_id
}

/// Local follow-up required after a snapshot is deleted remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Another device's snapshot; nothing changes locally
    RemoteOnly,
    /// This device's snapshot; detach from the provider and mark every
    /// entry as not yet synced
    DetachCurrentDevice,
}

pub fn delete_policy(snapshot: &RemoteBackupMetadata, local_device_id: &str) -> DeletePolicy {
    if is_current_device(snapshot, local_device_id) {
        DeletePolicy::DetachCurrentDevice
    } else {
        DeletePolicy::RemoteOnly
    }
}

/// Orchestrates list, export, import and delete of remote snapshots
#[derive(Clone)]
pub struct BackupLifecycleController {
    remote: Arc<dyn RemoteBackupStore>,
    config: Arc<dyn BackupConfiguration>,
    repo: Repository,
    assembler: BackupAssembler,
    reconciler: ImportReconciler,
    events: EventBus,
    device_id: String,
}

impl BackupLifecycleController {
    pub fn new(
        remote: Arc<dyn RemoteBackupStore>,
        config: Arc<dyn BackupConfiguration>,
        repo: Repository,
        assembler: BackupAssembler,
        reconciler: ImportReconciler,
        events: EventBus,
        device_id: String,
    ) -> Self {
        Self {
            remote,
            config,
            repo,
            assembler,
            reconciler,
            events,
            device_id,
        }
    }

    /// Id of this installation
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// All remote snapshots, unfiltered, in provider order
    pub async fn list(&self) -> Result<Vec<RemoteBackupMetadata>> {
        let snapshots = self.remote.list_remote_snapshots().await?;
        tracing::debug!("Listed {} remote snapshots", snapshots.len());
        Ok(snapshots)
    }

    pub fn is_current_device(&self, snapshot: &RemoteBackupMetadata) -> bool {
        is_current_device(snapshot, &self.device_id)
    }

    /// Download `snapshot` and pack it into a per-trip archive
    pub async fn export_zip(&self, snapshot: &RemoteBackupMetadata) -> Result<PathBuf> {
        tracing::info!("Exporting backup of {}", snapshot.sync_device_name);

        let FullSnapshot {
            mut database,
            files,
        } = self
            .remote
            .download_full_snapshot(snapshot)
            .await
            .map_err(|e| export_error(snapshot, e))?;

        let outcome = self
            .assembler
            .assemble_export_archive(&mut database, &files, &snapshot.sync_device_name)
            .await;
        database.discard().await;

        finish_export(snapshot, outcome)
    }

    /// Download `snapshot` and pack everything into one flat archive
    pub async fn debug_export_zip(&self, snapshot: &RemoteBackupMetadata) -> Result<PathBuf> {
        tracing::info!("Exporting debug archive of {}", snapshot.sync_device_name);

        let FullSnapshot { database, files } = self
            .remote
            .download_full_snapshot(snapshot)
            .await
            .map_err(|e| export_error(snapshot, e))?;

        let outcome = self
            .assembler
            .assemble_debug_archive(&database, &files, &snapshot.sync_device_name)
            .await;
        database.discard().await;

        finish_export(snapshot, outcome)
    }

    /// Restore `snapshot` into local storage
    pub async fn import(
        &self,
        snapshot: &RemoteBackupMetadata,
        overwrite: bool,
    ) -> Result<ImportReport> {
        self.reconciler
            .import(snapshot, overwrite)
            .await
            .map_err(|failure| AppError::Import(failure.to_string()))
    }

    /// Delete `snapshot` remotely. Deleting this device's own snapshot
    /// also detaches the device and forces a full re-sync.
    pub async fn delete(&self, snapshot: &RemoteBackupMetadata) -> Result<()> {
        tracing::info!("Deleting backup of {}", snapshot.sync_device_name);

        self.remote
            .delete_snapshot(snapshot)
            .await
            .map_err(|e| delete_error(snapshot, e))?;

        match delete_policy(snapshot, &self.device_id) {
            DeletePolicy::RemoteOnly => {
                tracing::info!("Deleted backup of another device, local state unchanged");
            }
            DeletePolicy::DetachCurrentDevice => {
                // Remote copy is already gone; a failure below is not compensated
                self.config
                    .clear_current_backup_configuration()
                    .await
                    .map_err(|e| delete_error(snapshot, e))?;
                self.repo
                    .mark_all_entries_synced(false)
                    .await
                    .map_err(|e| delete_error(snapshot, e))?;
                self.events.emit(AppEvent::SyncStateChanged);
                tracing::info!("Deleted this device's backup; all entries marked unsynced");
            }
        }

        Ok(())
    }
}

fn finish_export(
    snapshot: &RemoteBackupMetadata,
    outcome: Result<ArchiveOutcome>,
) -> Result<PathBuf> {
    match outcome {
        Ok(ArchiveOutcome::Created(path)) => Ok(path),
        Ok(ArchiveOutcome::WriteFailed(reason)) => Err(export_error(snapshot, reason)),
        Ok(ArchiveOutcome::SourceUnavailable) => {
            Err(export_error(snapshot, "snapshot database could not be opened"))
        }
        Err(e) => Err(export_error(snapshot, e)),
    }
}

fn export_error(snapshot: &RemoteBackupMetadata, cause: impl std::fmt::Display) -> AppError {
    tracing::warn!("Export of {} failed: {}", snapshot.sync_device_name, cause);
    AppError::Export(snapshot.sync_device_name.clone())
}

fn delete_error(snapshot: &RemoteBackupMetadata, cause: impl std::fmt::Display) -> AppError {
    tracing::warn!("Delete of {} failed: {}", snapshot.sync_device_name, cause);
    AppError::DeleteFailed(snapshot.sync_device_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_pool, DownloadedDatabase};
    use crate::remote::{DownloadedFile, MockBackupConfiguration, MockRemoteBackupStore};
    use crate::storage::{ReceiptFiles, ZipArchiveWriter};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_is_current_device() {
        let snapshot = RemoteBackupMetadata::new("A", "Phone-A");

        assert!(is_current_device(&snapshot, "A"));
        assert!(!is_current_device(&snapshot, "B"));
    }

    #[test]
    fn test_delete_policy() {
        let snapshot = RemoteBackupMetadata::new("A", "Phone-A");

        assert_eq!(delete_policy(&snapshot, "A"), DeletePolicy::DetachCurrentDevice);
        assert_eq!(delete_policy(&snapshot, "B"), DeletePolicy::RemoteOnly);
    }

    struct Fixture {
        temp: TempDir,
        repo: Repository,
        events: EventBus,
    }

    impl Fixture {
        async fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let repo = Repository::new(create_pool(&temp.path().join("local.db")).await.unwrap());

            let trip = repo.create_trip("Paris").await.unwrap();
            let receipt = repo
                .create_receipt(&trip.id, "Dinner", Some("img123.jpg"))
                .await
                .unwrap();
            repo.set_receipt_sync_id(&receipt.id, "s1").await.unwrap();
            repo.mark_all_entries_synced(true).await.unwrap();

            Self {
                temp,
                repo,
                events: EventBus::new(),
            }
        }

        fn controller(
            &self,
            remote: MockRemoteBackupStore,
            config: MockBackupConfiguration,
            device_id: &str,
        ) -> BackupLifecycleController {
            let root = self.temp.path();
            let remote: Arc<dyn RemoteBackupStore> = Arc::new(remote);
            let assembler = BackupAssembler::new(
                Arc::new(ZipArchiveWriter),
                root.join("exports"),
                root.join("scratch"),
            );
            let reconciler = ImportReconciler::new(
                remote.clone(),
                self.repo.clone(),
                ReceiptFiles::new(root.join("receipts")),
                self.events.clone(),
                Duration::from_millis(10),
            );

            BackupLifecycleController::new(
                remote,
                Arc::new(config),
                self.repo.clone(),
                assembler,
                reconciler,
                self.events.clone(),
                device_id.to_string(),
            )
        }

        async fn all_synced(&self) -> bool {
            let mut synced = true;
            for trip in self.repo.list_trips().await.unwrap() {
                synced &= trip.synced;
                for receipt in self.repo.list_receipts(&trip).await.unwrap() {
                    synced &= receipt.synced;
                }
            }
            synced
        }
    }

    fn deleting_remote(succeeds: bool) -> MockRemoteBackupStore {
        let mut remote = MockRemoteBackupStore::new();
        remote.expect_delete_snapshot().times(1).returning(move |_| {
            if succeeds {
                Ok(())
            } else {
                Err(AppError::Remote("offline".to_string()))
            }
        });
        remote
    }

    #[tokio::test]
    async fn test_delete_foreign_snapshot_keeps_local_state() {
        let f = Fixture::new().await;
        let mut events = f.events.subscribe();
        let mut config = MockBackupConfiguration::new();
        config.expect_clear_current_backup_configuration().times(0);

        let controller = f.controller(deleting_remote(true), config, "B");
        controller
            .delete(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await
            .unwrap();

        assert!(f.all_synced().await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_own_snapshot_detaches_device() {
        let f = Fixture::new().await;
        let mut events = f.events.subscribe();
        let mut config = MockBackupConfiguration::new();
        config
            .expect_clear_current_backup_configuration()
            .times(1)
            .returning(|| Ok(()));

        let controller = f.controller(deleting_remote(true), config, "A");
        controller
            .delete(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await
            .unwrap();

        assert!(!f.all_synced().await);
        assert_eq!(events.try_recv().unwrap(), AppEvent::SyncStateChanged);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_remote_delete_changes_nothing() {
        let f = Fixture::new().await;
        let mut events = f.events.subscribe();
        let mut config = MockBackupConfiguration::new();
        config.expect_clear_current_backup_configuration().times(0);

        let controller = f.controller(deleting_remote(false), config, "A");
        let result = controller
            .delete(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await;

        assert!(matches!(result, Err(AppError::DeleteFailed(_))));
        assert!(f.all_synced().await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_config_clear_is_a_delete_failure() {
        let f = Fixture::new().await;
        let mut events = f.events.subscribe();
        let mut config = MockBackupConfiguration::new();
        config
            .expect_clear_current_backup_configuration()
            .times(1)
            .returning(|| Err(AppError::Settings("read-only disk".to_string())));

        let controller = f.controller(deleting_remote(true), config, "A");
        let result = controller
            .delete(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await;

        assert!(matches!(result, Err(AppError::DeleteFailed(_))));
        assert!(f.all_synced().await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_list_keeps_provider_order() {
        let f = Fixture::new().await;
        let mut remote = MockRemoteBackupStore::new();
        remote.expect_list_remote_snapshots().returning(|| {
            Ok(vec![
                RemoteBackupMetadata::new("B", "Tablet"),
                RemoteBackupMetadata::new("A", "Phone-A"),
            ])
        });

        let controller = f.controller(remote, MockBackupConfiguration::new(), "A");
        let snapshots = controller.list().await.unwrap();

        let ids: Vec<&str> = snapshots.iter().map(|s| s.sync_device_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert!(!controller.is_current_device(&snapshots[0]));
        assert!(controller.is_current_device(&snapshots[1]));
    }

    /// Remote serving a copy of the local database plus two files
    async fn serving_remote(f: &Fixture) -> MockRemoteBackupStore {
        let source = f.temp.path().join("published.db");
        f.repo.export_snapshot(&source).await.unwrap();
        let staging = f.temp.path().join("staging");

        let mut remote = MockRemoteBackupStore::new();
        remote.expect_download_full_snapshot().returning(move |_| {
            std::fs::create_dir_all(&staging)?;
            let staged = staging.join("receipts_sync.db");
            std::fs::copy(&source, &staged)?;
            Ok(FullSnapshot {
                database: DownloadedDatabase::new(staged),
                files: vec![
                    DownloadedFile::new("img123.jpg", b"jpeg".to_vec()),
                    DownloadedFile::new("unrelated.jpg", b"other".to_vec()),
                ],
            })
        });
        remote
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_export_zip_builds_archive_and_discards_download() {
        let f = Fixture::new().await;
        let remote = serving_remote(&f).await;
        let controller = f.controller(remote, MockBackupConfiguration::new(), "B");

        let path = controller
            .export_zip(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await
            .unwrap();

        assert_eq!(path, f.temp.path().join("exports").join("Phone-A.zip"));
        assert_eq!(
            entry_names(&path),
            vec!["Paris/", "Paris/img123.jpg", "receipts_sync.db"]
        );
        assert!(!f.temp.path().join("staging").exists());
    }

    #[tokio::test]
    async fn test_debug_export_zip_is_flat() {
        let f = Fixture::new().await;
        let remote = serving_remote(&f).await;
        let controller = f.controller(remote, MockBackupConfiguration::new(), "B");

        let path = controller
            .debug_export_zip(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await
            .unwrap();

        assert_eq!(path, f.temp.path().join("exports").join("debug_Phone-A.zip"));
        assert_eq!(
            entry_names(&path),
            vec![
                "files/",
                "files/img123.jpg",
                "files/unrelated.jpg",
                "receipts_sync.db",
            ]
        );
    }

    #[tokio::test]
    async fn test_export_download_failure_is_export_error() {
        let f = Fixture::new().await;
        let mut remote = MockRemoteBackupStore::new();
        remote
            .expect_download_full_snapshot()
            .returning(|_| Err(AppError::Remote("timeout".to_string())));
        let controller = f.controller(remote, MockBackupConfiguration::new(), "B");

        let result = controller
            .export_zip(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await;

        assert!(matches!(result, Err(AppError::Export(_))));
        assert!(!f.temp.path().join("exports").join("Phone-A.zip").exists());
    }

    #[tokio::test]
    async fn test_export_of_corrupt_snapshot_is_export_error() {
        let f = Fixture::new().await;
        let staging = f.temp.path().join("staging");
        let mut remote = MockRemoteBackupStore::new();
        remote.expect_download_full_snapshot().returning(move |_| {
            std::fs::create_dir_all(&staging)?;
            let staged = staging.join("receipts_sync.db");
            std::fs::write(&staged, b"not a database")?;
            Ok(FullSnapshot {
                database: DownloadedDatabase::new(staged),
                files: Vec::new(),
            })
        });
        let controller = f.controller(remote, MockBackupConfiguration::new(), "B");

        let result = controller
            .export_zip(&RemoteBackupMetadata::new("A", "Phone-A"))
            .await;

        assert!(matches!(result, Err(AppError::Export(_))));
        assert!(!f.temp.path().join("staging").exists());
    }

    #[tokio::test]
    async fn test_import_failure_is_import_error() {
        let f = Fixture::new().await;
        let mut events = f.events.subscribe();
        let mut remote = MockRemoteBackupStore::new();
        remote
            .expect_download_database_only()
            .returning(|_| Err(AppError::Remote("not found".to_string())));
        remote.expect_download_receipt_file().times(0);
        let controller = f.controller(remote, MockBackupConfiguration::new(), "B");

        let result = controller
            .import(&RemoteBackupMetadata::new("A", "Phone-A"), true)
            .await;

        assert!(matches!(result, Err(AppError::Import(_))));
        assert!(events.try_recv().is_err());
    }
}
