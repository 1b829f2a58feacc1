//! Import reconciler
//!
//! Restores a remote snapshot into local storage:
//!
//! 1. download the snapshot database
//! 2. import it into the live database
//! 3. collect the snapshot's receipts that were synced remotely
//! 4. download their files one at a time, pausing between requests,
//!    and write each to its local image path
//!
//! The first failure ends the import. Files already written stay.

use crate::database::{DownloadedDatabase, ImportCounts, Receipt, Repository, Trip};
use crate::events::{AppEvent, EventBus};
use crate::remote::{RemoteBackupMetadata, RemoteBackupStore};
use crate::storage::ReceiptFiles;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Step of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    DownloadingDatabase,
    OverwritingLocal,
    EnumeratingSyncedReceipts,
    PerReceiptDownloadLoop,
    Done,
    Failed,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::DownloadingDatabase => "downloading database",
            ImportStage::OverwritingLocal => "overwriting local database",
            ImportStage::EnumeratingSyncedReceipts => "enumerating synced receipts",
            ImportStage::PerReceiptDownloadLoop => "downloading receipt files",
            ImportStage::Done => "done",
            ImportStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why an import stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub stage: ImportStage,
    /// Position of the receipt that failed in the download loop
    pub failed_index: Option<usize>,
    pub reason: String,
}

impl ImportFailure {
    fn at(stage: ImportStage, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            failed_index: None,
            reason: reason.to_string(),
        }
    }

    fn at_receipt(index: usize, reason: impl fmt::Display) -> Self {
        Self {
            stage: ImportStage::PerReceiptDownloadLoop,
            failed_index: Some(index),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_index {
            Some(index) => write!(f, "{} (receipt #{}): {}", self.stage, index, self.reason),
            None => write!(f, "{}: {}", self.stage, self.reason),
        }
    }
}

impl std::error::Error for ImportFailure {}

/// Summary of a successful import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub trips_imported: u64,
    pub receipts_imported: u64,
    pub files_restored: usize,
}

/// A remotely synced receipt together with the trip that owns it
#[derive(Debug, Clone)]
pub struct SyncedReceipt {
    pub trip: Trip,
    pub receipt: Receipt,
}

/// Yields items one at a time, sleeping `interval` before every item
/// after the first. Never hands out two items without the pause.
pub struct Throttled<I> {
    items: I,
    interval: Duration,
    index: usize,
}

impl<I: Iterator> Throttled<I> {
    pub fn new(items: I, interval: Duration) -> Self {
        Self {
            items,
            interval,
            index: 0,
        }
    }

    /// Next item with its position
    pub async fn next(&mut self) -> Option<(usize, I::Item)> {
        let item = self.items.next()?;
        if self.index > 0 && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        let index = self.index;
        self.index += 1;
        Some((index, item))
    }
}

/// Drives a snapshot restore
#[derive(Clone)]
pub struct ImportReconciler {
    remote: Arc<dyn RemoteBackupStore>,
    repo: Repository,
    receipt_files: ReceiptFiles,
    events: EventBus,
    interval: Duration,
}

impl ImportReconciler {
    pub fn new(
        remote: Arc<dyn RemoteBackupStore>,
        repo: Repository,
        receipt_files: ReceiptFiles,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            remote,
            repo,
            receipt_files,
            events,
            interval,
        }
    }

    /// Restore `metadata` into the local database and receipt storage.
    /// On success a resync is requested from the sync layer.
    pub async fn import(
        &self,
        metadata: &RemoteBackupMetadata,
        overwrite: bool,
    ) -> std::result::Result<ImportReport, ImportFailure> {
        tracing::info!(
            "Importing backup of {} (overwrite = {})",
            metadata.sync_device_name,
            overwrite
        );

        let result = self.run(metadata, overwrite).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    "Import {}: {} trips, {} receipts, {} files",
                    ImportStage::Done,
                    report.trips_imported,
                    report.receipts_imported,
                    report.files_restored
                );
                self.events.emit(AppEvent::ResyncRequested);
            }
            Err(failure) => {
                tracing::warn!("Import {} at {}", ImportStage::Failed, failure);
            }
        }

        result
    }

    async fn run(
        &self,
        metadata: &RemoteBackupMetadata,
        overwrite: bool,
    ) -> std::result::Result<ImportReport, ImportFailure> {
        tracing::debug!("Import stage: {}", ImportStage::DownloadingDatabase);
        let mut database = self
            .remote
            .download_database_only(metadata)
            .await
            .map_err(|e| ImportFailure::at(ImportStage::DownloadingDatabase, e))?;

        let prepared = self.prepare(&mut database, overwrite).await;
        database.discard().await;
        let (counts, synced) = prepared?;

        tracing::debug!(
            "Import stage: {} ({} receipts)",
            ImportStage::PerReceiptDownloadLoop,
            synced.len()
        );
        let files_restored = self.download_receipts(synced).await?;

        Ok(ImportReport {
            trips_imported: counts.trips,
            receipts_imported: counts.receipts,
            files_restored,
        })
    }

    async fn prepare(
        &self,
        database: &mut DownloadedDatabase,
        overwrite: bool,
    ) -> std::result::Result<(ImportCounts, Vec<SyncedReceipt>), ImportFailure>
    {
        tracing::debug!("Import stage: {}", ImportStage::OverwritingLocal);
        let counts = self
            .repo
            .import_database(database.path(), overwrite)
            .await
            .map_err(|e| ImportFailure::at(ImportStage::OverwritingLocal, e))?;

        tracing::debug!("Import stage: {}", ImportStage::EnumeratingSyncedReceipts);
        let synced = collect_synced_receipts(database)
            .await
            .map_err(|e| ImportFailure::at(ImportStage::EnumeratingSyncedReceipts, e))?;

        Ok((counts, synced))
    }

    async fn download_receipts(
        &self,
        synced: Vec<SyncedReceipt>,
    ) -> std::result::Result<usize, ImportFailure> {
        let mut queue = Throttled::new(synced.into_iter(), self.interval);
        let mut restored = 0;

        while let Some((index, item)) = queue.next().await {
            let SyncedReceipt { trip, receipt } = item;

            // Names from the snapshot must stay inside receipt storage
            let path = self
                .receipt_files
                .image_path(&trip, &receipt)
                .ok_or_else(|| {
                    ImportFailure::at_receipt(index, "receipt has no valid image path")
                })?;

            let file = self
                .remote
                .download_receipt_file(&receipt.sync_id)
                .await
                .map_err(|e| ImportFailure::at_receipt(index, e))?;

            self.receipt_files
                .write(&path, &file.data)
                .await
                .map_err(|e| ImportFailure::at_receipt(index, e))?;

            tracing::debug!("Restored receipt {} to {:?}", receipt.id, path);
            restored += 1;
        }

        Ok(restored)
    }
}

/// Receipts with a sync id and an image, across all trips, in listing
/// order. The handle is closed again before returning.
pub async fn collect_synced_receipts(
    database: &mut DownloadedDatabase,
) -> crate::error::Result<Vec<SyncedReceipt>> {
    let contents = match database.open().await {
        Ok(()) => database.trips_with_receipts().await,
        Err(e) => Err(e),
    };
    database.close().await;

    let synced = contents?
        .into_iter()
        .flat_map(|(trip, receipts)| {
            receipts
                .into_iter()
                .filter(|r| {
                    r.is_synced_remotely() && r.file_name.as_deref().is_some_and(|f| !f.is_empty())
                })
                .map(move |receipt| SyncedReceipt {
                    trip: trip.clone(),
                    receipt,
                })
        })
        .collect();

    Ok(synced)
}
