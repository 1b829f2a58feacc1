//! Backup assembler
//!
//! Rebuilds a self-contained archive from a downloaded snapshot: the
//! snapshot database plus one directory per trip holding the downloaded
//! files that belong to that trip's receipts. Files that match no
//! receipt are left out.

use crate::config::{ARCHIVE_EXTENSION, DEBUG_ARCHIVE_PREFIX, DEBUG_FILES_DIR};
use crate::database::{DownloadedDatabase, Receipt, Trip};
use crate::error::{AppError, Result};
use crate::remote::DownloadedFile;
use crate::storage::archive::sanitize_path_component;
use crate::storage::{ArchiveOutcome, ArchiveWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;

/// Downloaded files grouped under the trip they belong to
#[derive(Debug)]
pub struct TripBundle<'a> {
    pub trip: &'a Trip,
    pub files: Vec<&'a DownloadedFile>,
}

/// Assign each downloaded file to every trip with a receipt whose image
/// path contains the file name. Trips without a match are omitted.
pub fn match_files_to_trips<'a>(
    contents: &'a [(Trip, Vec<Receipt>)],
    files: &'a [DownloadedFile],
) -> Vec<TripBundle<'a>> {
    let mut bundles: Vec<TripBundle<'a>> = Vec::new();

    for (trip, receipts) in contents {
        let matched: Vec<&DownloadedFile> = files
            .iter()
            .filter(|file| !file.filename.is_empty())
            .filter(|file| {
                receipts.iter().any(|receipt| {
                    receipt
                        .image_file_path(trip, Path::new(""))
                        .is_some_and(|path| path.to_string_lossy().contains(&file.filename))
                })
            })
            .collect();

        if !matched.is_empty() {
            bundles.push(TripBundle {
                trip,
                files: matched,
            });
        }
    }

    bundles
}

/// Builds export archives from downloaded snapshots
#[derive(Clone)]
pub struct BackupAssembler {
    writer: Arc<dyn ArchiveWriter>,
    exports_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl BackupAssembler {
    /// `scratch_dir` hosts the temporary trip directories
    pub fn new(writer: Arc<dyn ArchiveWriter>, exports_dir: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            writer,
            exports_dir,
            scratch_dir,
        }
    }

    /// Destination of the archive for a device display name
    pub fn archive_path(&self, device_name: &str, debug: bool) -> PathBuf {
        let prefix = if debug { DEBUG_ARCHIVE_PREFIX } else { "" };
        self.exports_dir.join(format!(
            "{}{}.{}",
            prefix,
            sanitize_path_component(device_name),
            ARCHIVE_EXTENSION
        ))
    }

    /// Build the per-trip export archive.
    ///
    /// The database handle is opened here and closed again before
    /// archiving, on every path. An unopenable database yields
    /// `ArchiveOutcome::SourceUnavailable` without touching the disk.
    pub async fn assemble_export_archive(
        &self,
        database: &mut DownloadedDatabase,
        files: &[DownloadedFile],
        device_name: &str,
    ) -> Result<ArchiveOutcome> {
        let contents = match read_contents(database).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!("Snapshot database unavailable for export: {}", e);
                return Ok(ArchiveOutcome::SourceUnavailable);
            }
        };

        let bundles = match_files_to_trips(&contents, files);
        let matched: usize = bundles.iter().map(|b| b.files.len()).sum();
        tracing::info!(
            "Assembling export: {} of {} files matched across {} trips",
            matched,
            files.len(),
            bundles.len()
        );

        let scratch = self.scratch().await?;
        let mut roots = vec![database.path().to_path_buf()];

        for bundle in &bundles {
            let trip_dir = scratch.path().join(sanitize_path_component(&bundle.trip.name));
            // Trips sharing a name share a directory
            if !roots.contains(&trip_dir) {
                fs::create_dir_all(&trip_dir).await?;
                roots.push(trip_dir.clone());
            }
            for file in &bundle.files {
                write_scratch_file(&trip_dir, file).await?;
            }
        }

        let destination = self.archive_path(device_name, false);
        let outcome = self.write_archive(roots, destination).await;
        cleanup(scratch);
        Ok(outcome)
    }

    /// Build the unfiltered diagnostic archive: the database plus one
    /// flat `files/` directory with every downloaded file, no trip matching.
    pub async fn assemble_debug_archive(
        &self,
        database: &DownloadedDatabase,
        files: &[DownloadedFile],
        device_name: &str,
    ) -> Result<ArchiveOutcome> {
        tracing::info!("Assembling debug export with {} files", files.len());

        let scratch = self.scratch().await?;
        let mut roots = vec![database.path().to_path_buf()];

        let files_dir = scratch.path().join(DEBUG_FILES_DIR);
        for file in files.iter().filter(|f| !f.filename.is_empty()) {
            if !roots.contains(&files_dir) {
                fs::create_dir_all(&files_dir).await?;
                roots.push(files_dir.clone());
            }
            write_scratch_file(&files_dir, file).await?;
        }

        let destination = self.archive_path(device_name, true);
        let outcome = self.write_archive(roots, destination).await;
        cleanup(scratch);
        Ok(outcome)
    }

    async fn scratch(&self) -> Result<TempDir> {
        fs::create_dir_all(&self.scratch_dir).await?;
        Ok(TempDir::new_in(&self.scratch_dir)?)
    }

    async fn write_archive(&self, roots: Vec<PathBuf>, destination: PathBuf) -> ArchiveOutcome {
        let writer = Arc::clone(&self.writer);
        let target = destination.clone();

        let result = tokio::task::spawn_blocking(move || writer.create_archive(&roots, &target))
            .await
            .map_err(|e| AppError::Generic(format!("Archive task failed: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(()) if destination.is_file() => {
                tracing::info!("Archive created at {:?}", destination);
                ArchiveOutcome::Created(destination)
            }
            Ok(()) => ArchiveOutcome::WriteFailed("archive writer produced no file".to_string()),
            Err(e) => {
                tracing::warn!("Archive creation failed: {}", e);
                if let Err(remove_err) = fs::remove_file(&destination).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Failed to remove partial archive: {}", remove_err);
                    }
                }
                ArchiveOutcome::WriteFailed(e.to_string())
            }
        }
    }
}

async fn read_contents(database: &mut DownloadedDatabase) -> Result<Vec<(Trip, Vec<Receipt>)>> {
    let result = match database.open().await {
        Ok(()) => database.trips_with_receipts().await,
        Err(e) => Err(e),
    };
    database.close().await;
    result
}

async fn write_scratch_file(dir: &Path, file: &DownloadedFile) -> Result<PathBuf> {
    let path = dir.join(sanitize_path_component(&file.filename));
    fs::write(&path, &file.data).await?;
    Ok(path)
}

fn cleanup(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!("Failed to remove scratch directory {:?}: {}", path, e);
    }
}
