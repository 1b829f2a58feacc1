//! Receipt image storage
//!
//! Receipt images live under the receipts root, one directory per trip.
//!
//! Example: receipt file "img123.jpg" of trip "Paris" is stored at
//! "receipts/Paris/img123.jpg"

use crate::database::{Receipt, Trip};
use crate::error::{AppError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local receipt image store
#[derive(Clone, Debug)]
pub struct ReceiptFiles {
    root: PathBuf,
}

impl ReceiptFiles {
    /// Create a store rooted at the given directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Receipt storage initialized at: {:?}", self.root);
        Ok(())
    }

    /// Image location for a receipt, if it has a file
    pub fn image_path(&self, trip: &Trip, receipt: &Receipt) -> Option<PathBuf> {
        receipt.image_file_path(trip, &self.root)
    }

    /// Write bytes to `path`, creating parent directories as needed
    pub async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if !self.contains(path) {
            return Err(AppError::Generic(format!(
                "Refusing to write outside receipt storage: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file first, then rename into place
        let temp_path = path.with_extension("part");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;

        tracing::debug!("Wrote receipt file: {:?} ({} bytes)", path, data.len());
        Ok(())
    }

    fn contains(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(relative) => relative.components().all(|c| matches!(c, Component::Normal(_))),
            Err(_) => false,
        }
    }
}
