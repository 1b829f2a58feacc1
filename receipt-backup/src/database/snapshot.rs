//! Downloaded snapshot databases
//!
//! A snapshot is a copy of the local schema pulled from the remote
//! store. The handle owns the staged file until it is discarded.

use super::models::{Receipt, Trip};
use super::repository::{fetch_receipts, fetch_trips};
use super::snapshot_options;
use crate::error::{AppError, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// Handle to a downloaded copy of the receipts database
#[derive(Debug)]
pub struct DownloadedDatabase {
    path: PathBuf,
    pool: Option<SqlitePool>,
}

impl DownloadedDatabase {
    pub fn new(path: PathBuf) -> Self {
        Self { path, pool: None }
    }

    /// Location of the staged database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.pool.is_some()
    }

    /// Open the staged file. Opening twice is a no-op.
    pub async fn open(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        if !self.path.is_file() {
            return Err(AppError::SourceUnavailable(format!(
                "Snapshot database missing: {}",
                self.path.display()
            )));
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(snapshot_options(&self.path))
            .await
            .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;

        // Reject files that are not a receipts snapshot
        sqlx::query("SELECT 1 FROM trips LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;

        tracing::debug!("Opened snapshot database {:?}", self.path);
        self.pool = Some(pool);
        Ok(())
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| AppError::SourceUnavailable("Snapshot database is not open".to_string()))
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>> {
        fetch_trips(self.pool()?).await
    }

    pub async fn list_receipts(&self, trip: &Trip) -> Result<Vec<Receipt>> {
        fetch_receipts(self.pool()?, &trip.id).await
    }

    /// Every trip paired with its receipts, in listing order
    pub async fn trips_with_receipts(&self) -> Result<Vec<(Trip, Vec<Receipt>)>> {
        let trips = self.list_trips().await?;
        let mut result = Vec::with_capacity(trips.len());
        for trip in trips {
            let receipts = self.list_receipts(&trip).await?;
            result.push((trip, receipts));
        }
        Ok(result)
    }

    /// Release the connection. The staged file stays on disk.
    pub async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::debug!("Closed snapshot database {:?}", self.path);
        }
    }

    /// Close and delete the staged file
    pub async fn discard(mut self) {
        self.close().await;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove snapshot {:?}: {}", self.path, e);
            }
        }

        // Staging directories are per download; only removed once empty
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
    }
}
