//! Receipt databases
//!
//! Two kinds of SQLite file are opened here. The live database holds this
//! installation's trips and receipts and is migrated on startup. Snapshot
//! databases are downloaded copies that are only ever read.

pub mod models;
pub mod repository;
pub mod schema;
pub mod snapshot;

pub use models::*;
pub use repository::{ImportCounts, Repository};
pub use schema::initialize_database;
pub use snapshot::DownloadedDatabase;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Connections allowed on the live pool once migrations have committed
const LIVE_POOL_SIZE: u32 = 5;

/// Options for the live receipts database. The file is created on first use.
fn live_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
}

/// Options for a downloaded snapshot. A missing file is an error.
pub(crate) fn snapshot_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false)
}

/// Open the live receipts database, applying pending migrations first.
///
/// Migrations get their own single-connection pool which is closed before
/// the live pool opens, so no pooled connection caches a pre-migration
/// schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Opening receipts database at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migrator = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(live_options(db_path))
        .await?;
    let migrated = initialize_database(&migrator).await;
    migrator.close().await;
    migrated?;

    let pool = SqlitePoolOptions::new()
        .max_connections(LIVE_POOL_SIZE)
        .connect_with(live_options(db_path))
        .await?;

    tracing::info!("Receipts database ready");
    Ok(pool)
}
