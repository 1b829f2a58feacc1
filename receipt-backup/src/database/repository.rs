//! Repository layer for database operations
//!
//! CRUD operations for trips and receipts in the live local database,
//! plus snapshot import/export.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::Utc;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::path::Path;
use uuid::Uuid;

/// Rows copied by a snapshot import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub trips: u64,
    pub receipts: u64,
}

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new trip
    pub async fn create_trip(&self, name: &str) -> Result<Trip> {
        let id = Uuid::new_v4().to_string();

        let trip = sqlx::query_as::<_, Trip>(
            r#"
            INSERT INTO trips (id, name, created_at, synced)
            VALUES (?, ?, ?, 0)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created trip: {} ({})", trip.name, id);
        Ok(trip)
    }

    /// Create a receipt inside a trip
    pub async fn create_receipt(
        &self,
        trip_id: &str,
        name: &str,
        file_name: Option<&str>,
    ) -> Result<Receipt> {
        self.insert_receipt(CreateReceiptRequest {
            trip_id: trip_id.to_string(),
            name: name.to_string(),
            file_name: file_name.map(str::to_string),
        })
        .await
    }

    async fn insert_receipt(&self, req: CreateReceiptRequest) -> Result<Receipt> {
        let id = Uuid::new_v4().to_string();

        let receipt = sqlx::query_as::<_, Receipt>(
            r#"
            INSERT INTO receipts (id, trip_id, name, file_name, sync_id, synced, created_at)
            VALUES (?, ?, ?, ?, '', 0, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.trip_id)
        .bind(&req.name)
        .bind(&req.file_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created receipt: {} for trip: {}", id, req.trip_id);
        Ok(receipt)
    }

    #[cfg(test)]
    pub(crate) async fn get_receipt(&self, id: &str) -> Result<Receipt> {
        sqlx::query_as::<_, Receipt>("SELECT * FROM receipts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::Generic(format!("Receipt not found: {}", id)))
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>> {
        fetch_trips(&self.pool).await
    }

    pub async fn list_receipts(&self, trip: &Trip) -> Result<Vec<Receipt>> {
        fetch_receipts(&self.pool, &trip.id).await
    }

    /// Record the remote identifier assigned after upload
    pub async fn set_receipt_sync_id(&self, id: &str, sync_id: &str) -> Result<()> {
        let rows = sqlx::query("UPDATE receipts SET sync_id = ?, synced = 1 WHERE id = ?")
            .bind(sync_id)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::Generic(format!("Receipt not found: {}", id)));
        }

        Ok(())
    }

    /// Flag every trip and receipt as synced or pending
    pub async fn mark_all_entries_synced(&self, synced: bool) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE trips SET synced = ?")
            .bind(synced)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE receipts SET synced = ?")
            .bind(synced)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("Marked all entries synced = {}", synced);
        Ok(())
    }

    /// Copy trips and receipts from a snapshot file into the live database.
    ///
    /// With `overwrite` the snapshot row replaces a local row with the same
    /// id; without it conflicting rows are skipped. Local rows missing from
    /// the snapshot are kept either way.
    pub async fn import_database(&self, snapshot_path: &Path, overwrite: bool) -> Result<ImportCounts> {
        tracing::info!(
            "Importing snapshot {:?} (overwrite = {})",
            snapshot_path,
            overwrite
        );

        // ATTACH is per-connection, so everything runs on one connection
        let mut conn = self.pool.acquire().await?;

        sqlx::query("ATTACH DATABASE ? AS snapshot")
            .bind(snapshot_path.to_string_lossy().to_string())
            .execute(&mut *conn)
            .await?;

        let copied = copy_snapshot(&mut conn, overwrite).await;

        let detached = sqlx::query("DETACH DATABASE snapshot")
            .execute(&mut *conn)
            .await;

        let counts = copied?;
        detached?;

        tracing::info!(
            "Imported {} trips and {} receipts",
            counts.trips,
            counts.receipts
        );
        Ok(counts)
    }

    /// Write a consistent single-file copy of the database to `dest`
    pub async fn export_snapshot(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            tokio::fs::remove_file(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        sqlx::query("VACUUM INTO ?")
            .bind(dest.to_string_lossy().to_string())
            .execute(&self.pool)
            .await?;

        tracing::debug!("Exported snapshot to {:?}", dest);
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn copy_snapshot(conn: &mut SqliteConnection, overwrite: bool) -> Result<ImportCounts> {
    let (trips_sql, receipts_sql) = if overwrite {
        (
            r#"
            INSERT INTO main.trips (id, name, created_at, synced)
            SELECT id, name, created_at, synced FROM snapshot.trips WHERE true
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                created_at = excluded.created_at,
                synced = excluded.synced
            "#,
            r#"
            INSERT INTO main.receipts (id, trip_id, name, file_name, sync_id, synced, created_at)
            SELECT id, trip_id, name, file_name, sync_id, synced, created_at
            FROM snapshot.receipts WHERE true
            ON CONFLICT(id) DO UPDATE SET
                trip_id = excluded.trip_id,
                name = excluded.name,
                file_name = excluded.file_name,
                sync_id = excluded.sync_id,
                synced = excluded.synced,
                created_at = excluded.created_at
            "#,
        )
    } else {
        (
            r#"
            INSERT OR IGNORE INTO main.trips (id, name, created_at, synced)
            SELECT id, name, created_at, synced FROM snapshot.trips
            "#,
            r#"
            INSERT OR IGNORE INTO main.receipts
                (id, trip_id, name, file_name, sync_id, synced, created_at)
            SELECT id, trip_id, name, file_name, sync_id, synced, created_at
            FROM snapshot.receipts
            "#,
        )
    };

    let mut tx = Connection::begin(conn).await?;

    let trips = sqlx::query(trips_sql).execute(&mut *tx).await?.rows_affected();
    let receipts = sqlx::query(receipts_sql)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    Ok(ImportCounts { trips, receipts })
}

/// All trips in creation order
pub(crate) async fn fetch_trips(pool: &SqlitePool) -> Result<Vec<Trip>> {
    let trips = sqlx::query_as::<_, Trip>("SELECT * FROM trips ORDER BY created_at ASC, rowid ASC")
        .fetch_all(pool)
        .await?;

    Ok(trips)
}

/// Receipts of one trip in creation order
pub(crate) async fn fetch_receipts(pool: &SqlitePool, trip_id: &str) -> Result<Vec<Receipt>> {
    let receipts = sqlx::query_as::<_, Receipt>(
        r#"
        SELECT * FROM receipts WHERE trip_id = ? ORDER BY created_at ASC, rowid ASC
        "#,
    )
    .bind(trip_id)
    .fetch_all(pool)
    .await?;

    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_pool;
    use crate::database::schema::initialize_database;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn create_test_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        Repository::new(pool)
    }

    async fn create_file_repo(dir: &Path, name: &str) -> Repository {
        Repository::new(create_pool(&dir.join(name)).await.unwrap())
    }

    #[tokio::test]
    async fn test_create_and_list_trips() {
        let repo = create_test_repo().await;

        repo.create_trip("Paris").await.unwrap();
        repo.create_trip("Berlin").await.unwrap();

        let trips = repo.list_trips().await.unwrap();
        let names: Vec<&str> = trips.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Paris", "Berlin"]);
    }

    #[tokio::test]
    async fn test_receipts_are_scoped_to_trip() {
        let repo = create_test_repo().await;

        let paris = repo.create_trip("Paris").await.unwrap();
        let berlin = repo.create_trip("Berlin").await.unwrap();
        repo.create_receipt(&paris.id, "Hotel", Some("hotel.jpg"))
            .await
            .unwrap();
        repo.create_receipt(&paris.id, "Taxi", None).await.unwrap();
        repo.create_receipt(&berlin.id, "Museum", Some("museum.jpg"))
            .await
            .unwrap();

        let receipts = repo.list_receipts(&paris).await.unwrap();
        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().all(|r| r.trip_id == paris.id));
        assert!(receipts.iter().all(|r| r.sync_id.is_empty()));
    }

    #[tokio::test]
    async fn test_set_sync_id() {
        let repo = create_test_repo().await;

        let trip = repo.create_trip("Paris").await.unwrap();
        let receipt = repo.create_receipt(&trip.id, "Hotel", None).await.unwrap();

        repo.set_receipt_sync_id(&receipt.id, "remote-1").await.unwrap();

        let fetched = repo.get_receipt(&receipt.id).await.unwrap();
        assert_eq!(fetched.sync_id, "remote-1");
        assert!(fetched.synced);

        assert!(repo.set_receipt_sync_id("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_mark_all_entries_unsynced() {
        let repo = create_test_repo().await;

        let trip = repo.create_trip("Paris").await.unwrap();
        let receipt = repo.create_receipt(&trip.id, "Hotel", None).await.unwrap();
        repo.mark_all_entries_synced(true).await.unwrap();

        repo.mark_all_entries_synced(false).await.unwrap();

        assert!(!repo.list_trips().await.unwrap()[0].synced);
        assert!(!repo.get_receipt(&receipt.id).await.unwrap().synced);
    }

    #[tokio::test]
    async fn test_import_without_overwrite_keeps_local_rows() {
        let temp = TempDir::new().unwrap();
        let source = create_file_repo(temp.path(), "source.db").await;
        let trip = source.create_trip("Paris").await.unwrap();
        let receipt = source
            .create_receipt(&trip.id, "Hotel", Some("hotel.jpg"))
            .await
            .unwrap();
        source.set_receipt_sync_id(&receipt.id, "remote-1").await.unwrap();

        let snapshot = temp.path().join("snapshot.db");
        source.export_snapshot(&snapshot).await.unwrap();

        // Local copy diverges from the snapshot
        let local = create_file_repo(temp.path(), "local.db").await;
        local.import_database(&snapshot, false).await.unwrap();
        sqlx::query("UPDATE trips SET name = 'Paris (edited)'")
            .execute(&local.pool)
            .await
            .unwrap();

        let counts = local.import_database(&snapshot, false).await.unwrap();
        assert_eq!(counts, ImportCounts::default());
        assert_eq!(local.list_trips().await.unwrap()[0].name, "Paris (edited)");
    }

    #[tokio::test]
    async fn test_import_with_overwrite_replaces_conflicts() {
        let temp = TempDir::new().unwrap();
        let source = create_file_repo(temp.path(), "source.db").await;
        let trip = source.create_trip("Paris").await.unwrap();
        source.create_receipt(&trip.id, "Hotel", None).await.unwrap();

        let snapshot = temp.path().join("snapshot.db");
        source.export_snapshot(&snapshot).await.unwrap();

        let local = create_file_repo(temp.path(), "local.db").await;
        local.import_database(&snapshot, false).await.unwrap();
        sqlx::query("UPDATE trips SET name = 'Paris (edited)'")
            .execute(&local.pool)
            .await
            .unwrap();
        let local_only = local.create_trip("Local only").await.unwrap();

        let counts = local.import_database(&snapshot, true).await.unwrap();
        assert_eq!(counts.trips, 1);
        assert_eq!(counts.receipts, 1);

        let trips = local.list_trips().await.unwrap();
        assert!(trips.iter().any(|t| t.id == trip.id && t.name == "Paris"));
        assert!(trips.iter().any(|t| t.id == local_only.id));
    }

    #[tokio::test]
    async fn test_import_of_invalid_file_fails() {
        let temp = TempDir::new().unwrap();
        let local = create_file_repo(temp.path(), "local.db").await;

        let bogus = temp.path().join("bogus.db");
        std::fs::write(&bogus, b"nope").unwrap();

        assert!(local.import_database(&bogus, true).await.is_err());
        // Connection is still usable afterwards
        assert!(local.list_trips().await.unwrap().is_empty());
    }
}
