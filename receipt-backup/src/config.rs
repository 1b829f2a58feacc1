//! Application configuration constants
//!
//! Central location for file names, archive naming and throttling
//! limits used by the backup workflow.

use std::time::Duration;

// ===== File Names =====

/// File name of a downloaded snapshot database
pub const SYNC_DB_NAME: &str = "receipts_sync.db";

/// File name of the live local database inside the app data directory
pub const LOCAL_DB_NAME: &str = "receipts.db";

/// Settings file inside the app data directory
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Snapshot metadata file inside a remote snapshot directory
pub const SNAPSHOT_METADATA_FILE: &str = "metadata.json";

/// Snapshot file manifest inside a remote snapshot directory
pub const SNAPSHOT_MANIFEST_FILE: &str = "manifest.json";

// ===== Directory Names =====

/// Receipt images, one sub-directory per trip
pub const RECEIPTS_DIR: &str = "receipts";

/// Finished export archives
pub const EXPORTS_DIR: &str = "exports";

/// Staging area for downloaded snapshots
pub const STAGING_DIR: &str = "staging";

// ===== Archive Naming =====

/// Extension of every export archive
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Prefix that distinguishes the unfiltered diagnostic archive
pub const DEBUG_ARCHIVE_PREFIX: &str = "debug_";

/// Directory holding every downloaded file inside a debug archive
pub const DEBUG_FILES_DIR: &str = "files";

/// Fallback archive stem when a device name sanitizes to nothing
pub const DEFAULT_ARCHIVE_STEM: &str = "backup";

// ===== Import Throttling =====

/// Delay between consecutive receipt file downloads during import.
/// The remote store rate-limits per-file requests.
pub const DEFAULT_RECEIPT_DOWNLOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound for a configured download interval in milliseconds
pub const MIN_RECEIPT_DOWNLOAD_INTERVAL_MS: u64 = 100;

// ===== Subscriptions =====

/// Product identifier of the yearly Plus subscription
pub const PRODUCT_PLUS: &str = "plus_sku_yearly";

/// Capacity of the application event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
