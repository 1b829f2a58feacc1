//! Database models
//!
//! Rust structs representing database entities.
//! All models use serde so they can be printed as JSON by the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::{Component, Path, PathBuf};

/// A named grouping of receipts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
}

/// A receipt belonging to exactly one trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Receipt {
    pub id: String,
    pub trip_id: String,
    pub name: String,
    /// Image or attachment file name, if one was captured
    pub file_name: Option<String>,
    /// Remote identifier; empty until the receipt has been uploaded
    pub sync_id: String,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Whether the receipt has ever been uploaded
    pub fn is_synced_remotely(&self) -> bool {
        !self.sync_id.is_empty()
    }

    /// On-disk image location: `<root>/<trip name>/<file name>`.
    /// Names that are not a single plain path component have no location.
    pub fn image_file_path(&self, trip: &Trip, root: &Path) -> Option<PathBuf> {
        let name = self.file_name.as_deref()?;
        if !is_plain_component(&trip.name) || !is_plain_component(name) {
            return None;
        }
        Some(root.join(&trip.name).join(name))
    }
}

/// Exactly one normal component: no separators, `..`, roots or prefixes
fn is_plain_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Create receipt request
#[derive(Debug, Deserialize)]
pub struct CreateReceiptRequest {
    pub trip_id: String,
    pub name: String,
    pub file_name: Option<String>,
}
