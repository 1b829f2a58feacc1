//! Error types for the receipt backup library
//!
//! All errors use thiserror for structured error handling.
//! Controller operations collapse internal failures into one of the
//! coarse `Export`, `Import` or `DeleteFailed` variants.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Snapshot unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Failed to delete remote backup: {0}")]
    DeleteFailed(String),

    #[error("Purchase error: {0}")]
    Purchase(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Generic(String),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
