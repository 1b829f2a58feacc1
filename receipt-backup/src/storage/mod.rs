//! Storage module
//!
//! Receipt image storage and archive creation.

pub mod archive;
pub mod receipt_files;

pub use archive::{ArchiveOutcome, ArchiveWriter, ZipArchiveWriter};
pub use receipt_files::ReceiptFiles;
