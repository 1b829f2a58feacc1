//! Archive writer
//!
//! Packs a set of root paths into a single ZIP file. A root file becomes
//! a top-level entry, a root directory becomes `<dir name>/...` entries.

use crate::error::{AppError, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Result of writing an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Archive written at the contained path
    Created(PathBuf),
    /// The writer failed; nothing usable exists at the destination
    WriteFailed(String),
    /// The snapshot feeding the archive could not be opened
    SourceUnavailable,
}

impl ArchiveOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArchiveOutcome::Created(path) => Some(path),
            _ => None,
        }
    }
}

/// Creates an archive from root paths
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveWriter: Send + Sync {
    fn create_archive(&self, roots: &[PathBuf], destination: &Path) -> Result<()>;
}

/// Deflate-compressed ZIP writer
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipArchiveWriter;

impl ArchiveWriter for ZipArchiveWriter {
    fn create_archive(&self, roots: &[PathBuf], destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(destination)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for root in roots {
            let name = root
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| AppError::Generic(format!("Invalid archive root: {:?}", root)))?;

            if root.is_dir() {
                add_directory(&mut zip, root, name, options)?;
            } else {
                add_file(&mut zip, root, name, options)?;
            }
        }

        zip.finish()?;

        tracing::debug!("Archive written to {:?} ({} roots)", destination, roots.len());
        Ok(())
    }
}

fn add_file(
    zip: &mut ZipWriter<File>,
    path: &Path,
    entry_name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut source = File::open(path)?;
    zip.start_file(entry_name, options)?;
    io::copy(&mut source, zip)?;
    Ok(())
}

fn add_directory(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    zip.add_directory(format!("{}/", prefix), options)?;

    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let entry_name = format!("{}/{}", prefix, name);

        if path.is_dir() {
            add_directory(zip, &path, &entry_name, options)?;
        } else {
            add_file(zip, &path, &entry_name, options)?;
        }
    }

    Ok(())
}

/// Turn a display name into a safe single path component
pub fn sanitize_path_component(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let stem = stem.trim().trim_matches('.').to_string();
    if stem.is_empty() {
        crate::config::DEFAULT_ARCHIVE_STEM.to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn entry_names(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_files_and_directories_become_entries() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("receipts_sync.db");
        std::fs::write(&db, b"db").unwrap();
        let trip_dir = temp.path().join("Paris");
        std::fs::create_dir(&trip_dir).unwrap();
        std::fs::write(trip_dir.join("img123.jpg"), b"jpeg").unwrap();

        let dest = temp.path().join("out").join("Phone.zip");
        ZipArchiveWriter
            .create_archive(&[db, trip_dir], &dest)
            .unwrap();

        assert_eq!(
            entry_names(&dest),
            vec!["Paris/", "Paris/img123.jpg", "receipts_sync.db"]
        );

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut contents = String::new();
        archive
            .by_name("Paris/img123.jpg")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "jpeg");
    }

    #[test]
    fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.zip");

        let result = ZipArchiveWriter.create_archive(&[temp.path().join("gone.db")], &dest);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("Phone-A"), "Phone-A");
        assert_eq!(sanitize_path_component("Bob's/iPhone"), "Bob's_iPhone");
        assert_eq!(sanitize_path_component("  ..  "), "backup");
    }

    #[test]
    fn test_outcome_path() {
        let created = ArchiveOutcome::Created(PathBuf::from("/tmp/a.zip"));
        assert_eq!(created.path(), Some(Path::new("/tmp/a.zip")));
        assert_eq!(ArchiveOutcome::SourceUnavailable.path(), None);
        assert_eq!(ArchiveOutcome::WriteFailed("disk full".into()).path(), None);
    }
}
