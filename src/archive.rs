//! Archive reading and scratch-space management for imports.
//!
//! Entry listing reads the ZIP central directory only; nothing is written
//! to disk until the pipeline reaches its extraction phase. Extraction goes
//! into a [`ScratchDir`] that is removed on every exit path, including
//! aborts, via `Drop`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// One file entry inside an archive, before extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Base name of the entry (directories inside the archive are ignored
    /// for resolution purposes).
    pub name: String,
    pub size: u64,
}

/// One extracted file on disk.
#[derive(Debug, Clone)]
pub struct ExtractedEntry {
    pub name: String,
    pub path: PathBuf,
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<fs::File>> {
    let file = fs::File::open(path).map_err(|e| {
        VaultError::Structural(format!("cannot open archive {}: {}", path.display(), e))
    })?;
    zip::ZipArchive::new(file)
        .map_err(|e| VaultError::Structural(format!("corrupt archive {}: {}", path.display(), e)))
}

/// Enumerates file entries (name, size) without extracting anything.
pub fn list_entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open_zip(archive_path)?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| VaultError::Structural(format!("corrupt archive entry: {}", e)))?;
        if !entry.is_file() {
            continue;
        }
        let base = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if base.is_empty() {
            continue;
        }
        entries.push(ArchiveEntry {
            name: base,
            size: entry.size(),
        });
    }

    Ok(entries)
}

/// Extracts every file entry into `dest`, preserving the archive's internal
/// paths. Entries that would escape `dest` are rejected.
pub fn extract_all(archive_path: &Path, dest: &Path) -> Result<Vec<ExtractedEntry>> {
    let mut archive = open_zip(archive_path)?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| VaultError::Structural(format!("corrupt archive entry: {}", e)))?;
        if !entry.is_file() {
            continue;
        }

        let relative = entry.enclosed_name().ok_or_else(|| {
            VaultError::Structural(format!("unsafe entry path in archive: {}", entry.name()))
        })?;
        let out_path = dest.join(&relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| VaultError::Structural(format!("extraction failed: {}", e)))?;

        let base = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        extracted.push(ExtractedEntry {
            name: base,
            path: out_path,
        });
    }

    Ok(extracted)
}

/// A per-batch scratch directory, removed when dropped.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh scratch directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(format!("batch-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}
