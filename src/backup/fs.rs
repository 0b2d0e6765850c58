//! Filesystem primitives used by the strategies and the job loop.

use crate::error::{BackupError, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Files at or above this size are hashed through a memory map.
const MMAP_HASH_THRESHOLD: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FileSystemService;

impl FileSystemService {
    pub fn new() -> Self {
        Self
    }

    /// Lists every regular file under `root`, recursively, in a stable
    /// (file-name sorted) order. Unreadable entries are skipped.
    pub fn list_files(&self, root: &Path) -> Result<Vec<FileEntry>> {
        if !root.is_dir() {
            return Err(BackupError::SourceMissing(root.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => files.push(FileEntry {
                    path: entry.into_path(),
                    size: metadata.len(),
                }),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        debug!("Listed {} files under {}", files.len(), root.display());
        Ok(files)
    }

    /// Copies `source` to `target`, creating missing parent directories and
    /// overwriting an existing target.
    pub fn copy_file(&self, source: &Path, target: &Path) -> io::Result<u64> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)
    }

    pub fn hash_file(&self, path: &Path) -> io::Result<blake3::Hash> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut hasher = blake3::Hasher::new();
        if len >= MMAP_HASH_THRESHOLD {
            // SAFETY: the map is read-only and dropped before returning. A file
            // truncated concurrently can fault; backups of files being rewritten
            // are already undefined.
            let map = unsafe { Mmap::map(&file)? };
            hasher.update(&map);
        } else {
            io::copy(&mut BufReader::new(file), &mut hasher)?;
        }
        Ok(hasher.finalize())
    }

    pub fn same_content(&self, left: &Path, right: &Path) -> io::Result<bool> {
        Ok(self.hash_file(left)? == self.hash_file(right)?)
    }
}
