//! File-selection strategies: which source files a run must transfer.

use super::fs::{FileEntry, FileSystemService};
use super::status::JobStatus;
use super::{BackupType, JobDefinition};
use crate::error::Result;
use rayon::prelude::*;
use tracing::{debug, info, warn};

pub trait BackupStrategy: Send + Sync {
    /// Returns the ordered list of source files to transfer and records the
    /// totals on `status`.
    fn select_files(&self, job: &JobDefinition, status: &mut JobStatus) -> Result<Vec<FileEntry>>;
}

pub fn for_type(backup_type: BackupType, fs: FileSystemService) -> Box<dyn BackupStrategy> {
    match backup_type {
        BackupType::Full => Box::new(FullBackup::new(fs)),
        BackupType::Differential => Box::new(DifferentialBackup::new(fs)),
    }
}

fn record_totals(status: &mut JobStatus, files: &[FileEntry]) {
    status.set_totals(files.len() as u64, files.iter().map(|f| f.size).sum());
}

/// Every file under the source tree.
pub struct FullBackup {
    fs: FileSystemService,
}

impl FullBackup {
    pub fn new(fs: FileSystemService) -> Self {
        Self { fs }
    }
}

impl BackupStrategy for FullBackup {
    fn select_files(&self, job: &JobDefinition, status: &mut JobStatus) -> Result<Vec<FileEntry>> {
        let files = self.fs.list_files(&job.source_path)?;
        record_totals(status, &files);
        info!("Full backup '{}': {} files selected", job.name, files.len());
        Ok(files)
    }
}

/// Files missing at the target or whose content hash differs from it.
pub struct DifferentialBackup {
    fs: FileSystemService,
}

impl DifferentialBackup {
    pub fn new(fs: FileSystemService) -> Self {
        Self { fs }
    }

    fn needs_transfer(&self, job: &JobDefinition, entry: &FileEntry) -> bool {
        let target = match job.target_for(&entry.path) {
            Some(target) => target,
            None => return true,
        };
        if !target.is_file() {
            return true;
        }
        match self.fs.same_content(&entry.path, &target) {
            Ok(same) => !same,
            Err(e) => {
                // Unhashable pair: transfer it and let the copy surface the error.
                warn!("Could not compare {}: {}", entry.path.display(), e);
                true
            }
        }
    }
}

impl BackupStrategy for DifferentialBackup {
    fn select_files(&self, job: &JobDefinition, status: &mut JobStatus) -> Result<Vec<FileEntry>> {
        let candidates = self.fs.list_files(&job.source_path)?;
        let scanned = candidates.len();

        let files: Vec<FileEntry> = candidates
            .into_par_iter()
            .filter(|entry| self.needs_transfer(job, entry))
            .collect();

        debug!("Differential scan of '{}' compared {} files", job.name, scanned);
        record_totals(status, &files);
        info!(
            "Differential backup '{}': {} of {} files changed",
            job.name,
            files.len(),
            scanned
        );
        Ok(files)
    }
}
