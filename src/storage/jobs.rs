use super::JsonFile;
use crate::backup::JobDefinition;
use crate::error::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::info;

/// Persists job definitions (name, paths, type) to the jobs file.
pub struct JobRepository {
    file: JsonFile,
    write_lock: Mutex<()>,
}

impl JobRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<Vec<JobDefinition>> {
        let jobs: Vec<JobDefinition> = self.file.load()?;
        info!("Loaded {} job definitions from {}", jobs.len(), self.file.path().display());
        Ok(jobs)
    }

    pub fn save(&self, jobs: &[JobDefinition]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.file.save(jobs)
    }
}
