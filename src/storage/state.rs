use super::JsonFile;
use crate::backup::JobState;
use crate::error::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::warn;

/// In-memory collection of job snapshots keyed by job name, mirrored in full
/// to the state file on every change.
pub struct StateStore {
    file: Option<JsonFile>,
    states: Mutex<Vec<JobState>>,
}

impl StateStore {
    /// Opens the state file, seeding the collection from it. An unreadable
    /// file starts an empty collection rather than failing startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let file = JsonFile::new(path);
        let states = file.load().unwrap_or_else(|e| {
            warn!("Ignoring unreadable state file {}: {}", file.path().display(), e);
            Vec::new()
        });
        Self {
            file: Some(file),
            states: Mutex::new(states),
        }
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            states: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the snapshot with the same job name (or appends it) and
    /// rewrites the file. The lock is held across the write so concurrent
    /// publishers cannot interleave file contents.
    pub fn upsert(&self, state: JobState) -> Result<()> {
        let mut states = self.states.lock();
        match states.iter_mut().find(|s| s.job_name == state.job_name) {
            Some(existing) => *existing = state,
            None => states.push(state),
        }
        self.persist(&states)
    }

    pub fn remove(&self, job_name: &str) -> Result<()> {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|s| s.job_name != job_name);
        if states.len() == before {
            return Ok(());
        }
        self.persist(&states)
    }

    pub fn get(&self, job_name: &str) -> Option<JobState> {
        self.states.lock().iter().find(|s| s.job_name == job_name).cloned()
    }

    pub fn all(&self) -> Vec<JobState> {
        self.states.lock().clone()
    }

    fn persist(&self, states: &[JobState]) -> Result<()> {
        match &self.file {
            Some(file) => file.save(states),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupType, JobDefinition, JobStatus, RunState};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn snapshot(name: &str, state: RunState, total: u64) -> JobState {
        let def = JobDefinition::new(name, "/src", "/dst", BackupType::Full);
        let mut status = JobStatus::default();
        status.set_totals(total, total * 10);
        status.state = state;
        status.snapshot(&def)
    }

    #[test]
    fn test_upsert_replaces_by_name_and_reloads() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("state.json");

        let store = StateStore::open(&path);
        store.upsert(snapshot("Job1", RunState::Running, 3))?;
        store.upsert(snapshot("Job2", RunState::Waiting, 1))?;
        store.upsert(snapshot("Job1", RunState::Completed, 3))?;
        assert_eq!(store.all().len(), 2);

        let reopened = StateStore::open(&path);
        let job1 = reopened.get("Job1").unwrap();
        assert_eq!(job1.state, RunState::Completed);
        assert_eq!(job1.total_files, 3);
        assert_eq!(job1.total_size, 30);

        reopened.remove("Job1")?;
        assert!(StateStore::open(&path).get("Job1").is_none());
        Ok(())
    }

    #[test]
    fn test_concurrent_publishers_keep_file_valid() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("state.json");
        let store = Arc::new(StateStore::open(&path));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..25 {
                        store.upsert(snapshot(&format!("Job{i}"), RunState::Running, n)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = StateStore::open(&path);
        assert_eq!(reopened.all().len(), 4);
        assert!(reopened.all().iter().all(|s| s.total_files == 24));
        Ok(())
    }

    #[test]
    fn test_corrupt_state_file_starts_empty() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, "[{\"broken\"")?;
        assert!(StateStore::open(&path).all().is_empty());
        Ok(())
    }
}
