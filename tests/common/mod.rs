#![allow(dead_code)]

use backup_jobs::backup::{
    ApplicationMonitor, BackupManager, JobContext, JobDefinition, ParallelExecutionManager,
};
use backup_jobs::events::{BroadcastListener, EventManager};
use backup_jobs::storage::{JobRepository, StateStore};
use backup_jobs::utils::{LogBuffer, LogSink, TransferLogEntry};
use backup_jobs::JobState;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub struct NothingRunning;

impl ApplicationMonitor for NothingRunning {
    fn is_running(&self, _process_name: &str) -> bool {
        false
    }
}

/// Records entries and sleeps after each, to keep jobs running for a while.
pub struct SlowSink {
    pub delay: Duration,
    pub entries: LogBuffer,
}

impl LogSink for SlowSink {
    fn log(&self, entry: &TransferLogEntry) {
        self.entries.log(entry);
        std::thread::sleep(self.delay);
    }
}

pub struct Engine {
    pub data: TempDir,
    pub manager: BackupManager,
    pub updates: broadcast::Sender<JobState>,
    pub logs: LogBuffer,
}

impl Engine {
    pub fn new(settings: HashMap<String, String>, per_file_delay: Duration) -> Self {
        let data = TempDir::new().unwrap();
        Self::open(data, settings, per_file_delay)
    }

    /// Builds an engine over an existing data directory, like a restart.
    pub fn open(
        data: TempDir,
        settings: HashMap<String, String>,
        per_file_delay: Duration,
    ) -> Self {
        let (updates, _) = broadcast::channel(1024);
        let events = EventManager::new(StateStore::open(data.path().join("state.json")));
        events.subscribe(Arc::new(BroadcastListener::new(updates.clone())));

        let settings = Arc::new(settings);
        let logs = LogBuffer::new(10_000);
        let executor = ParallelExecutionManager::new(settings.as_ref());
        let context = JobContext::new(settings, events)
            .with_monitor(Arc::new(NothingRunning))
            .with_log_sink(Arc::new(SlowSink {
                delay: per_file_delay,
                entries: logs.clone(),
            }));
        let repository = JobRepository::new(data.path().join("jobs.json"));
        let manager = BackupManager::open(repository, context, executor).unwrap();

        Self {
            data,
            manager,
            updates,
            logs,
        }
    }

    pub fn add(&self, definition: JobDefinition) {
        self.manager.add_job(definition).unwrap();
    }
}

pub fn write_file(root: &Path, relative: &str, size: usize) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![b'z'; size]).unwrap();
}

pub fn write_many(root: &Path, count: usize) {
    for i in 0..count {
        write_file(root, &format!("file-{:03}.dat", i), 64);
    }
}
