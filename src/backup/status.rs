//! Runtime job status and its serializable snapshot.

use super::{BackupType, JobDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Waiting,
    Running,
    Paused,
    Completed,
    Error,
}

/// Mutable runtime state of one job. Only the owning `BackupJob` mutates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStatus {
    pub state: RunState,
    pub total_files: u64,
    pub total_size: u64,
    pub remaining_files: u64,
    pub remaining_size: u64,
    pub current_source_file: Option<PathBuf>,
    pub current_target_file: Option<PathBuf>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub encryption_time_ms: u64,
    pub processed_files: Vec<PathBuf>,
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn progress_percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.total_size - self.remaining_size) as f64 / self.total_size as f64 * 100.0
    }

    /// Clears counters for a fresh run.
    pub fn reset(&mut self) {
        *self = JobStatus {
            start_time: Some(Utc::now()),
            ..JobStatus::default()
        };
    }

    pub fn set_totals(&mut self, files: u64, size: u64) {
        self.total_files = files;
        self.total_size = size;
        self.remaining_files = files;
        self.remaining_size = size;
    }

    /// Sets totals for a plan of which `remaining_files`/`remaining_size` are
    /// still to be transferred.
    pub fn set_partial_totals(
        &mut self,
        files: u64,
        size: u64,
        remaining_files: u64,
        remaining_size: u64,
    ) {
        self.total_files = files;
        self.total_size = size;
        self.remaining_files = remaining_files.min(files);
        self.remaining_size = remaining_size.min(size);
    }

    pub fn file_done(&mut self, size: u64) {
        self.remaining_files = self.remaining_files.saturating_sub(1);
        self.remaining_size = self.remaining_size.saturating_sub(size);
    }

    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.end_time = Some(Utc::now());
        self.remaining_files = 0;
        self.remaining_size = 0;
        self.current_source_file = None;
        self.current_target_file = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = RunState::Error;
        self.end_time = Some(Utc::now());
        self.error_message = Some(message.into());
    }

    pub fn snapshot(&self, definition: &JobDefinition) -> JobState {
        JobState {
            processed_files: self.processed_files.clone(),
            ..self.summary(definition)
        }
    }

    /// Snapshot without `processed_files`, which only resume needs.
    pub fn summary(&self, definition: &JobDefinition) -> JobState {
        JobState {
            job_name: definition.name.clone(),
            source_path: definition.source_path.clone(),
            target_path: definition.target_path.clone(),
            backup_type: definition.backup_type,
            state: self.state,
            total_files: self.total_files,
            total_size: self.total_size,
            remaining_files: self.remaining_files,
            remaining_size: self.remaining_size,
            progress_percentage: self.progress_percentage(),
            current_source_file: self.current_source_file.clone(),
            current_target_file: self.current_target_file.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            encryption_time_ms: self.encryption_time_ms,
            processed_files: Vec::new(),
            error_message: self.error_message.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time snapshot of a job, as written to the state file and pushed
/// to remote clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct JobState {
    pub job_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    #[serde(rename = "Type")]
    pub backup_type: BackupType,
    pub state: RunState,
    pub total_files: u64,
    pub total_size: u64,
    pub remaining_files: u64,
    pub remaining_size: u64,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub current_source_file: Option<PathBuf>,
    #[serde(default)]
    pub current_target_file: Option<PathBuf>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encryption_time_ms: u64,
    #[serde(default)]
    pub processed_files: Vec<PathBuf>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl JobState {
    /// Copy without `processed_files`, as pushed to remote clients.
    pub fn summary(&self) -> JobState {
        JobState {
            job_name: self.job_name.clone(),
            source_path: self.source_path.clone(),
            target_path: self.target_path.clone(),
            backup_type: self.backup_type,
            state: self.state,
            total_files: self.total_files,
            total_size: self.total_size,
            remaining_files: self.remaining_files,
            remaining_size: self.remaining_size,
            progress_percentage: self.progress_percentage,
            current_source_file: self.current_source_file.clone(),
            current_target_file: self.current_target_file.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            encryption_time_ms: self.encryption_time_ms,
            processed_files: Vec::new(),
            error_message: self.error_message.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Rebuilds a runtime status from a persisted snapshot.
    pub fn to_status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            total_files: self.total_files,
            total_size: self.total_size,
            remaining_files: self.remaining_files.min(self.total_files),
            remaining_size: self.remaining_size.min(self.total_size),
            current_source_file: self.current_source_file.clone(),
            current_target_file: self.current_target_file.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            encryption_time_ms: self.encryption_time_ms,
            processed_files: self.processed_files.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_progress_zero_when_empty() {
        let status = JobStatus::default();
        assert_eq!(status.progress_percentage(), 0.0);
    }

    #[test]
    fn test_completed_run_reports_full_progress() {
        let mut status = JobStatus::default();
        status.set_totals(3, 503 * 1024);
        status.file_done(1024);
        assert!(status.progress_percentage() > 0.0);
        status.complete();
        assert_eq!(status.remaining_size, 0);
        assert_eq!(status.remaining_files, 0);
        assert_eq!(status.progress_percentage(), 100.0);
        assert!(status.end_time.is_some());
    }

    #[test]
    fn test_snapshot_round_trip_through_json() {
        let def = JobDefinition::new("Job1", "/src", "/dst", BackupType::Full);
        let mut status = JobStatus::default();
        status.set_totals(4, 4096);
        status.state = RunState::Running;

        let snapshot = status.snapshot(&def);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"JobName\":\"Job1\""));
        assert!(json.contains("\"State\":\"Running\""));

        let back: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_name, "Job1");
        assert_eq!(back.state, RunState::Running);
        assert_eq!(back.total_files, 4);
        assert_eq!(back.total_size, 4096);
    }

    #[test]
    fn test_summary_leaves_out_processed_files() {
        let def = JobDefinition::new("Job1", "/src", "/dst", BackupType::Full);
        let mut status = JobStatus::default();
        status.set_totals(2, 20);
        status.file_done(10);
        status.processed_files.push(PathBuf::from("/src/a"));

        let full = status.snapshot(&def);
        assert_eq!(full.processed_files.len(), 1);
        let summary = full.summary();
        assert!(summary.processed_files.is_empty());
        assert_eq!(summary.remaining_files, 1);
        assert_eq!(summary.progress_percentage, 50.0);
        assert!(status.summary(&def).processed_files.is_empty());
    }

    proptest! {
        #[test]
        fn prop_remaining_never_exceeds_total(
            sizes in proptest::collection::vec(0u64..10_000, 0..40),
            extra in 0usize..5,
        ) {
            let mut status = JobStatus::default();
            status.set_totals(sizes.len() as u64, sizes.iter().sum());

            let mut last_files = status.remaining_files;
            for size in sizes.iter().chain(std::iter::repeat(&7).take(extra)) {
                status.file_done(*size);
                prop_assert!(status.remaining_files <= status.total_files);
                prop_assert!(status.remaining_size <= status.total_size);
                prop_assert!(status.remaining_files <= last_files);
                last_files = status.remaining_files;
            }
            prop_assert_eq!(status.remaining_files, 0);
            let progress = status.progress_percentage();
            prop_assert!((0.0..=100.0).contains(&progress));
        }
    }
}
