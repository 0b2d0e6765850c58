//! Per-file transfer log entries and the sinks that record them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TransferLogEntry {
    pub timestamp: DateTime<Utc>,
    pub job_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub file_size: Option<u64>,
    /// Copy duration; -1 when the transfer failed.
    pub transfer_time_ms: Option<i64>,
    pub encryption_time_ms: Option<i64>,
    pub details: Option<String>,
}

impl TransferLogEntry {
    pub fn success(
        job_name: &str,
        source: &Path,
        target: &Path,
        size: u64,
        transfer_ms: u64,
        encryption_ms: Option<u64>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            job_name: job_name.to_string(),
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            file_size: Some(size),
            transfer_time_ms: Some(transfer_ms as i64),
            encryption_time_ms: encryption_ms.map(|ms| ms as i64),
            details: None,
        }
    }

    pub fn failure(
        job_name: &str,
        source: &Path,
        target: &Path,
        size: u64,
        details: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            job_name: job_name.to_string(),
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            file_size: Some(size),
            transfer_time_ms: Some(-1),
            encryption_time_ms: None,
            details: Some(details),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, entry: &TransferLogEntry);
}

/// Appends entries as JSON lines to one file per day.
pub struct DailyJsonLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DailyJsonLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn file_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.jsonl", timestamp.format("%Y-%m-%d")))
    }

    fn append(&self, entry: &TransferLogEntry) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(entry.timestamp))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl LogSink for DailyJsonLog {
    fn log(&self, entry: &TransferLogEntry) {
        if let Err(e) = self.append(entry) {
            warn!("Failed to write transfer log entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_daily_log_appends_json_lines() {
        let temp = TempDir::new().unwrap();
        let log = DailyJsonLog::new(temp.path().join("logs"));

        let (a, b) = (Path::new("/s/a"), Path::new("/s/b"));
        let ok = TransferLogEntry::success("Job1", a, Path::new("/t/a"), 10, 3, Some(7));
        let failed = TransferLogEntry::failure("Job1", b, Path::new("/t/b"), 5, "denied".into());
        log.log(&ok);
        log.log(&failed);

        let content = fs::read_to_string(log.file_for(ok.timestamp)).unwrap();
        let entries: Vec<TransferLogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].encryption_time_ms, Some(7));
        assert_eq!(entries[1].transfer_time_ms, Some(-1));
        assert_eq!(entries[1].details.as_deref(), Some("denied"));
        assert!(content.contains("\"JobName\":\"Job1\""));
    }
}
