use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::transfer_log::{LogSink, TransferLogEntry};

/// Bounded in-memory transfer log; the oldest entries are evicted first.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<TransferLogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn get_logs(&self, limit: Option<usize>) -> Vec<TransferLogEntry> {
        let buffer = self.buffer.lock();
        let skip = match limit {
            Some(n) => buffer.len().saturating_sub(n),
            None => 0,
        };
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn for_job(&self, job_name: &str) -> Vec<TransferLogEntry> {
        self.buffer
            .lock()
            .iter()
            .filter(|entry| entry.job_name == job_name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl LogSink for LogBuffer {
    fn log(&self, entry: &TransferLogEntry) {
        if self.max_entries == 0 {
            return;
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entry(job: &str, n: u64) -> TransferLogEntry {
        TransferLogEntry::success(job, Path::new("/s"), Path::new("/t"), n, 1, None)
    }

    #[test]
    fn test_evicts_oldest() {
        let logs = LogBuffer::new(2);
        logs.log(&entry("a", 1));
        logs.log(&entry("a", 2));
        logs.log(&entry("b", 3));

        let sizes: Vec<_> = logs.get_logs(None).iter().map(|e| e.file_size).collect();
        assert_eq!(sizes, vec![Some(2), Some(3)]);
        assert_eq!(logs.get_logs(Some(1))[0].file_size, Some(3));
        assert_eq!(logs.for_job("a").len(), 1);

        logs.clear();
        assert!(logs.get_logs(None).is_empty());
    }
}
