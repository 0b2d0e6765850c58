use parking_lot::Mutex;
use sysinfo::System;
use tracing::debug;

/// Answers whether a named process is currently running.
pub trait ApplicationMonitor: Send + Sync {
    fn is_running(&self, process_name: &str) -> bool;
}

/// Process-table probe backed by `sysinfo`. Names compare case-insensitively
/// and ignore a trailing `.exe`.
pub struct BusinessApplicationMonitor {
    system: Mutex<System>,
}

impl Default for BusinessApplicationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BusinessApplicationMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn normalize(name: &str) -> String {
        let lower = name.trim().to_lowercase();
        lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
    }
}

impl ApplicationMonitor for BusinessApplicationMonitor {
    fn is_running(&self, process_name: &str) -> bool {
        let wanted = Self::normalize(process_name);
        if wanted.is_empty() {
            return false;
        }

        let mut system = self.system.lock();
        system.refresh_processes();
        let found = system
            .processes()
            .values()
            .any(|process| Self::normalize(process.name()) == wanted);

        debug!("Business software '{}' running: {}", process_name, found);
        found
    }
}
