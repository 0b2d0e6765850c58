pub mod control;
pub mod encryption;
pub mod extensions;
pub mod fs;
pub mod job;
pub mod manager;
pub mod monitor;
pub mod parallel;
pub mod selection;
pub mod status;
pub mod strategy;
pub mod throttle;

pub use encryption::EncryptionService;
pub use extensions::ExtensionSet;
pub use fs::{FileEntry, FileSystemService};
pub use job::{BackupJob, JobContext, TransferCoordinator, TransferSlot, Unthrottled};
pub use manager::BackupManager;
pub use monitor::{ApplicationMonitor, BusinessApplicationMonitor};
pub use parallel::ParallelExecutionManager;
pub use status::{JobState, JobStatus, RunState};
pub use strategy::{BackupStrategy, DifferentialBackup, FullBackup};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BackupType {
    #[default]
    Full,
    Differential,
}

/// Persisted definition of a backup job. Runtime status is never part of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct JobDefinition {
    pub name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    #[serde(rename = "Type")]
    pub backup_type: BackupType,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        target_path: impl Into<PathBuf>,
        backup_type: BackupType,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            target_path: target_path.into(),
            backup_type,
        }
    }

    /// Re-roots `source` under the target directory. Returns `None` when the
    /// file does not live under the source directory.
    pub fn target_for(&self, source: &Path) -> Option<PathBuf> {
        source
            .strip_prefix(&self.source_path)
            .ok()
            .map(|relative| self.target_path.join(relative))
    }
}

/// Engine settings resolved from the configuration provider.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub business_software: Option<String>,
    pub encryption_key: Option<String>,
    pub encryption_extensions: ExtensionSet,
    pub priority_extensions: ExtensionSet,
    pub large_file_threshold: u64,
}

impl EngineSettings {
    pub const DEFAULT_LARGE_FILE_THRESHOLD_KB: u64 = 1024;

    pub fn from_provider(provider: &dyn crate::utils::config::SettingsProvider) -> Self {
        use crate::utils::config::keys;

        let non_empty = |key: &str| {
            provider
                .get_setting(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let threshold_kb = non_empty(keys::LARGE_FILE_THRESHOLD_KB)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_LARGE_FILE_THRESHOLD_KB);

        Self {
            business_software: non_empty(keys::BUSINESS_SOFTWARE),
            encryption_key: non_empty(keys::ENCRYPTION_KEY),
            encryption_extensions: ExtensionSet::parse(
                &provider.get_setting(keys::ENCRYPTION_EXTENSIONS).unwrap_or_default(),
            ),
            priority_extensions: ExtensionSet::parse(
                &provider.get_setting(keys::PRIORITY_EXTENSIONS).unwrap_or_default(),
            ),
            large_file_threshold: threshold_kb.saturating_mul(1024),
        }
    }
}
