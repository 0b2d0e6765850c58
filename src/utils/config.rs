use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Key-value lookup the engine reads its settings through.
pub trait SettingsProvider: Send + Sync {
    fn get_setting(&self, key: &str) -> Option<String>;
}

/// Setting keys understood by the engine.
pub mod keys {
    pub const BUSINESS_SOFTWARE: &str = "BusinessSoftware";
    pub const ENCRYPTION_KEY: &str = "EncryptionKey";
    pub const ENCRYPTION_EXTENSIONS: &str = "EncryptionExtensions";
    pub const PRIORITY_EXTENSIONS: &str = "PriorityExtensions";
    pub const LARGE_FILE_THRESHOLD_KB: &str = "LargeFileThresholdKb";
    pub const MAX_LARGE_TRANSFERS: &str = "MaxLargeTransfers";
    pub const ENCRYPTION_EXECUTABLE: &str = "EncryptionExecutable";
}

impl SettingsProvider for HashMap<String, String> {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Status server port
    pub port: u16,

    /// Status server bind address
    pub bind_address: String,

    /// Directory holding jobs.json, state.json and the transfer logs
    pub data_dir: PathBuf,

    /// Process name that blocks backups while it runs
    pub business_software: Option<String>,

    /// Key handed to the encryption tool
    pub encryption_key: Option<String>,

    /// External encryption executable
    pub encryption_executable: PathBuf,

    /// Extensions encrypted after copy
    pub encryption_extensions: Vec<String>,

    /// Extensions transferred ahead of other work
    pub priority_extensions: Vec<String>,

    /// Files above this size (KB) count as large transfers
    pub large_file_threshold_kb: u64,

    /// Concurrent large transfers across all jobs
    pub max_large_transfers: usize,

    /// "text" or "json"
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("backup-jobs");

        Self {
            port: 9000,
            bind_address: "127.0.0.1".to_string(),
            data_dir,
            business_software: None,
            encryption_key: None,
            encryption_executable: PathBuf::from(crate::backup::encryption::DEFAULT_EXECUTABLE),
            encryption_extensions: Vec::new(),
            priority_extensions: Vec::new(),
            large_file_threshold_kb: crate::backup::EngineSettings::DEFAULT_LARGE_FILE_THRESHOLD_KB,
            max_large_transfers: 1,
            log_format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load config from the optional settings file, then environment overrides
    pub fn load() -> Result<Self> {
        let file = std::env::var("BACKUP_CONFIG").unwrap_or_else(|_| "backup".to_string());

        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .build()
            .with_context(|| format!("reading settings file {}", file))?
            .try_deserialize()
            .context("parsing settings")?;

        // Override with environment variables
        if let Ok(port) = std::env::var("BACKUP_PORT") {
            config.port = port.parse().context("BACKUP_PORT")?;
        }

        if let Ok(bind) = std::env::var("BACKUP_BIND") {
            config.bind_address = bind;
        }

        if let Ok(dir) = std::env::var("BACKUP_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(key) = std::env::var("BACKUP_ENCRYPTION_KEY") {
            config.encryption_key = Some(key);
        }

        if let Ok(name) = std::env::var("BACKUP_BUSINESS_SOFTWARE") {
            config.business_software = Some(name);
        }

        if let Ok(format) = std::env::var("BACKUP_LOG_FORMAT") {
            config.log_format = format;
        }

        if config.max_large_transfers == 0 {
            config.max_large_transfers = 1;
        }

        Ok(config)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl SettingsProvider for Config {
    fn get_setting(&self, key: &str) -> Option<String> {
        match key {
            keys::BUSINESS_SOFTWARE => self.business_software.clone(),
            keys::ENCRYPTION_KEY => self.encryption_key.clone(),
            keys::ENCRYPTION_EXTENSIONS => Some(self.encryption_extensions.join(",")),
            keys::PRIORITY_EXTENSIONS => Some(self.priority_extensions.join(",")),
            keys::LARGE_FILE_THRESHOLD_KB => Some(self.large_file_threshold_kb.to_string()),
            keys::MAX_LARGE_TRANSFERS => Some(self.max_large_transfers.to_string()),
            keys::ENCRYPTION_EXECUTABLE => {
                Some(self.encryption_executable.to_string_lossy().into_owned())
            }
            _ => None,
        }
    }
}
