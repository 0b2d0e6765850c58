pub mod config;
pub mod log_buffer;
pub mod logging;
pub mod notify;
pub mod transfer_log;

pub use config::{Config, SettingsProvider};
pub use log_buffer::LogBuffer;
pub use notify::{Notifier, TracingNotifier};
pub use transfer_log::{DailyJsonLog, LogSink, TransferLogEntry};
