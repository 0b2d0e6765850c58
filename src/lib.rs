//! Backup job engine: full and differential jobs with pause/resume/stop, run
//! in parallel under a large-file throttle and priority preemption, observed
//! and controlled over a line-delimited JSON socket protocol.

pub mod backup;
pub mod error;
pub mod events;
pub mod net;
pub mod storage;
pub mod utils;

pub use backup::{
    BackupJob, BackupManager, BackupType, JobDefinition, JobState, ParallelExecutionManager,
    RunState,
};
pub use error::{BackupError, Result};
pub use events::{BroadcastListener, EventManager, JobListener};
