//! One backup job: strategy selection, business-software guard, the per-file
//! transfer loop and its pause/resume/stop checkpoints.

use super::control::{JobControl, Signal};
use super::encryption::{self, EncryptionService};
use super::fs::{FileEntry, FileSystemService};
use super::monitor::{ApplicationMonitor, BusinessApplicationMonitor};
use super::status::{JobState, JobStatus, RunState};
use super::strategy;
use super::throttle::LargeFilePermit;
use super::{EngineSettings, ExtensionSet, JobDefinition};
use crate::error::BackupError;
use crate::events::EventManager;
use crate::utils::config::{keys, SettingsProvider};
use crate::utils::log_buffer::LogBuffer;
use crate::utils::notify::{Notifier, TracingNotifier};
use crate::utils::transfer_log::{LogSink, TransferLogEntry};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const STOPPED_BY_USER: &str = "Stopped by user";

/// Services shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub settings: Arc<dyn SettingsProvider>,
    pub fs: FileSystemService,
    pub encryption: EncryptionService,
    pub monitor: Arc<dyn ApplicationMonitor>,
    pub events: EventManager,
    pub log_sink: Arc<dyn LogSink>,
    pub notifier: Arc<dyn Notifier>,
}

impl JobContext {
    pub fn new(settings: Arc<dyn SettingsProvider>, events: EventManager) -> Self {
        let executable = settings
            .get_setting(keys::ENCRYPTION_EXECUTABLE)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(encryption::DEFAULT_EXECUTABLE));

        Self {
            settings,
            fs: FileSystemService::new(),
            encryption: EncryptionService::new(executable),
            monitor: Arc::new(BusinessApplicationMonitor::new()),
            events,
            log_sink: Arc::new(LogBuffer::new(1000)),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ApplicationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Cross-job admission for file transfers.
pub trait TransferCoordinator: Send + Sync {
    /// Runs before each file; may pause `job`.
    fn before_file(&self, _job: &BackupJob) {}

    /// Admits a transfer of `size` bytes, blocking while the large-file cap is
    /// reached. `None` means the engine is shutting down.
    fn acquire_transfer(&self, size: u64) -> Option<TransferSlot>;
}

/// Admission for one copy; a large-file slot is released when this drops.
pub struct TransferSlot {
    permit: Option<LargeFilePermit>,
}

impl TransferSlot {
    pub fn small() -> Self {
        Self { permit: None }
    }

    pub fn large(permit: LargeFilePermit) -> Self {
        Self { permit: Some(permit) }
    }

    pub fn is_large(&self) -> bool {
        self.permit.is_some()
    }
}

/// Coordinator for jobs run outside the parallel executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

impl TransferCoordinator for Unthrottled {
    fn acquire_transfer(&self, _size: u64) -> Option<TransferSlot> {
        Some(TransferSlot::small())
    }
}

struct PlannedFile {
    entry: FileEntry,
    priority: bool,
}

/// File list produced once per run; the cursor survives pause/resume.
#[derive(Default)]
struct TransferPlan {
    files: Vec<PlannedFile>,
    cursor: usize,
    priority_remaining: usize,
    prepared: bool,
}

impl TransferPlan {
    fn new(entries: Vec<FileEntry>, priority: &ExtensionSet) -> Self {
        let files: Vec<PlannedFile> = entries
            .into_iter()
            .map(|entry| PlannedFile {
                priority: priority.matches(&entry.path),
                entry,
            })
            .collect();
        let priority_remaining = files.iter().filter(|f| f.priority).count();
        Self {
            files,
            cursor: 0,
            priority_remaining,
            prepared: true,
        }
    }

    fn next(&self) -> Option<FileEntry> {
        self.files.get(self.cursor).map(|f| f.entry.clone())
    }

    fn advance(&mut self) {
        if let Some(file) = self.files.get(self.cursor) {
            if file.priority {
                self.priority_remaining -= 1;
            }
            self.cursor += 1;
        }
    }
}

enum Transfer {
    Done,
    /// Admission was refused; the file stays next in line.
    Deferred,
}

pub struct BackupJob {
    definition: JobDefinition,
    status: Mutex<JobStatus>,
    control: JobControl,
    plan: Mutex<TransferPlan>,
    /// True while a thread is inside the transfer loop.
    worker_active: Mutex<bool>,
    publish_lock: Mutex<()>,
    /// Set once the job is removed; nothing is published after that.
    retired: AtomicBool,
    context: JobContext,
    coordinator: Arc<dyn TransferCoordinator>,
}

impl BackupJob {
    pub fn new(
        definition: JobDefinition,
        context: JobContext,
        coordinator: Arc<dyn TransferCoordinator>,
    ) -> Self {
        Self {
            definition,
            status: Mutex::new(JobStatus::default()),
            control: JobControl::new(),
            plan: Mutex::new(TransferPlan::default()),
            worker_active: Mutex::new(false),
            publish_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
            context,
            coordinator,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    pub fn status(&self) -> JobStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> RunState {
        self.status.lock().state
    }

    pub fn snapshot(&self) -> JobState {
        self.status.lock().snapshot(&self.definition)
    }

    /// Snapshot without the processed file list.
    pub fn summary(&self) -> JobState {
        self.status.lock().summary(&self.definition)
    }

    pub fn is_worker_active(&self) -> bool {
        *self.worker_active.lock()
    }

    pub fn has_pending_priority_files(&self) -> bool {
        self.plan.lock().priority_remaining > 0
    }

    /// Runs the job on the calling thread until it completes, fails, pauses or
    /// is stopped, and returns the resulting state. A paused job is resumed;
    /// a job whose loop is already live is left alone.
    pub fn start(&self) -> RunState {
        if self.state() == RunState::Paused {
            return self.resume();
        }
        {
            let mut active = self.worker_active.lock();
            if *active {
                debug!("Job '{}' is already running", self.name());
                return self.state();
            }
            *active = true;
        }

        self.control.reset();
        *self.plan.lock() = TransferPlan::default();
        self.update(|status| status.reset());

        let settings = EngineSettings::from_provider(self.context.settings.as_ref());
        if let Some(software) = &settings.business_software {
            if self.context.monitor.is_running(software) {
                self.abort(BackupError::BusinessSoftwareRunning(software.clone()));
                return RunState::Error;
            }
        }

        info!("Starting job '{}' ({:?})", self.name(), self.definition.backup_type);
        self.update(|status| status.state = RunState::Running);

        if let Err(e) = self.prepare_plan(&settings, &HashSet::new()) {
            self.abort(e);
            return RunState::Error;
        }
        self.run_transfers(&settings)
    }

    /// Pauses a running job. The in-flight file finishes first.
    pub fn pause(&self) -> bool {
        let paused = {
            let mut status = self.status.lock();
            if status.state == RunState::Running && self.control.pause() {
                status.state = RunState::Paused;
                true
            } else {
                false
            }
        };
        if paused {
            info!("Job '{}' paused", self.name());
            self.publish();
        }
        paused
    }

    /// Resumes a paused job from its first unprocessed file, on the calling
    /// thread. If the previous loop has not exited yet it simply carries on.
    pub fn resume(&self) -> RunState {
        let resumed = {
            let mut status = self.status.lock();
            if status.state == RunState::Paused && self.control.resume() {
                status.state = RunState::Running;
                true
            } else {
                false
            }
        };
        if !resumed {
            return self.state();
        }
        info!("Job '{}' resumed", self.name());
        self.publish();

        {
            let mut active = self.worker_active.lock();
            if *active {
                return RunState::Running;
            }
            *active = true;
        }

        let settings = EngineSettings::from_provider(self.context.settings.as_ref());
        let needs_plan = !self.plan.lock().prepared;
        if needs_plan {
            let done: HashSet<PathBuf> = self.status().processed_files.into_iter().collect();
            if let Err(e) = self.prepare_plan(&settings, &done) {
                self.abort(e);
                return RunState::Error;
            }
        }
        self.run_transfers(&settings)
    }

    /// Stops a running or paused job; it ends in `Error`.
    pub fn stop(&self) -> bool {
        let stopped = {
            let mut status = self.status.lock();
            if matches!(status.state, RunState::Running | RunState::Paused) {
                self.control.stop();
                status.fail(STOPPED_BY_USER);
                true
            } else {
                false
            }
        };
        if stopped {
            info!("Job '{}' stopped by user", self.name());
            self.publish();
        }
        stopped
    }

    /// Pauses unconditionally, used on shutdown and refused admission.
    pub fn interrupt(&self) -> bool {
        let interrupted = {
            let mut status = self.status.lock();
            if self.control.pause() {
                status.state = RunState::Paused;
                true
            } else {
                false
            }
        };
        if interrupted {
            self.publish();
        }
        interrupted
    }

    /// Records a failure raised outside the job's own error handling.
    pub fn record_failure(&self, message: &str) {
        error!("Job '{}' failed: {}", self.name(), message);
        {
            let mut status = self.status.lock();
            self.control.stop();
            status.fail(message);
        }
        *self.worker_active.lock() = false;
        self.publish();
    }

    /// Seeds status from a persisted snapshot. An interrupted run comes back
    /// as `Paused` and resumes past its processed files.
    pub fn restore(&self, state: &JobState) {
        let mut status = state.to_status();
        if matches!(status.state, RunState::Running | RunState::Paused) {
            status.state = RunState::Paused;
            status.current_source_file = None;
            status.current_target_file = None;
            self.control.set_paused();
        }
        *self.status.lock() = status;
        self.publish();
    }

    /// Stops publishing. Once this returns no snapshot of the job reaches
    /// the state file or listeners again.
    pub(crate) fn retire(&self) {
        let _order = self.publish_lock.lock();
        self.retired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn publish(&self) {
        let _order = self.publish_lock.lock();
        if self.retired.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = self.snapshot();
        self.context.events.publish(snapshot);
    }

    fn update<R>(&self, apply: impl FnOnce(&mut JobStatus) -> R) -> R {
        let result = apply(&mut self.status.lock());
        self.publish();
        result
    }

    fn prepare_plan(
        &self,
        settings: &EngineSettings,
        done: &HashSet<PathBuf>,
    ) -> crate::error::Result<()> {
        let strategy = strategy::for_type(self.definition.backup_type, self.context.fs.clone());
        let mut selected = JobStatus::default();
        let entries = strategy.select_files(&self.definition, &mut selected)?;

        let pending: Vec<FileEntry> = entries
            .into_iter()
            .filter(|entry| !done.contains(&entry.path))
            .collect();
        let pending_files = pending.len() as u64;
        let pending_size = pending.iter().map(|f| f.size).sum();
        if !done.is_empty() {
            info!(
                "Job '{}' resumes with {} of {} files left",
                self.name(),
                pending_files,
                selected.total_files
            );
        }

        *self.plan.lock() = TransferPlan::new(pending, &settings.priority_extensions);
        self.update(|status| {
            status.set_partial_totals(
                selected.total_files,
                selected.total_size,
                pending_files,
                pending_size,
            )
        });
        Ok(())
    }

    fn run_transfers(&self, settings: &EngineSettings) -> RunState {
        let started = Instant::now();
        loop {
            let next = {
                let mut active = self.worker_active.lock();
                if self.control.current() != Signal::Run {
                    *active = false;
                    None
                } else {
                    let next = self.plan.lock().next();
                    if next.is_none() {
                        self.finish(started);
                        *active = false;
                    }
                    next
                }
            };
            let file = match next {
                Some(file) => file,
                None => return self.state(),
            };

            self.coordinator.before_file(self);
            if self.control.current() != Signal::Run {
                continue;
            }

            match self.transfer(&file, settings) {
                Ok(Transfer::Done) => self.plan.lock().advance(),
                Ok(Transfer::Deferred) => {}
                Err(fatal) => {
                    self.abort(fatal);
                    return RunState::Error;
                }
            }
        }
    }

    fn transfer(
        &self,
        file: &FileEntry,
        settings: &EngineSettings,
    ) -> crate::error::Result<Transfer> {
        let target = match self.definition.target_for(&file.path) {
            Some(target) => target,
            None => {
                warn!("Job '{}': {} is outside the source tree", self.name(), file.path.display());
                self.update(|status| status.file_done(file.size));
                return Ok(Transfer::Done);
            }
        };

        let slot = match self.coordinator.acquire_transfer(file.size) {
            Some(slot) => slot,
            None => {
                self.interrupt();
                return Ok(Transfer::Deferred);
            }
        };

        self.update(|status| {
            status.current_source_file = Some(file.path.clone());
            status.current_target_file = Some(target.clone());
        });

        let copy_started = Instant::now();
        let copied = self.context.fs.copy_file(&file.path, &target);
        drop(slot);
        let transfer_ms = copy_started.elapsed().as_millis() as u64;

        if let Err(e) = copied {
            warn!("Job '{}': failed to copy {}: {}", self.name(), file.path.display(), e);
            self.context.log_sink.log(&TransferLogEntry::failure(
                self.name(),
                &file.path,
                &target,
                file.size,
                e.to_string(),
            ));
            self.update(|status| status.file_done(file.size));
            return Ok(Transfer::Done);
        }

        let mut encryption_ms = None;
        if EncryptionService::should_encrypt(&target, &settings.encryption_extensions) {
            let encrypted = settings
                .encryption_key
                .as_deref()
                .ok_or(BackupError::EncryptionKeyMissing)
                .and_then(|key| self.context.encryption.encrypt_file(&target, key));
            match encrypted {
                Ok(ms) => encryption_ms = Some(ms),
                Err(e) => {
                    self.context.log_sink.log(&TransferLogEntry::failure(
                        self.name(),
                        &file.path,
                        &target,
                        file.size,
                        e.to_string(),
                    ));
                    return Err(e);
                }
            }
        }

        debug!("Job '{}': copied {} ({} bytes)", self.name(), file.path.display(), file.size);
        self.context.log_sink.log(&TransferLogEntry::success(
            self.name(),
            &file.path,
            &target,
            file.size,
            transfer_ms,
            encryption_ms,
        ));
        self.update(|status| {
            status.file_done(file.size);
            status.processed_files.push(file.path.clone());
            if let Some(ms) = encryption_ms {
                status.encryption_time_ms += ms;
            }
        });
        Ok(Transfer::Done)
    }

    /// Marks the run completed unless a pause or stop raced the last file.
    fn finish(&self, started: Instant) {
        let completed = {
            let mut status = self.status.lock();
            if self.control.current() == Signal::Run {
                status.complete();
                true
            } else {
                false
            }
        };
        if completed {
            self.publish();
            let elapsed = std::time::Duration::from_secs(started.elapsed().as_secs());
            let message = format!(
                "Backup job '{}' completed in {}",
                self.name(),
                humantime::format_duration(elapsed)
            );
            info!("{}", message);
            self.context.notifier.show_info(&message);
        }
    }

    /// Fatal-to-job error: the run ends in `Error` and is not retried.
    fn abort(&self, error: BackupError) {
        let message = error.to_string();
        error!("Job '{}' aborted: {}", self.name(), message);
        {
            let mut status = self.status.lock();
            self.control.stop();
            status.fail(message.clone());
        }
        *self.worker_active.lock() = false;
        self.publish();
        self.context
            .notifier
            .show_error(&format!("Backup job '{}' failed: {}", self.name(), message));
    }
}
