//! Runs jobs concurrently, one thread per job, and coordinates them: at most
//! `MaxLargeTransfers` large files in flight, and jobs without priority files
//! pause while another running job still has priority files to copy.

use super::job::{BackupJob, TransferCoordinator, TransferSlot};
use super::status::RunState;
use super::throttle::LargeFileSemaphore;
use super::EngineSettings;
use crate::utils::config::{keys, SettingsProvider};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const WAIT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_name: String,
    pub state: RunState,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Start,
    Resume,
}

struct ActiveJob {
    job: Arc<BackupJob>,
    units: usize,
}

struct Shared {
    semaphore: LargeFileSemaphore,
    large_file_threshold: u64,
    /// Jobs with a live unit, in registration order.
    active: Mutex<Vec<ActiveJob>>,
    idle: Condvar,
    /// Jobs paused for priority; `true` once they may resume.
    preempted: Mutex<HashMap<String, bool>>,
    released: Condvar,
    cancelled: AtomicBool,
}

#[derive(Clone)]
pub struct ParallelExecutionManager {
    shared: Arc<Shared>,
}

impl ParallelExecutionManager {
    pub fn new(settings: &dyn SettingsProvider) -> Self {
        let engine = EngineSettings::from_provider(settings);
        let max_large = settings
            .get_setting(keys::MAX_LARGE_TRANSFERS)
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(1);

        info!(
            "Parallel executor: large files over {} bytes, {} concurrent large transfer(s)",
            engine.large_file_threshold,
            max_large.max(1)
        );
        Self {
            shared: Arc::new(Shared {
                semaphore: LargeFileSemaphore::new(max_large),
                large_file_threshold: engine.large_file_threshold,
                active: Mutex::new(Vec::new()),
                idle: Condvar::new(),
                preempted: Mutex::new(HashMap::new()),
                released: Condvar::new(),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Coordinator to hand to jobs run by this executor.
    pub fn coordinator(&self) -> Arc<dyn TransferCoordinator> {
        self.shared.clone()
    }

    /// Runs every job on its own thread and blocks until all of them have
    /// completed, failed, been stopped or been paused by the user. Jobs that
    /// are already active are skipped. Outcomes come back in input order.
    pub fn execute_jobs_in_parallel(&self, jobs: Vec<Arc<BackupJob>>) -> Vec<JobOutcome> {
        if self.is_shutting_down() {
            warn!("Executor is shutting down, refusing {} job(s)", jobs.len());
            return jobs.iter().map(|job| JobOutcome::of(job, 0)).collect();
        }

        info!("Executing {} job(s) in parallel", jobs.len());
        let (tx, rx) = unbounded();
        for job in &jobs {
            if self.shared.is_active(job.name()) {
                info!("Job '{}' is already active, skipping", job.name());
                continue;
            }
            self.spawn_unit(job.clone(), Mode::Start, Some(tx.clone()));
        }
        drop(tx);

        let mut finished: HashMap<String, JobOutcome> = rx
            .iter()
            .map(|outcome| (outcome.job_name.clone(), outcome))
            .collect();
        jobs.iter()
            .map(|job| finished.remove(job.name()).unwrap_or_else(|| JobOutcome::of(job, 0)))
            .collect()
    }

    /// Resumes a paused job in the background. A job held back for priority
    /// is released to its waiting thread instead.
    pub fn resume_job(&self, job: Arc<BackupJob>) -> bool {
        if self.is_shutting_down() || job.state() != RunState::Paused {
            return false;
        }
        {
            let mut preempted = self.shared.preempted.lock();
            if let Some(released) = preempted.get_mut(job.name()) {
                *released = true;
                self.shared.released.notify_all();
                return true;
            }
        }
        self.spawn_unit(job, Mode::Resume, None);
        true
    }

    /// Pauses a job at the user's request. A job already held back for
    /// priority stays paused once priority work drains.
    pub fn pause_job(&self, job: &BackupJob) -> bool {
        if job.pause() {
            return true;
        }
        let mut preempted = self.shared.preempted.lock();
        if job.state() == RunState::Paused && preempted.remove(job.name()).is_some() {
            info!("Job '{}' held for priority is now paused by the user", job.name());
            self.shared.released.notify_all();
            return true;
        }
        false
    }

    /// Stops a job and wakes its unit if it is waiting out priority work.
    pub fn stop_job(&self, job: &BackupJob) -> bool {
        if !job.stop() {
            return false;
        }
        let _preempted = self.shared.preempted.lock();
        self.shared.released.notify_all();
        true
    }

    pub fn can_transfer_large_file(&self, size: u64) -> bool {
        self.shared.can_transfer_large_file(size)
    }

    pub fn pause_non_priority_jobs(&self) -> usize {
        self.shared.pause_non_priority_jobs()
    }

    pub fn resume_non_priority_jobs(&self) -> usize {
        self.shared.resume_non_priority_jobs()
    }

    pub fn active_jobs(&self) -> Vec<Arc<BackupJob>> {
        self.shared.active_jobs()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Refuses new work and pauses every active job after its in-flight
    /// file. Paused jobs keep their progress for a later resume.
    pub fn shutdown(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let jobs = self.shared.active_jobs();
        info!("Shutting down executor, pausing {} active job(s)", jobs.len());
        for job in &jobs {
            job.interrupt();
        }
        self.shared.semaphore.wake_all();
        self.shared.released.notify_all();
    }

    /// Blocks until no job thread is left or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.shared.active.lock();
        while !active.is_empty() {
            if self.shared.idle.wait_until(&mut active, deadline).timed_out() {
                return active.is_empty();
            }
        }
        true
    }

    fn spawn_unit(&self, job: Arc<BackupJob>, mode: Mode, results: Option<Sender<JobOutcome>>) {
        self.shared.register(&job);
        let shared = self.shared.clone();
        let unit_job = job.clone();
        let unit_results = results.clone();

        let spawned = thread::Builder::new()
            .name(format!("job-{}", job.name()))
            .spawn(move || {
                let started = Instant::now();
                let run = panic::catch_unwind(AssertUnwindSafe(|| shared.drive(&unit_job, mode)));
                if let Err(payload) = run {
                    let message = panic_message(payload.as_ref());
                    unit_job.record_failure(&format!("Job panicked: {}", message));
                }
                shared.unregister(&unit_job);
                shared.rebalance();

                let outcome = JobOutcome::of(&unit_job, started.elapsed().as_millis() as u64);
                debug!("Job '{}' unit finished in state {:?}", outcome.job_name, outcome.state);
                if let Some(tx) = unit_results {
                    let _ = tx.send(outcome);
                }
            });

        if let Err(e) = spawned {
            error!("Failed to spawn thread for job '{}': {}", job.name(), e);
            job.record_failure(&format!("Failed to start job thread: {}", e));
            self.shared.unregister(&job);
            if let Some(tx) = results {
                let _ = tx.send(JobOutcome::of(&job, 0));
            }
        }
    }
}

impl JobOutcome {
    fn of(job: &BackupJob, duration_ms: u64) -> Self {
        let status = job.status();
        Self {
            job_name: job.name().to_string(),
            state: status.state,
            duration_ms,
            error: status.error_message,
        }
    }
}

impl Shared {
    fn register(&self, job: &Arc<BackupJob>) {
        let mut active = self.active.lock();
        match active.iter_mut().find(|a| a.job.name() == job.name()) {
            Some(existing) => existing.units += 1,
            None => active.push(ActiveJob {
                job: job.clone(),
                units: 1,
            }),
        }
    }

    fn unregister(&self, job: &BackupJob) {
        let mut active = self.active.lock();
        if let Some(index) = active.iter().position(|a| a.job.name() == job.name()) {
            active[index].units -= 1;
            if active[index].units == 0 {
                active.remove(index);
            }
        }
        if active.is_empty() {
            self.idle.notify_all();
        }
    }

    fn is_active(&self, job_name: &str) -> bool {
        self.active.lock().iter().any(|a| a.job.name() == job_name)
    }

    fn active_jobs(&self) -> Vec<Arc<BackupJob>> {
        self.active.lock().iter().map(|a| a.job.clone()).collect()
    }

    /// Runs the job, then keeps resuming it for as long as it is only paused
    /// for priority. A user pause ends the unit.
    fn drive(&self, job: &BackupJob, mode: Mode) -> RunState {
        let mut state = match mode {
            Mode::Start => job.start(),
            Mode::Resume => job.resume(),
        };
        while state == RunState::Paused && self.wait_for_release(job) {
            debug!("Job '{}' released after priority transfers", job.name());
            state = job.resume();
        }
        state
    }

    /// Waits for the priority hold on `job` to lift. False when the hold was
    /// dropped, the job left `Paused` or the executor is shutting down.
    fn wait_for_release(&self, job: &BackupJob) -> bool {
        let job_name = job.name();
        let mut preempted = self.preempted.lock();
        loop {
            if job.state() != RunState::Paused {
                preempted.remove(job_name);
                return false;
            }
            match preempted.get(job_name) {
                None => return false,
                Some(true) => {
                    preempted.remove(job_name);
                    return true;
                }
                Some(false) => {}
            }
            if self.cancelled.load(Ordering::SeqCst) {
                preempted.remove(job_name);
                return false;
            }
            self.released.wait_for(&mut preempted, WAIT_POLL);
        }
    }

    fn can_transfer_large_file(&self, size: u64) -> bool {
        size <= self.large_file_threshold || self.semaphore.available() > 0
    }

    fn priority_pending(&self, jobs: &[Arc<BackupJob>]) -> bool {
        jobs.iter()
            .any(|job| job.state() == RunState::Running && job.has_pending_priority_files())
    }

    fn rebalance(&self) {
        let jobs = self.active_jobs();
        if self.priority_pending(&jobs) {
            self.pause_non_priority_jobs();
        } else {
            self.resume_non_priority_jobs();
        }
    }

    fn pause_non_priority_jobs(&self) -> usize {
        let jobs = self.active_jobs();
        let mut paused = 0;
        for job in jobs
            .iter()
            .filter(|job| job.state() == RunState::Running && !job.has_pending_priority_files())
        {
            // Registered first so the job's thread finds it when its loop exits.
            let fresh = self.preempted.lock().insert(job.name().to_string(), false).is_none();
            if job.pause() {
                info!("Job '{}' paused while priority files are pending", job.name());
                paused += 1;
            } else if fresh {
                self.preempted.lock().remove(job.name());
                self.released.notify_all();
            }
        }
        paused
    }

    fn resume_non_priority_jobs(&self) -> usize {
        let mut preempted = self.preempted.lock();
        let mut released = 0;
        for flag in preempted.values_mut().filter(|flag| !**flag) {
            *flag = true;
            released += 1;
        }
        if released > 0 {
            info!("Releasing {} job(s) held for priority files", released);
            self.released.notify_all();
        }
        released
    }
}

impl TransferCoordinator for Shared {
    fn before_file(&self, _job: &BackupJob) {
        self.rebalance();
    }

    fn acquire_transfer(&self, size: u64) -> Option<TransferSlot> {
        if self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        if size <= self.large_file_threshold {
            return Some(TransferSlot::small());
        }
        if self.semaphore.available() == 0 {
            debug!("Waiting for a large-file slot ({} bytes)", size);
        }
        self.semaphore.acquire(&self.cancelled).map(TransferSlot::large)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
