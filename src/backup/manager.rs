use super::job::{BackupJob, JobContext};
use super::parallel::{JobOutcome, ParallelExecutionManager};
use super::selection::parse_selection;
use super::status::{JobState, RunState};
use super::JobDefinition;
use crate::error::{BackupError, Result};
use crate::storage::JobRepository;
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Owns the job list, its persistence and the executor that runs jobs.
#[derive(Clone)]
pub struct BackupManager {
    jobs: Arc<RwLock<Vec<Arc<BackupJob>>>>,
    repository: Arc<JobRepository>,
    context: JobContext,
    executor: ParallelExecutionManager,
}

impl BackupManager {
    pub fn new(
        repository: JobRepository,
        context: JobContext,
        executor: ParallelExecutionManager,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            repository: Arc::new(repository),
            context,
            executor,
        }
    }

    /// Creates the manager and loads the persisted jobs.
    pub fn open(
        repository: JobRepository,
        context: JobContext,
        executor: ParallelExecutionManager,
    ) -> Result<Self> {
        let manager = Self::new(repository, context, executor);
        manager.load()?;
        Ok(manager)
    }

    /// Replaces the job list with the jobs file, seeding each job's status
    /// from the state file. Interrupted runs come back paused.
    pub fn load(&self) -> Result<usize> {
        let definitions = self.repository.load()?;
        let mut jobs = Vec::with_capacity(definitions.len());
        let mut resumable = 0;

        for definition in definitions {
            let job = self.build(definition);
            match self.context.events.state_of(job.name()) {
                Some(state) => {
                    job.restore(&state);
                    if job.state() == RunState::Paused {
                        resumable += 1;
                    }
                }
                None => job.publish(),
            }
            jobs.push(job);
        }

        if resumable > 0 {
            info!("{} interrupted job(s) restored as paused", resumable);
        }
        let count = jobs.len();
        *self.jobs.write() = jobs;
        Ok(count)
    }

    pub fn add_job(&self, definition: JobDefinition) -> Result<Arc<BackupJob>> {
        if definition.name.trim().is_empty() {
            return Err(BackupError::InvalidJob("name must not be empty".to_string()));
        }
        if definition.source_path.as_os_str().is_empty()
            || definition.target_path.as_os_str().is_empty()
        {
            return Err(BackupError::InvalidJob(format!(
                "'{}' needs both a source and a target path",
                definition.name
            )));
        }

        let job = {
            let mut jobs = self.jobs.write();
            if jobs.iter().any(|job| job.name() == definition.name) {
                return Err(BackupError::DuplicateJob(definition.name));
            }
            let job = self.build(definition);
            jobs.push(job.clone());
            self.save(&jobs)?;
            job
        };

        info!("Added job '{}'", job.name());
        job.publish();
        Ok(job)
    }

    /// Stops the job if it is active, then forgets it. The job's thread may
    /// still finish its in-flight file, but publishes nothing further.
    pub fn remove_job(&self, name: &str) -> Result<()> {
        let removed = {
            let mut jobs = self.jobs.write();
            let index = jobs
                .iter()
                .position(|job| job.name() == name)
                .ok_or_else(|| BackupError::JobNotFound(name.to_string()))?;
            let removed = jobs.remove(index);
            self.save(&jobs)?;
            removed
        };

        removed.retire();
        self.executor.stop_job(&removed);
        self.context.events.forget(name);
        info!("Removed job '{}'", name);
        Ok(())
    }

    pub fn jobs(&self) -> Vec<Arc<BackupJob>> {
        self.jobs.read().clone()
    }

    pub fn job(&self, name: &str) -> Option<Arc<BackupJob>> {
        self.jobs.read().iter().find(|job| job.name() == name).cloned()
    }

    /// Current snapshot of every job, in list order.
    pub fn job_states(&self) -> Vec<JobState> {
        self.jobs.read().iter().map(|job| job.snapshot()).collect()
    }

    /// Like `job_states`, without the processed file lists.
    pub fn job_summaries(&self) -> Vec<JobState> {
        self.jobs.read().iter().map(|job| job.summary()).collect()
    }

    /// Resolves a selection expression such as `1-3;5` to job names.
    pub fn select(&self, expression: &str) -> Result<Vec<String>> {
        let jobs = self.jobs.read();
        let indices = parse_selection(expression, jobs.len())?;
        Ok(indices.into_iter().map(|i| jobs[i].name().to_string()).collect())
    }

    /// Runs the named jobs in parallel on the calling thread until they end.
    pub fn execute_jobs(&self, names: &[String]) -> Result<Vec<JobOutcome>> {
        let (jobs, unknown) = self.resolve(names);
        if let Some(name) = unknown.into_iter().next() {
            return Err(BackupError::JobNotFound(name));
        }
        Ok(self.executor.execute_jobs_in_parallel(jobs))
    }

    /// Starts the named jobs in the background. Returns the names that did
    /// not match any job.
    pub fn start_jobs(&self, names: &[String]) -> Vec<String> {
        let (jobs, unknown) = self.resolve(names);
        if jobs.is_empty() {
            return unknown;
        }

        let executor = self.executor.clone();
        let spawned = thread::Builder::new()
            .name("job-batch".to_string())
            .spawn(move || {
                for outcome in executor.execute_jobs_in_parallel(jobs) {
                    info!(
                        "Job '{}' ended as {:?} after {}ms",
                        outcome.job_name, outcome.state, outcome.duration_ms
                    );
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn job batch: {}", e);
        }
        unknown
    }

    pub fn pause_jobs(&self, names: &[String]) -> Vec<String> {
        let (jobs, unknown) = self.resolve(names);
        for job in jobs {
            if !self.executor.pause_job(&job) {
                warn!("Job '{}' is not running ({:?}), pause ignored", job.name(), job.state());
            }
        }
        unknown
    }

    pub fn resume_jobs(&self, names: &[String]) -> Vec<String> {
        let (jobs, unknown) = self.resolve(names);
        for job in jobs {
            let state = job.state();
            if !self.executor.resume_job(job.clone()) {
                warn!("Job '{}' is not paused ({:?}), resume ignored", job.name(), state);
            }
        }
        unknown
    }

    pub fn stop_jobs(&self, names: &[String]) -> Vec<String> {
        let (jobs, unknown) = self.resolve(names);
        for job in jobs {
            if !self.executor.stop_job(&job) {
                warn!("Job '{}' is not active ({:?}), stop ignored", job.name(), job.state());
            }
        }
        unknown
    }

    pub fn executor(&self) -> &ParallelExecutionManager {
        &self.executor
    }

    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn build(&self, definition: JobDefinition) -> Arc<BackupJob> {
        Arc::new(BackupJob::new(definition, self.context.clone(), self.executor.coordinator()))
    }

    fn save(&self, jobs: &[Arc<BackupJob>]) -> Result<()> {
        let definitions: Vec<JobDefinition> =
            jobs.iter().map(|job| job.definition().clone()).collect();
        self.repository.save(&definitions)
    }

    fn resolve(&self, names: &[String]) -> (Vec<Arc<BackupJob>>, Vec<String>) {
        let jobs = self.jobs.read();
        let mut found = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match jobs.iter().find(|job| job.name() == name) {
                Some(job) => found.push(job.clone()),
                None => unknown.push(name.clone()),
            }
        }
        (found, unknown)
    }
}
