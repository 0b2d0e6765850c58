//! Fan-out of job state snapshots to the state file and to listeners.

use crate::backup::JobState;
use crate::storage::StateStore;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, warn};

/// Receives every published snapshot, in publication order.
///
/// Listeners run synchronously on the publishing job's thread and must not
/// call back into the publishing job.
pub trait JobListener: Send + Sync {
    fn on_job_state(&self, state: &JobState) -> anyhow::Result<()>;
}

struct Inner {
    store: StateStore,
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
}

#[derive(Clone)]
pub struct EventManager {
    inner: Arc<Inner>,
}

impl EventManager {
    pub fn new(store: StateStore) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn JobListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Persists the snapshot, then hands it to each listener in registration
    /// order. A failing listener is logged and skipped.
    pub fn publish(&self, state: JobState) {
        if let Err(e) = self.inner.store.upsert(state.clone()) {
            error!("Failed to persist state of '{}': {}", state.job_name, e);
        }

        let listeners = self.inner.listeners.read().clone();
        for (index, listener) in listeners.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_job_state(&state))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Listener #{} failed on '{}': {}", index, state.job_name, e),
                Err(_) => error!("Listener #{} panicked on '{}'", index, state.job_name),
            }
        }
    }

    pub fn states(&self) -> Vec<JobState> {
        self.inner.store.all()
    }

    pub fn state_of(&self, job_name: &str) -> Option<JobState> {
        self.inner.store.get(job_name)
    }

    pub fn forget(&self, job_name: &str) {
        if let Err(e) = self.inner.store.remove(job_name) {
            error!("Failed to remove state of '{}': {}", job_name, e);
        }
    }
}

/// Forwards snapshots into a tokio broadcast channel for async consumers.
pub struct BroadcastListener {
    tx: broadcast::Sender<JobState>,
}

impl BroadcastListener {
    pub fn new(tx: broadcast::Sender<JobState>) -> Self {
        Self { tx }
    }
}

impl JobListener for BroadcastListener {
    fn on_job_state(&self, state: &JobState) -> anyhow::Result<()> {
        // No receivers is not an error: nobody is connected.
        let _ = self.tx.send(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupType, JobDefinition, JobStatus, RunState};
    use parking_lot::Mutex;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl JobListener for Recorder {
        fn on_job_state(&self, state: &JobState) -> anyhow::Result<()> {
            self.seen.lock().push(format!("{}:{}", self.tag, state.job_name));
            Ok(())
        }
    }

    struct Failing;

    impl JobListener for Failing {
        fn on_job_state(&self, _state: &JobState) -> anyhow::Result<()> {
            anyhow::bail!("listener broke")
        }
    }

    struct Panicking;

    impl JobListener for Panicking {
        fn on_job_state(&self, _state: &JobState) -> anyhow::Result<()> {
            panic!("listener panicked")
        }
    }

    fn snapshot(name: &str) -> JobState {
        let mut status = JobStatus::default();
        status.state = RunState::Running;
        status.snapshot(&JobDefinition::new(name, "/s", "/t", BackupType::Full))
    }

    #[test]
    fn test_fan_out_in_order_with_isolation() {
        let events = EventManager::new(StateStore::in_memory());
        let seen = Arc::new(Mutex::new(Vec::new()));

        events.subscribe(Arc::new(Recorder { tag: "first", seen: seen.clone() }));
        events.subscribe(Arc::new(Failing));
        events.subscribe(Arc::new(Panicking));
        events.subscribe(Arc::new(Recorder { tag: "last", seen: seen.clone() }));

        events.publish(snapshot("Job1"));
        events.publish(snapshot("Job2"));

        assert_eq!(
            *seen.lock(),
            vec!["first:Job1", "last:Job1", "first:Job2", "last:Job2"]
        );
        assert_eq!(events.states().len(), 2);
    }

    #[test]
    fn test_broadcast_listener_forwards() {
        let (tx, mut rx) = broadcast::channel(8);
        let events = EventManager::new(StateStore::in_memory());
        events.subscribe(Arc::new(BroadcastListener::new(tx)));

        events.publish(snapshot("Job1"));
        assert_eq!(rx.try_recv().unwrap().job_name, "Job1");
    }

    #[test]
    fn test_forget_removes_state() {
        let events = EventManager::new(StateStore::in_memory());
        events.publish(snapshot("Job1"));
        assert!(events.state_of("Job1").is_some());
        events.forget("Job1");
        assert!(events.state_of("Job1").is_none());
    }
}
