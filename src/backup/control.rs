use std::sync::atomic::{AtomicU8, Ordering};

/// Control signal read by a job's worker at every file boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Run,
    Pause,
    Stop,
}

impl Signal {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Signal::Pause,
            2 => Signal::Stop,
            _ => Signal::Run,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Signal::Run => 0,
            Signal::Pause => 1,
            Signal::Stop => 2,
        }
    }
}

#[derive(Debug)]
pub struct JobControl {
    signal: AtomicU8,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            signal: AtomicU8::new(Signal::Run.as_u8()),
        }
    }

    pub fn current(&self) -> Signal {
        Signal::from_u8(self.signal.load(Ordering::SeqCst))
    }

    pub fn reset(&self) {
        self.signal.store(Signal::Run.as_u8(), Ordering::SeqCst);
    }

    /// Run -> Pause. A stop request is never downgraded.
    pub fn pause(&self) -> bool {
        self.transition(Signal::Run, Signal::Pause)
    }

    /// Pause -> Run.
    pub fn resume(&self) -> bool {
        self.transition(Signal::Pause, Signal::Run)
    }

    pub fn stop(&self) {
        self.signal.store(Signal::Stop.as_u8(), Ordering::SeqCst);
    }

    /// Forces the paused signal, used when a job is restored from disk.
    pub fn set_paused(&self) {
        self.signal.store(Signal::Pause.as_u8(), Ordering::SeqCst);
    }

    fn transition(&self, from: Signal, to: Signal) -> bool {
        self.signal
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
