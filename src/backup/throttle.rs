//! Counting semaphore capping concurrent large-file transfers across jobs.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked acquirer re-checks the cancellation flag.
const CANCEL_POLL: Duration = Duration::from_millis(200);

struct Slots {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

#[derive(Clone)]
pub struct LargeFileSemaphore {
    slots: Arc<Slots>,
}

impl LargeFileSemaphore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Slots {
                available: Mutex::new(capacity),
                released: Condvar::new(),
                capacity,
            }),
        }
    }

    pub fn available(&self) -> usize {
        *self.slots.available.lock()
    }

    pub fn try_acquire(&self) -> Option<LargeFilePermit> {
        let mut available = self.slots.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(LargeFilePermit { slots: self.slots.clone() })
    }

    /// Blocks until a slot frees. Returns `None` once `cancelled` is set.
    pub fn acquire(&self, cancelled: &AtomicBool) -> Option<LargeFilePermit> {
        let mut available = self.slots.available.lock();
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return None;
            }
            if *available > 0 {
                *available -= 1;
                return Some(LargeFilePermit { slots: self.slots.clone() });
            }
            self.slots.released.wait_for(&mut available, CANCEL_POLL);
        }
    }

    /// Wakes every blocked acquirer so it can observe cancellation.
    pub fn wake_all(&self) {
        self.slots.released.notify_all();
    }
}

/// Held for the duration of one large-file copy; the slot is released on drop.
pub struct LargeFilePermit {
    slots: Arc<Slots>,
}

impl Drop for LargeFilePermit {
    fn drop(&mut self) {
        let mut available = self.slots.available.lock();
        *available = (*available + 1).min(self.slots.capacity);
        self.slots.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_try_acquire_respects_capacity() {
        let semaphore = LargeFileSemaphore::new(1);
        let permit = semaphore.try_acquire();
        assert!(permit.is_some());
        assert!(semaphore.try_acquire().is_none());
        drop(permit);
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    fn test_cap_one_never_overlaps() {
        let semaphore = LargeFileSemaphore::new(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let semaphore = semaphore.clone();
                let cancelled = cancelled.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _permit = semaphore.acquire(&cancelled).unwrap();
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_observes_cancellation() {
        let semaphore = LargeFileSemaphore::new(1);
        let _held = semaphore.try_acquire().unwrap();
        let cancelled = Arc::new(AtomicBool::new(false));

        let waiter = {
            let semaphore = semaphore.clone();
            let cancelled = cancelled.clone();
            thread::spawn(move || semaphore.acquire(&cancelled).is_none())
        };

        thread::sleep(Duration::from_millis(50));
        cancelled.store(true, Ordering::SeqCst);
        semaphore.wake_all();
        assert!(waiter.join().unwrap());
    }
}
