//! Shared stop signal checked at every blocking boundary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clonable one-way latch shared by every actor in a run.
///
/// Raised by the consumer on user quit, by the driver on SIGINT, or by
/// anybody that needs the run to wind down. Actors poll it at each blocking
/// boundary and exit within one queue-timeout interval.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Idempotent.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The raw flag, for wiring into OS signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleeps up to `duration`, waking early if the signal is raised.
    /// Returns false when interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latch_is_shared_across_clones() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_sleep_interrupted_by_stop() {
        let signal = StopSignal::new();
        let other = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            other.stop();
        });

        let started = Instant::now();
        let completed = signal.sleep(Duration::from_secs(10));
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_runs_to_completion() {
        let signal = StopSignal::new();
        assert!(signal.sleep(Duration::from_millis(10)));
    }
}
