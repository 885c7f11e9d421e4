//! Pipeline counters and rolling FPS estimates
//!
//! The monitor is shared by every stage. Counters are lock-free atomics so
//! the hot path never blocks; only the FPS timestamp windows sit behind a
//! short mutex-guarded section. An aggregate record is logged every
//! `log_interval` events per stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Rolling FPS window over the most recent event timestamps.
///
/// At least three samples spanning more than 0.1s are required for a stable
/// estimate; below that the rate is undefined.
struct FpsWindow {
    times: VecDeque<Instant>,
    window: usize,
}

impl FpsWindow {
    fn new(window: usize) -> Self {
        Self {
            times: VecDeque::with_capacity(window),
            window: window.max(3),
        }
    }

    fn push(&mut self, now: Instant) {
        if self.times.len() == self.window {
            self.times.pop_front();
        }
        self.times.push_back(now);
    }

    fn fps(&self) -> Option<f64> {
        if self.times.len() < 3 {
            return None;
        }
        let first = *self.times.front().expect("window not empty");
        let last = *self.times.back().expect("window not empty");
        let span = (last - first).as_secs_f64();
        if span <= 0.1 {
            return None;
        }
        Some((self.times.len() - 1) as f64 / span)
    }
}

struct Windows {
    produced: FpsWindow,
    processed: FpsWindow,
    displayed: FpsWindow,
}

/// Point-in-time view of every counter, plus the rolling FPS per stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSnapshot {
    pub produced: u64,
    pub accepted: u64,
    pub dropped_load: u64,
    pub dropped_queue: u64,
    pub processing: i64,
    pub processed_ok: u64,
    pub processed_error: u64,
    pub processed_timeout: u64,
    pub displayed: u64,
    pub produced_fps: Option<f64>,
    pub processed_fps: Option<f64>,
    pub displayed_fps: Option<f64>,
}

impl MonitorSnapshot {
    /// Frames with a published result, whatever the outcome.
    pub fn processed(&self) -> u64 {
        self.processed_ok + self.processed_error + self.processed_timeout
    }

    /// Frames dropped before reaching a worker.
    pub fn dropped(&self) -> u64 {
        self.dropped_load + self.dropped_queue
    }
}

/// Thread-safe pipeline metrics.
pub struct Monitor {
    produced: AtomicU64,
    accepted: AtomicU64,
    dropped_load: AtomicU64,
    dropped_queue: AtomicU64,
    processing: AtomicI64,
    processed_ok: AtomicU64,
    processed_error: AtomicU64,
    processed_timeout: AtomicU64,
    displayed: AtomicU64,
    log_interval: u64,
    windows: Mutex<Windows>,
}

impl Monitor {
    /// `log_interval` is the per-stream event cadence of the aggregate log
    /// record; `fps_window` the number of timestamps kept per stream.
    pub fn new(log_interval: u64, fps_window: usize) -> Self {
        Self {
            produced: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            dropped_load: AtomicU64::new(0),
            dropped_queue: AtomicU64::new(0),
            processing: AtomicI64::new(0),
            processed_ok: AtomicU64::new(0),
            processed_error: AtomicU64::new(0),
            processed_timeout: AtomicU64::new(0),
            displayed: AtomicU64::new(0),
            log_interval: log_interval.max(1),
            windows: Mutex::new(Windows {
                produced: FpsWindow::new(fps_window),
                processed: FpsWindow::new(fps_window),
                displayed: FpsWindow::new(fps_window),
            }),
        }
    }

    /// Producer read a frame from the source.
    pub fn count_produced(&self) {
        let count = self.produced.fetch_add(1, Ordering::Relaxed) + 1;
        self.windows.lock().produced.push(Instant::now());
        self.maybe_log("produced", count);
    }

    /// Scheduler admitted a frame and assigned it a sequence number.
    pub fn count_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Scheduler refused a frame at the load threshold.
    pub fn count_dropped_load(&self) {
        self.dropped_load.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame dropped because the input queue stayed full past the timeout.
    pub fn count_dropped_queue(&self) {
        self.dropped_queue.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker began inference on a frame.
    pub fn processing_started(&self) {
        self.processing.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker finished inference (whatever the outcome).
    pub fn processing_ended(&self) {
        self.processing.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn count_processed_ok(&self) {
        self.processed_ok.fetch_add(1, Ordering::Relaxed);
        self.count_processed();
    }

    pub fn count_processed_error(&self) {
        self.processed_error.fetch_add(1, Ordering::Relaxed);
        self.count_processed();
    }

    pub fn count_processed_timeout(&self) {
        self.processed_timeout.fetch_add(1, Ordering::Relaxed);
        self.count_processed();
    }

    fn count_processed(&self) {
        self.windows.lock().processed.push(Instant::now());
        let snapshot = self.snapshot();
        self.maybe_log("processed", snapshot.processed());
    }

    /// Consumer presented a frame on the sink.
    pub fn count_displayed(&self) {
        let count = self.displayed.fetch_add(1, Ordering::Relaxed) + 1;
        self.windows.lock().displayed.push(Instant::now());
        self.maybe_log("displayed", count);
    }

    /// Current rolling display rate, for overlay / pacing feedback.
    pub fn displayed_fps(&self) -> Option<f64> {
        self.windows.lock().displayed.fps()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let windows = self.windows.lock();
        MonitorSnapshot {
            produced: self.produced.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_load: self.dropped_load.load(Ordering::Relaxed),
            dropped_queue: self.dropped_queue.load(Ordering::Relaxed),
            processing: self.processing.load(Ordering::Relaxed),
            processed_ok: self.processed_ok.load(Ordering::Relaxed),
            processed_error: self.processed_error.load(Ordering::Relaxed),
            processed_timeout: self.processed_timeout.load(Ordering::Relaxed),
            displayed: self.displayed.load(Ordering::Relaxed),
            produced_fps: windows.produced.fps(),
            processed_fps: windows.processed.fps(),
            displayed_fps: windows.displayed.fps(),
        }
    }

    fn maybe_log(&self, stream: &'static str, count: u64) {
        if count % self.log_interval != 0 {
            return;
        }
        let s = self.snapshot();
        let queued = s.accepted.saturating_sub(s.processed() + s.processing.max(0) as u64);
        let pending = s.processed().saturating_sub(s.displayed);
        info!(
            stream,
            produced = s.produced,
            queued,
            processing = s.processing,
            processed = s.processed(),
            pending,
            displayed = s.displayed,
            dropped = s.dropped(),
            produced_fps = s.produced_fps,
            processed_fps = s.processed_fps,
            displayed_fps = s.displayed_fps,
            "pipeline progress"
        );
    }
}
