//! The scheduler: preloaded executors, sequencing, backpressure, ordering
//!
//! N long-lived worker threads consume a shared input queue; whichever worker
//! is free next pulls the next frame, and each worker exclusively owns one
//! executor for the pool's lifetime. VIDEO mode funnels results through a
//! reorder buffer so the consumer sees ascending sequence numbers; CAMERA
//! mode publishes on arrival, freshest-wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::PipelineConfig;
use crate::executor::{Executor, FrameResult, SequencedFrame};
use crate::monitor::Monitor;
use crate::queue::{BoundedQueue, GetError, PutError};
use crate::signal::StopSignal;

/// Idle-poll interval for workers and the retry slice for lossless puts.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// CAMERA-mode admission timeout: a frame that cannot be buffered almost
/// immediately is stale by definition.
const ADMIT_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum PoolError {
    /// The frame was refused by backpressure or the pool is shutting down.
    #[error("frame rejected")]
    Rejected,

    /// `process_sync` deadline passed before the matching result arrived.
    #[error("timed out waiting for result")]
    Timeout,

    /// Workers failed to quiesce within the drain deadline.
    #[error("shutdown drain exceeded {0:?}")]
    DrainTimeout(Duration),
}

/// Admission verdict for one submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { seq: u64 },
    Dropped,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    /// Frames submitted via `process`/`process_sync`.
    pub total: u64,
    /// Frames a worker finished (ok, errored or timed out).
    pub completed: u64,
    /// Frames refused before reaching a worker.
    pub dropped: u64,
    /// Frames currently inside `inference`.
    pub in_flight: usize,
    /// Current input-queue depth.
    pub queue_depth: usize,
}

/// One-shot hand-off slot for `process_sync` waiters.
struct SyncSlot<F, O> {
    result: Mutex<Option<FrameResult<F, O>>>,
    ready: Condvar,
}

impl<F, O> SyncSlot<F, O> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, result: FrameResult<F, O>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<FrameResult<F, O>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return Some(result);
            }
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.take();
            }
        }
    }
}

/// VIDEO-mode reorder buffer, touched only inside the publish critical
/// section.
struct Reorder<F, O> {
    pending: BTreeMap<u64, FrameResult<F, O>>,
    next_expected: u64,
}

struct PoolShared<F, O> {
    next_seq: AtomicU64,
    total: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    busy: AtomicUsize,
    live_workers: AtomicUsize,
    accepting: AtomicBool,
    reorder: Mutex<Reorder<F, O>>,
    waiters: Mutex<HashMap<u64, Arc<SyncSlot<F, O>>>>,
}

/// Owns the executors and the worker threads that drive them.
pub struct WorkerPool<E: Executor> {
    config: Arc<PipelineConfig>,
    input: Arc<BoundedQueue<SequencedFrame<E::Frame>>>,
    output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
    shared: Arc<PoolShared<E::Frame, E::Output>>,
    /// Preloaded in the constructor, drained by `start`.
    executors: Mutex<Vec<E>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<E: Executor> WorkerPool<E> {
    /// Constructs the pool and preloads `max_workers` executors via
    /// `make_executor`. Model loading happens here, never on the hot path.
    pub fn new(
        config: Arc<PipelineConfig>,
        mut make_executor: impl FnMut() -> anyhow::Result<E>,
        input: Arc<BoundedQueue<SequencedFrame<E::Frame>>>,
        output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
        monitor: Arc<Monitor>,
        stop: StopSignal,
    ) -> anyhow::Result<Self> {
        let loading = Instant::now();
        let mut executors = Vec::with_capacity(config.max_workers);
        for index in 0..config.max_workers {
            debug!(
                executor = index + 1,
                of = config.max_workers,
                "loading executor"
            );
            executors.push(make_executor()?);
        }
        info!(
            workers = config.max_workers,
            mode = ?config.mode,
            elapsed_ms = loading.elapsed().as_millis() as u64,
            "executors preloaded"
        );

        Ok(Self {
            config,
            input,
            output,
            monitor,
            stop,
            shared: Arc::new(PoolShared {
                next_seq: AtomicU64::new(0),
                total: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                busy: AtomicUsize::new(0),
                live_workers: AtomicUsize::new(0),
                accepting: AtomicBool::new(true),
                reorder: Mutex::new(Reorder {
                    pending: BTreeMap::new(),
                    next_expected: 0,
                }),
                waiters: Mutex::new(HashMap::new()),
            }),
            executors: Mutex::new(executors),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Brings the worker threads online. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("worker pool already started");
            return;
        }

        let executors = std::mem::take(&mut *self.executors.lock());
        let mut handles = self.handles.lock();
        for (index, executor) in executors.into_iter().enumerate() {
            self.shared.live_workers.fetch_add(1, Ordering::AcqRel);
            let worker = Worker {
                index,
                executor,
                input: Arc::clone(&self.input),
                output: Arc::clone(&self.output),
                monitor: Arc::clone(&self.monitor),
                stop: self.stop.clone(),
                shared: Arc::clone(&self.shared),
                preserve_order: self.config.preserve_order(),
                inference_timeout: self.config.inference_timeout,
            };
            let handle = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        info!(workers = handles.len(), "worker pool started");
    }

    /// Submits one frame. Returns the admission verdict; accepted frames get
    /// a unique, monotonically increasing sequence number.
    pub fn process(&self, frame: E::Frame) -> Admission {
        self.submit(frame, false).0
    }

    /// Submits one frame and waits for its result. The result is handed to
    /// the caller instead of the output queue, but still advances VIDEO-mode
    /// ordering.
    pub fn process_sync(
        &self,
        frame: E::Frame,
        timeout: Duration,
    ) -> Result<FrameResult<E::Frame, E::Output>, PoolError> {
        let (admission, slot) = self.submit(frame, true);
        let (seq, slot) = match (admission, slot) {
            (Admission::Accepted { seq }, Some(slot)) => (seq, slot),
            _ => return Err(PoolError::Rejected),
        };
        match slot.wait(timeout) {
            Some(result) => Ok(result),
            None => {
                self.shared.waiters.lock().remove(&seq);
                Err(PoolError::Timeout)
            }
        }
    }

    fn submit(
        &self,
        frame: E::Frame,
        want_sync: bool,
    ) -> (Admission, Option<Arc<SyncSlot<E::Frame, E::Output>>>) {
        let shared = &self.shared;
        shared.total.fetch_add(1, Ordering::Relaxed);

        if !shared.accepting.load(Ordering::Acquire) || self.stop.is_stopped() {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return (Admission::Dropped, None);
        }

        let backpressure = !self.config.preserve_order();
        if backpressure {
            let load = shared.busy.load(Ordering::Relaxed) + self.input.len();
            if load as f64 >= self.config.drop_threshold * self.config.max_workers as f64 {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.monitor.count_dropped_load();
                debug!(load, "load threshold reached, dropping frame");
                return (Admission::Dropped, None);
            }
        }

        let seq = shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot = if want_sync {
            let slot = Arc::new(SyncSlot::new());
            shared.waiters.lock().insert(seq, Arc::clone(&slot));
            Some(slot)
        } else {
            None
        };

        let enqueued = if self.config.preserve_order() {
            // VIDEO: lossless; keep retrying until space opens or the run
            // aborts.
            let mut item = SequencedFrame::new(seq, frame);
            loop {
                match self.input.put(item, POLL_INTERVAL) {
                    Ok(()) => break true,
                    Err(PutError::Full(back)) => {
                        if self.stop.is_stopped() {
                            break false;
                        }
                        item = back;
                    }
                    Err(PutError::Closed(_)) => break false,
                }
            }
        } else {
            match self.input.put(SequencedFrame::new(seq, frame), ADMIT_TIMEOUT) {
                Ok(()) => true,
                Err(PutError::Full(_)) => {
                    self.monitor.count_dropped_queue();
                    false
                }
                Err(PutError::Closed(_)) => false,
            }
        };

        if enqueued {
            self.monitor.count_accepted();
            (Admission::Accepted { seq }, slot)
        } else {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            if slot.is_some() {
                shared.waiters.lock().remove(&seq);
            }
            (Admission::Dropped, None)
        }
    }

    /// Closes the input side: no new frames, workers drain what is buffered.
    /// Called by the producer at end-of-stream.
    pub fn close_input(&self) {
        self.input.close();
    }

    /// Graceful shutdown: refuse new frames, drain the input queue, wait for
    /// in-flight work, close the output queue. Idempotent; safe to call
    /// twice. Fails with [`PoolError::DrainTimeout`] when workers do not
    /// quiesce within `drain_timeout`, in which case the output queue is
    /// force-closed and remaining work is discarded.
    pub fn stop(&self) -> Result<(), PoolError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("stopping worker pool");
        self.shared.accepting.store(false, Ordering::Release);
        self.input.close();

        let deadline = Instant::now() + self.config.drain_timeout;
        while self.shared.live_workers.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                self.output.close();
                warn!(
                    drain_timeout = ?self.config.drain_timeout,
                    in_flight = self.shared.busy.load(Ordering::Relaxed),
                    queued = self.input.len(),
                    "drain timeout, output force-closed"
                );
                return Err(PoolError::DrainTimeout(self.config.drain_timeout));
            }
            thread::sleep(Duration::from_millis(10));
        }

        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }

        // Ordering gaps left by an aborted run can never publish; drop them.
        let leftover = {
            let mut reorder = self.shared.reorder.lock();
            let n = reorder.pending.len();
            reorder.pending.clear();
            n
        };
        if leftover > 0 {
            debug!(leftover, "discarded unpublishable pending results");
        }

        self.output.close();
        let stats = self.stats();
        info!(
            total = stats.total,
            completed = stats.completed,
            dropped = stats.dropped,
            "worker pool stopped"
        );
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.shared.total.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            in_flight: self.shared.busy.load(Ordering::Relaxed),
            queue_depth: self.input.len(),
        }
    }
}

/// One worker thread: exclusive owner of one executor.
///
/// ```text
/// IDLE --(dequeue ok)--> BUSY --(inference done)--> PUBLISHING --> IDLE
///  |                       |
///  |                       +--(timeout/error)--> sentinel --> PUBLISHING
///  +--(queue closed & empty)--> STOPPED
/// ```
struct Worker<E: Executor> {
    index: usize,
    executor: E,
    input: Arc<BoundedQueue<SequencedFrame<E::Frame>>>,
    output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
    shared: Arc<PoolShared<E::Frame, E::Output>>,
    preserve_order: bool,
    inference_timeout: Duration,
}

impl<E: Executor> Worker<E> {
    fn run(mut self) {
        debug!(worker = self.index, "worker online");
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let item = match self.input.get(POLL_INTERVAL) {
                Ok(item) => item,
                Err(GetError::Empty) => continue,
                Err(GetError::Closed) => break,
            };
            self.handle(item);
        }
        self.shared.live_workers.fetch_sub(1, Ordering::AcqRel);
        debug!(worker = self.index, "worker offline");
    }

    fn handle(&mut self, item: SequencedFrame<E::Frame>) {
        let SequencedFrame { seq, frame, .. } = item;

        self.shared.busy.fetch_add(1, Ordering::Relaxed);
        self.monitor.processing_started();
        let started = Instant::now();
        let outcome = self.executor.inference(&frame);
        let elapsed = started.elapsed();
        self.monitor.processing_ended();
        self.shared.busy.fetch_sub(1, Ordering::Relaxed);

        let result = match outcome {
            Ok(output) if elapsed <= self.inference_timeout => {
                self.monitor.count_processed_ok();
                FrameResult::ok(seq, frame, output)
            }
            Ok(_) => {
                self.monitor.count_processed_timeout();
                warn!(
                    seq,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "inference exceeded deadline, result discarded"
                );
                FrameResult::sentinel(seq, frame)
            }
            Err(err) => {
                self.monitor.count_processed_error();
                error!(seq, error = %err, "inference failed");
                FrameResult::sentinel(seq, frame)
            }
        };

        self.shared.completed.fetch_add(1, Ordering::Relaxed);
        self.publish(result);
    }

    fn publish(&self, result: FrameResult<E::Frame, E::Output>) {
        if self.preserve_order {
            let mut reorder = self.shared.reorder.lock();
            reorder.pending.insert(result.seq, result);
            while let Some(next) = {
                let expected = reorder.next_expected;
                reorder.pending.remove(&expected)
            } {
                reorder.next_expected += 1;
                self.deliver(next);
            }
        } else {
            self.deliver(result);
        }
    }

    fn deliver(&self, result: FrameResult<E::Frame, E::Output>) {
        // Sync waiters claim their result directly; it never reaches the
        // output queue.
        if let Some(slot) = self.shared.waiters.lock().remove(&result.seq) {
            slot.fill(result);
            return;
        }

        if self.preserve_order {
            let mut item = result;
            loop {
                match self.output.put(item, POLL_INTERVAL) {
                    Ok(()) => return,
                    Err(PutError::Full(back)) => {
                        if self.stop.is_stopped() {
                            debug!(seq = back.seq, "run aborting, result discarded");
                            return;
                        }
                        item = back;
                    }
                    Err(PutError::Closed(back)) => {
                        debug!(seq = back.seq, "output closed, result discarded");
                        return;
                    }
                }
            }
        } else {
            match self.output.force_put(result) {
                Ok(Some(stale)) => {
                    trace!(evicted = stale.seq, "stale result evicted for a fresher one")
                }
                Ok(None) => {}
                Err(PutError::Closed(back)) => {
                    debug!(seq = back.seq, "output closed, result discarded")
                }
                Err(PutError::Full(_)) => unreachable!("force_put never reports full"),
            }
        }
    }
}
