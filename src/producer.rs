//! Producer: paced frame emission from the source into the scheduler

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, PipelineMode};
use crate::executor::{Executor, FrameSource};
use crate::monitor::Monitor;
use crate::pool::{Admission, WorkerPool};
use crate::signal::StopSignal;

/// Pulls frames from the source at the target cadence and submits them to
/// the scheduler, which owns the accept/drop decision.
pub struct Producer<S: FrameSource> {
    source: S,
    config: Arc<PipelineConfig>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
}

impl<S: FrameSource + 'static> Producer<S> {
    pub fn new(
        source: S,
        config: Arc<PipelineConfig>,
        monitor: Arc<Monitor>,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            config,
            monitor,
            stop,
        }
    }

    pub fn spawn<E>(self, pool: Arc<WorkerPool<E>>) -> JoinHandle<()>
    where
        E: Executor<Frame = S::Frame>,
    {
        thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || self.run(&pool))
            .expect("failed to spawn producer thread")
    }

    /// Runs to end-of-stream or until the stop signal is raised, then closes
    /// the input side so the workers can drain.
    pub fn run<E>(mut self, pool: &WorkerPool<E>)
    where
        E: Executor<Frame = S::Frame>,
    {
        let target_fps = self.config.effective_fps(self.source.fps());
        let interval = Duration::from_secs_f64(1.0 / target_fps);
        info!(
            mode = ?self.config.mode,
            target_fps,
            source_fps = self.source.fps(),
            "producer started"
        );

        let mut last_emit: Option<Instant> = None;
        let mut produced = 0u64;
        let mut retries = 0u32;

        loop {
            if self.stop.is_stopped() {
                debug!("producer observed stop signal");
                break;
            }

            // Pace the emission: sleep off the residual of the frame period.
            if let Some(last) = last_emit {
                let elapsed = last.elapsed();
                if elapsed < interval && !self.stop.sleep(interval - elapsed) {
                    break;
                }
            }

            match self.source.read() {
                Some(frame) => {
                    retries = 0;
                    last_emit = Some(Instant::now());
                    produced += 1;
                    self.monitor.count_produced();
                    if let Admission::Dropped = pool.process(frame) {
                        debug!(produced, "frame refused by scheduler");
                    }
                }
                None => match self.config.mode {
                    // A file-backed source has exactly one end.
                    PipelineMode::Video => {
                        info!(produced, "end of stream");
                        break;
                    }
                    // A live source hiccups; retry with backoff first.
                    PipelineMode::Camera => {
                        retries += 1;
                        if retries > self.config.read_retries {
                            warn!(
                                retries = retries - 1,
                                "source read retries exhausted, ending stream"
                            );
                            break;
                        }
                        warn!(attempt = retries, "source read failed, retrying");
                        if !self.stop.sleep(self.config.reconnect_delay) {
                            break;
                        }
                    }
                },
            }
        }

        self.source.close();
        pool.close_input();
        info!(produced, "producer exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BoundedQueue;
    use crate::synthetic::{SyntheticExecutor, SyntheticSource};
    use bytes::Bytes;

    struct FlakySource {
        inner: SyntheticSource,
        failures_left: u32,
    }

    impl FrameSource for FlakySource {
        type Frame = Bytes;

        fn read(&mut self) -> Option<Bytes> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return None;
            }
            self.inner.read()
        }

        fn fps(&self) -> f64 {
            self.inner.fps()
        }
    }

    fn pool_fixture(config: Arc<PipelineConfig>, monitor: Arc<Monitor>, stop: StopSignal) -> WorkerPool<SyntheticExecutor> {
        WorkerPool::new(
            config,
            || Ok(SyntheticExecutor::new(Duration::ZERO)),
            Arc::new(BoundedQueue::new(64)),
            Arc::new(BoundedQueue::new(64)),
            monitor,
            stop,
        )
        .unwrap()
    }

    #[test]
    fn test_video_producer_runs_to_end_of_stream() {
        let mut config = PipelineConfig::video();
        config.max_workers = 1;
        config.target_fps = Some(500.0);
        let config = Arc::new(config);
        let monitor = Arc::new(Monitor::new(config.log_interval, config.fps_window));
        let stop = StopSignal::new();
        let pool = pool_fixture(Arc::clone(&config), Arc::clone(&monitor), stop.clone());
        pool.start();

        let producer = Producer::new(
            SyntheticSource::finite(5, 0.0),
            config,
            Arc::clone(&monitor),
            stop,
        );
        producer.run(&pool);

        pool.stop().unwrap();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.produced, 5);
        assert_eq!(snapshot.accepted, 5);
        assert_eq!(pool.stats().completed, 5);
    }

    #[test]
    fn test_camera_producer_retries_then_gives_up() {
        let mut config = PipelineConfig::camera();
        config.max_workers = 1;
        config.target_fps = Some(500.0);
        config.read_retries = 2;
        config.reconnect_delay = Duration::from_millis(5);
        let config = Arc::new(config);
        let monitor = Arc::new(Monitor::new(config.log_interval, config.fps_window));
        let stop = StopSignal::new();
        let pool = pool_fixture(Arc::clone(&config), Arc::clone(&monitor), stop.clone());
        pool.start();

        // Two transient failures are absorbed; the stream then flows.
        let recovering = Producer::new(
            FlakySource {
                inner: SyntheticSource::finite(3, 30.0),
                failures_left: 2,
            },
            Arc::clone(&config),
            Arc::clone(&monitor),
            stop.clone(),
        );
        recovering.run(&pool);
        assert_eq!(monitor.snapshot().produced, 3);

        // Three consecutive failures exhaust the retry budget. The camera
        // stream ends as soon as the finite tail also reads as a failure.
        let exhausted = Producer::new(
            FlakySource {
                inner: SyntheticSource::finite(0, 30.0),
                failures_left: u32::MAX,
            },
            Arc::clone(&config),
            Arc::clone(&monitor),
            stop,
        );
        let started = Instant::now();
        exhausted.run(&pool);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(monitor.snapshot().produced, 3, "no frames from a dead source");

        pool.stop().unwrap();
    }

    #[test]
    fn test_producer_exits_promptly_on_stop() {
        let config = Arc::new(PipelineConfig::camera());
        let monitor = Arc::new(Monitor::new(10, 50));
        let stop = StopSignal::new();
        let pool = pool_fixture(Arc::clone(&config), Arc::clone(&monitor), stop.clone());
        pool.start();

        let producer = Producer::new(
            SyntheticSource::endless(30.0),
            config,
            monitor,
            stop.clone(),
        );
        let handle = producer.spawn(Arc::new(pool));
        thread::sleep(Duration::from_millis(100));
        stop.stop();

        let joined = Instant::now();
        handle.join().unwrap();
        assert!(joined.elapsed() < Duration::from_secs(2));
    }
}
