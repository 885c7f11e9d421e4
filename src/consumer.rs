//! Consumer: paced presentation of results on the sink

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::executor::{Executor, FrameResult, FrameSink};
use crate::monitor::Monitor;
use crate::queue::{BoundedQueue, GetError};
use crate::signal::StopSignal;

/// Drains the output queue and presents results at the display cadence.
///
/// Owns its own executor instance, used only for `visualize`. In VIDEO mode
/// results arrive already ordered from the scheduler and the queue is drained
/// losslessly; in CAMERA mode only the freshest result is worth showing.
pub struct Consumer<K, E>
where
    E: Executor,
    K: FrameSink<Frame = E::Frame>,
{
    sink: K,
    visualizer: E,
    output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
    config: Arc<PipelineConfig>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
    target_fps: f64,
}

impl<K, E> Consumer<K, E>
where
    E: Executor,
    K: FrameSink<Frame = E::Frame> + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sink: K,
        visualizer: E,
        output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
        config: Arc<PipelineConfig>,
        monitor: Arc<Monitor>,
        stop: StopSignal,
        target_fps: f64,
    ) -> Self {
        Self {
            sink,
            visualizer,
            output,
            config,
            monitor,
            stop,
            target_fps,
        }
    }

    /// Spawns the display loop. The handle resolves to `true` when the user
    /// asked to quit.
    pub fn spawn(self) -> JoinHandle<bool> {
        thread::Builder::new()
            .name("consumer".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn consumer thread")
    }

    /// Runs until the output queue is closed and drained, the stop signal is
    /// raised, or the sink requests quit. Returns whether quit was requested.
    pub fn run(mut self) -> bool {
        let target_fps = if self.target_fps > 0.0 {
            self.target_fps
        } else {
            30.0
        };
        let interval = Duration::from_secs_f64(1.0 / target_fps);
        info!(mode = ?self.config.mode, target_fps, "consumer started");

        let mut last_show: Option<Instant> = None;
        let mut last_seq: Option<u64> = None;
        let mut displayed = 0u64;
        let mut cadence_mark = Instant::now();
        let mut quit = false;

        loop {
            if self.stop.is_stopped() {
                debug!("consumer observed stop signal");
                break;
            }
            if self.sink.poll_quit() {
                info!("quit requested, raising stop signal");
                quit = true;
                self.stop.stop();
                break;
            }

            // The get timeout doubles as the idle tick: on a gap the last
            // frame simply stays up on the sink.
            let mut result = match self.output.get(interval) {
                Ok(result) => result,
                Err(GetError::Empty) => continue,
                Err(GetError::Closed) => {
                    debug!("output queue closed and drained");
                    break;
                }
            };

            if self.config.preserve_order() {
                if let Some(prev) = last_seq {
                    if result.seq <= prev {
                        warn!(seq = result.seq, prev, "sequence regression observed");
                    }
                }
            } else {
                // Freshest wins: anything still buffered supersedes this one.
                while let Ok(newer) = self.output.try_get() {
                    result = newer;
                }
            }
            last_seq = Some(result.seq);

            // Keep consecutive shows at least one frame period apart.
            if let Some(last) = last_show {
                let elapsed = last.elapsed();
                if elapsed < interval && !self.stop.sleep(interval - elapsed) {
                    break;
                }
            }

            let FrameResult { seq, frame, output } = result;
            let rendered = match &output {
                Some(output) => self.visualizer.visualize(&frame, output),
                // Errored sentinel: present the raw frame, no overlay.
                None => frame,
            };

            if let Err(err) = self.sink.show(rendered) {
                error!(seq, error = %err, "failed to present frame");
                continue;
            }
            last_show = Some(Instant::now());
            displayed += 1;
            self.monitor.count_displayed();

            if displayed % self.config.fps_check_interval == 0 {
                let elapsed = cadence_mark.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    debug!(
                        displayed,
                        target_fps,
                        actual_fps = self.config.fps_check_interval as f64 / elapsed,
                        "display cadence check"
                    );
                }
                cadence_mark = Instant::now();
            }
        }

        self.sink.close();
        info!(displayed, quit, "consumer exited");
        quit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FrameResult;
    use crate::synthetic::{synthetic_frame, CollectingSink, SyntheticExecutor};
    use bytes::Bytes;

    type TestResult = FrameResult<Bytes, crate::synthetic::LumaStats>;

    fn result_ok(seq: u64) -> TestResult {
        let frame = synthetic_frame(seq, 64);
        let mut executor = SyntheticExecutor::new(Duration::ZERO);
        let output = executor.inference(&frame).unwrap();
        FrameResult::ok(seq, frame, output)
    }

    fn consumer_fixture(
        config: PipelineConfig,
        sink: CollectingSink,
        target_fps: f64,
    ) -> (
        Consumer<CollectingSink, SyntheticExecutor>,
        Arc<BoundedQueue<TestResult>>,
        StopSignal,
    ) {
        let output = Arc::new(BoundedQueue::new(config.output_capacity));
        let stop = StopSignal::new();
        let consumer = Consumer::new(
            sink,
            SyntheticExecutor::new(Duration::ZERO),
            Arc::clone(&output),
            Arc::new(config),
            Arc::new(Monitor::new(10, 50)),
            stop.clone(),
            target_fps,
        );
        (consumer, output, stop)
    }

    #[test]
    fn test_video_consumer_shows_everything_in_order() {
        let (sink, seen) = CollectingSink::new();
        let (consumer, output, _stop) = consumer_fixture(PipelineConfig::video(), sink, 1000.0);
        let handle = consumer.spawn();

        for seq in 0..10 {
            output.put(result_ok(seq), Duration::from_secs(1)).unwrap();
        }
        // Sentinel results are displayed too, as the raw frame.
        output
            .put(
                FrameResult::sentinel(10, synthetic_frame(10, 64)),
                Duration::from_secs(1),
            )
            .unwrap();
        output.close();

        assert!(!handle.join().unwrap(), "no quit requested");
        assert_eq!(*seen.lock(), (0..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_camera_consumer_prefers_freshest() {
        let mut config = PipelineConfig::camera();
        config.output_capacity = 8;
        let (sink, seen) = CollectingSink::new();
        let (consumer, output, _stop) = consumer_fixture(config, sink, 1000.0);

        // Backlog piles up before the consumer starts.
        for seq in 0..5 {
            output.put(result_ok(seq), Duration::from_secs(1)).unwrap();
        }
        let handle = consumer.spawn();
        thread::sleep(Duration::from_millis(100));
        output.close();
        handle.join().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1, "stale backlog collapsed to the freshest");
        assert_eq!(*seen, vec![4]);
    }

    #[test]
    fn test_quit_raises_stop_signal() {
        let (sink, seen) = CollectingSink::quitting_after(3);
        let (consumer, output, stop) = consumer_fixture(PipelineConfig::video(), sink, 1000.0);
        let handle = consumer.spawn();

        for seq in 0..50 {
            if output.put(result_ok(seq), Duration::from_millis(200)).is_err() {
                break;
            }
        }

        assert!(handle.join().unwrap(), "quit reported");
        assert!(stop.is_stopped());
        assert!(seen.lock().len() >= 3);
    }

    #[test]
    fn test_display_pacing_spaces_shows() {
        let (sink, seen) = CollectingSink::new();
        let (consumer, output, _stop) = consumer_fixture(PipelineConfig::video(), sink, 50.0);
        let handle = consumer.spawn();

        let started = Instant::now();
        for seq in 0..10 {
            output.put(result_ok(seq), Duration::from_secs(1)).unwrap();
        }
        output.close();
        handle.join().unwrap();

        // 10 shows at 50fps occupy at least 9 inter-frame gaps of 20ms.
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(seen.lock().len(), 10);
    }
}
