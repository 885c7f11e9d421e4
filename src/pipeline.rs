//! Pipeline driver: wiring, lifecycle, graceful shutdown
//!
//! ```text
//! FrameSource -> Producer -> InputQueue -> WorkerPool -> OutputQueue -> Consumer -> FrameSink
//!                   ^                         |                            |
//!                   +--- pacing/backpressure -+---- stop signal -----------+
//! ```
//!
//! Every component receives exactly the queues, monitor and stop signal it
//! needs; none holds a reference back to the pipeline.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::config::{ConfigError, PipelineConfig};
use crate::consumer::Consumer;
use crate::executor::{Executor, FrameResult, FrameSink, FrameSource, SequencedFrame};
use crate::monitor::{Monitor, MonitorSnapshot};
use crate::pool::{PoolError, PoolStats, WorkerPool};
use crate::producer::Producer;
use crate::queue::BoundedQueue;
use crate::signal::StopSignal;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialise executors: {0}")]
    Executor(#[source] anyhow::Error),

    #[error("shutdown drain failed: {0}")]
    Drain(#[from] PoolError),
}

/// Final accounting for one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub monitor: MonitorSnapshot,
    pub pool: PoolStats,
    /// True when the sink asked to quit (maps to exit code 130).
    pub quit: bool,
}

/// One wired, ready-to-run pipeline.
///
/// Construction validates the configuration and preloads every executor;
/// [`run`](Pipeline::run) drives the actors to completion and joins them.
pub struct Pipeline<S, E, K>
where
    S: FrameSource + 'static,
    E: Executor<Frame = S::Frame>,
    K: FrameSink<Frame = S::Frame> + 'static,
{
    config: Arc<PipelineConfig>,
    monitor: Arc<Monitor>,
    stop: StopSignal,
    source: S,
    sink: K,
    pool: Arc<WorkerPool<E>>,
    visualizer: E,
    output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>>,
}

impl<S, E, K> Pipeline<S, E, K>
where
    S: FrameSource + 'static,
    E: Executor<Frame = S::Frame>,
    K: FrameSink<Frame = S::Frame> + 'static,
{
    /// Validates `config`, builds the queues and preloads `max_workers`
    /// executors plus one visualizer instance for the consumer.
    pub fn new(
        config: PipelineConfig,
        source: S,
        mut make_executor: impl FnMut() -> anyhow::Result<E>,
        sink: K,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let config = Arc::new(config);

        let monitor = Arc::new(Monitor::new(config.log_interval, config.fps_window));
        let stop = StopSignal::new();
        let input: Arc<BoundedQueue<SequencedFrame<E::Frame>>> =
            Arc::new(BoundedQueue::new(config.input_capacity));
        let output: Arc<BoundedQueue<FrameResult<E::Frame, E::Output>>> =
            Arc::new(BoundedQueue::new(config.output_capacity));

        let pool = WorkerPool::new(
            Arc::clone(&config),
            &mut make_executor,
            input,
            Arc::clone(&output),
            Arc::clone(&monitor),
            stop.clone(),
        )
        .map_err(PipelineError::Executor)?;
        let visualizer = make_executor().map_err(PipelineError::Executor)?;

        Ok(Self {
            config,
            monitor,
            stop,
            source,
            sink,
            pool: Arc::new(pool),
            visualizer,
            output,
        })
    }

    /// The run's stop signal, e.g. for wiring into a SIGINT handler.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.monitor)
    }

    /// Drives the run to completion.
    ///
    /// Shutdown ordering: the producer closes the input queue, workers drain
    /// and exit, the pool closes the output queue, the consumer drains and
    /// exits, and the caller's thread joins them all. A drain that exceeds
    /// `drain_timeout` force-closes the output and surfaces as
    /// [`PipelineError::Drain`].
    pub fn run(self) -> Result<RunSummary, PipelineError> {
        let Self {
            config,
            monitor,
            stop,
            source,
            sink,
            pool,
            visualizer,
            output,
        } = self;

        let target_fps = config.effective_fps(source.fps());
        info!(
            mode = ?config.mode,
            workers = config.max_workers,
            input_capacity = config.input_capacity,
            output_capacity = config.output_capacity,
            target_fps,
            "starting pipeline"
        );

        pool.start();

        let producer = Producer::new(
            source,
            Arc::clone(&config),
            Arc::clone(&monitor),
            stop.clone(),
        );
        let producer_handle = producer.spawn(Arc::clone(&pool));

        let consumer = Consumer::new(
            sink,
            visualizer,
            output,
            Arc::clone(&config),
            Arc::clone(&monitor),
            stop.clone(),
            target_fps,
        );
        let consumer_handle = consumer.spawn();

        // The producer ends on end-of-stream or on the stop signal.
        if producer_handle.join().is_err() {
            error!("producer thread panicked");
            stop.stop();
        }

        // Drain in-flight work, then close the output so the consumer ends.
        let drain = pool.stop();

        let quit = match consumer_handle.join() {
            Ok(quit) => quit,
            Err(_) => {
                error!("consumer thread panicked");
                false
            }
        };

        let summary = RunSummary {
            monitor: monitor.snapshot(),
            pool: pool.stats(),
            quit,
        };
        info!(
            produced = summary.monitor.produced,
            accepted = summary.monitor.accepted,
            processed = summary.monitor.processed(),
            displayed = summary.monitor.displayed,
            dropped = summary.monitor.dropped(),
            errors = summary.monitor.processed_error,
            quit,
            "pipeline finished"
        );

        drain?;
        Ok(summary)
    }
}
