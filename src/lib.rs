//! Concurrent, mode-aware streaming inference pipeline
//!
//! Frames flow from a source through a pool of preloaded model executors to
//! an ordered display sink:
//!
//! ```text
//! FrameSource -> Producer -> InputQueue -> WorkerPool -> OutputQueue -> Consumer -> FrameSink
//! ```
//!
//! Two disciplines, fixed per run:
//! - **VIDEO** is completeness-first: no frame loss, results strictly ordered
//!   by sequence number, large buffers.
//! - **CAMERA** is latency-first: frames are dropped under load, results are
//!   freshest-wins, buffers are minimal.
//!
//! The model, the frame source and the display surface are opaque
//! collaborators behind the [`Executor`], [`FrameSource`] and [`FrameSink`]
//! traits; the pipeline is generic over their payload types and never
//! inspects them.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use infer_stream::synthetic::{NullSink, SyntheticExecutor, SyntheticSource};
//! use infer_stream::{Pipeline, PipelineConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::video();
//! let pipeline = Pipeline::new(
//!     config,
//!     SyntheticSource::finite(300, 30.0),
//!     || Ok(SyntheticExecutor::new(Duration::from_millis(40))),
//!     NullSink::default(),
//! )?;
//! let summary = pipeline.run()?;
//! println!("displayed {} frames", summary.monitor.displayed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod executor;
pub mod monitor;
pub mod pipeline;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod signal;
pub mod synthetic;

// Re-exports for convenience
pub use config::{ConfigError, PipelineConfig, PipelineMode};
pub use consumer::Consumer;
pub use executor::{Executor, FrameResult, FrameSink, FrameSource, SequencedFrame};
pub use monitor::{Monitor, MonitorSnapshot};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use pool::{Admission, PoolError, PoolStats, WorkerPool};
pub use producer::Producer;
pub use queue::{BoundedQueue, GetError, PutError};
pub use signal::StopSignal;
