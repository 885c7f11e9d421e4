//! Trait seams for the opaque collaborators: model, frame source, display

use std::time::Instant;

/// A preloaded model wrapper.
///
/// Implementations are constructed (and warmed) before the pipeline starts;
/// model loading is not permitted on the hot path. Each worker owns exactly
/// one executor, so `inference` takes `&mut self` and at most one call is in
/// flight per instance.
pub trait Executor: Send + 'static {
    /// Opaque input payload. The pipeline never inspects its contents.
    type Frame: Send + 'static;
    /// Opaque model output.
    type Output: Send + 'static;

    /// Runs the model on one frame. Errors are per-frame and recoverable:
    /// the pipeline logs them, counts them and keeps flowing.
    fn inference(&mut self, frame: &Self::Frame) -> anyhow::Result<Self::Output>;

    /// Renders a result onto its frame for presentation.
    fn visualize(&mut self, frame: &Self::Frame, output: &Self::Output) -> Self::Frame;
}

/// A stream of raw frames plus a nominal rate.
pub trait FrameSource: Send {
    type Frame: Send + 'static;

    /// Pulls the next frame. `None` means no frame was available: end of
    /// stream for a file-backed source, a transient failure for a live one —
    /// the producer decides which by mode.
    fn read(&mut self) -> Option<Self::Frame>;

    /// Nominal source rate; `0.0` when unknown.
    fn fps(&self) -> f64;

    /// Releases the underlying capture resource.
    fn close(&mut self) {}
}

/// The presentation surface and its quit poll.
///
/// (Named `FrameSink` rather than `Display` to stay clear of
/// `std::fmt::Display`.)
pub trait FrameSink: Send {
    type Frame;

    fn show(&mut self, frame: Self::Frame) -> anyhow::Result<()>;

    /// True once the user asked to quit. Polled every display iteration.
    fn poll_quit(&mut self) -> bool {
        false
    }

    fn close(&mut self) {}
}

/// A frame tagged with its admission sequence number.
///
/// `seq` is unique and monotonically increasing within a run; it is the only
/// global-order authority once frames fan out across workers.
#[derive(Debug, Clone)]
pub struct SequencedFrame<F> {
    pub seq: u64,
    pub frame: F,
    pub captured_at: Instant,
}

impl<F> SequencedFrame<F> {
    pub fn new(seq: u64, frame: F) -> Self {
        Self {
            seq,
            frame,
            captured_at: Instant::now(),
        }
    }
}

/// The outcome of inference on one accepted frame.
///
/// `output` is `None` for the errored/timed-out sentinel: the frame still
/// travels to the consumer so VIDEO-mode ordering can advance past it and the
/// raw image can be shown in place of an overlay.
#[derive(Debug, Clone)]
pub struct FrameResult<F, O> {
    pub seq: u64,
    pub frame: F,
    pub output: Option<O>,
}

impl<F, O> FrameResult<F, O> {
    pub fn ok(seq: u64, frame: F, output: O) -> Self {
        Self {
            seq,
            frame,
            output: Some(output),
        }
    }

    pub fn sentinel(seq: u64, frame: F) -> Self {
        Self {
            seq,
            frame,
            output: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.output.is_some()
    }
}
