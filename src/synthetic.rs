//! Synthetic source, executor and sink
//!
//! Stand-ins for the opaque collaborators, used by the demo binary, the
//! integration tests and the benches. Frames carry their index in the first
//! eight bytes so any stage can recover provenance without a side channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::executor::{Executor, FrameSink, FrameSource};

const INDEX_BYTES: usize = 8;
const DEFAULT_FRAME_LEN: usize = 4096;

/// Builds one synthetic frame: index header plus a deterministic fill byte.
pub fn synthetic_frame(index: u64, len: usize) -> Bytes {
    let len = len.max(INDEX_BYTES);
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u64_le(index);
    buf.resize(len, (index % 251) as u8);
    buf.freeze()
}

/// Recovers the index embedded in a synthetic frame.
pub fn frame_index(frame: &Bytes) -> u64 {
    let mut header = [0u8; INDEX_BYTES];
    header.copy_from_slice(&frame[..INDEX_BYTES]);
    u64::from_le_bytes(header)
}

/// A frame source yielding generated frames at a nominal rate.
pub struct SyntheticSource {
    remaining: Option<u64>,
    fps: f64,
    frame_len: usize,
    next_index: u64,
}

impl SyntheticSource {
    /// A file-like source: `frames` frames, then end-of-stream.
    pub fn finite(frames: u64, fps: f64) -> Self {
        Self {
            remaining: Some(frames),
            fps,
            frame_len: DEFAULT_FRAME_LEN,
            next_index: 0,
        }
    }

    /// A live-camera-like source that never runs dry.
    pub fn endless(fps: f64) -> Self {
        Self {
            remaining: None,
            fps,
            frame_len: DEFAULT_FRAME_LEN,
            next_index: 0,
        }
    }

    pub fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len;
        self
    }
}

impl FrameSource for SyntheticSource {
    type Frame = Bytes;

    fn read(&mut self) -> Option<Bytes> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let frame = synthetic_frame(self.next_index, self.frame_len);
        self.next_index += 1;
        Some(frame)
    }

    fn fps(&self) -> f64 {
        self.fps
    }
}

/// What the synthetic model "detects": the mean brightness of the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub frame_index: u64,
    pub mean_luma: f32,
}

/// An executor with a fixed compute latency and optional induced failures.
pub struct SyntheticExecutor {
    latency: Duration,
    fail_on: HashSet<u64>,
    inferences: u64,
}

impl SyntheticExecutor {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_on: HashSet::new(),
            inferences: 0,
        }
    }

    /// Fails inference for frames whose embedded index is in `indices`.
    pub fn failing_on(latency: Duration, indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            latency,
            fail_on: indices.into_iter().collect(),
            inferences: 0,
        }
    }

    pub fn inferences(&self) -> u64 {
        self.inferences
    }
}

impl Executor for SyntheticExecutor {
    type Frame = Bytes;
    type Output = LumaStats;

    fn inference(&mut self, frame: &Bytes) -> anyhow::Result<LumaStats> {
        self.inferences += 1;
        if !self.latency.is_zero() {
            // Stand-in for the model's blocking compute.
            std::thread::sleep(self.latency);
        }
        let index = frame_index(frame);
        if self.fail_on.contains(&index) {
            anyhow::bail!("synthetic inference failure on frame {index}");
        }
        let payload = &frame[INDEX_BYTES..];
        let mean_luma = if payload.is_empty() {
            0.0
        } else {
            payload.iter().map(|&b| u32::from(b)).sum::<u32>() as f32 / payload.len() as f32
        };
        Ok(LumaStats {
            frame_index: index,
            mean_luma,
        })
    }

    fn visualize(&mut self, frame: &Bytes, _output: &LumaStats) -> Bytes {
        // Annotation is a no-op on synthetic frames; the cheap clone keeps
        // the index header intact for downstream assertions.
        frame.clone()
    }
}

/// A sink that counts and discards.
#[derive(Debug, Default)]
pub struct NullSink {
    displayed: u64,
}

impl NullSink {
    pub fn displayed(&self) -> u64 {
        self.displayed
    }
}

impl FrameSink for NullSink {
    type Frame = Bytes;

    fn show(&mut self, _frame: Bytes) -> anyhow::Result<()> {
        self.displayed += 1;
        Ok(())
    }
}

/// A sink that records the index of every shown frame, optionally requesting
/// quit once enough frames have been seen.
pub struct CollectingSink {
    seen: Arc<Mutex<Vec<u64>>>,
    quit_after: Option<u64>,
}

impl CollectingSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: Arc::clone(&seen),
                quit_after: None,
            },
            seen,
        )
    }

    /// Polls quit once `frames` frames have been shown.
    pub fn quitting_after(frames: u64) -> (Self, Arc<Mutex<Vec<u64>>>) {
        let (mut sink, seen) = Self::new();
        sink.quit_after = Some(frames);
        (sink, seen)
    }
}

impl FrameSink for CollectingSink {
    type Frame = Bytes;

    fn show(&mut self, frame: Bytes) -> anyhow::Result<()> {
        self.seen.lock().push(frame_index(&frame));
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        match self.quit_after {
            Some(limit) => self.seen.lock().len() as u64 >= limit,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_round_trip() {
        let frame = synthetic_frame(12345, 256);
        assert_eq!(frame.len(), 256);
        assert_eq!(frame_index(&frame), 12345);
    }

    #[test]
    fn test_finite_source_runs_dry() {
        let mut source = SyntheticSource::finite(3, 30.0);
        assert_eq!(source.fps(), 30.0);
        for expected in 0..3 {
            let frame = source.read().expect("frame available");
            assert_eq!(frame_index(&frame), expected);
        }
        assert!(source.read().is_none());
        assert!(source.read().is_none());
    }

    #[test]
    fn test_executor_is_deterministic() {
        let mut executor = SyntheticExecutor::new(Duration::ZERO);
        let frame = synthetic_frame(7, 1024);
        let first = executor.inference(&frame).unwrap();
        let second = executor.inference(&frame).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.frame_index, 7);
        assert_eq!(first.mean_luma, 7.0);
        assert_eq!(executor.inferences(), 2);
    }

    #[test]
    fn test_executor_failure_injection() {
        let mut executor = SyntheticExecutor::failing_on(Duration::ZERO, [2]);
        assert!(executor.inference(&synthetic_frame(1, 64)).is_ok());
        assert!(executor.inference(&synthetic_frame(2, 64)).is_err());
        assert!(executor.inference(&synthetic_frame(3, 64)).is_ok());
    }
}
