//! Pipeline configuration with per-mode defaults

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The operating discipline of a run. Fixed for the run's duration.
///
/// VIDEO is completeness-first: no frame loss, strict ordering, large
/// buffers. CAMERA is latency-first: drop under load, freshest-wins, minimal
/// buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Video,
    Camera,
}

/// Resolved pipeline configuration.
///
/// Build one with [`PipelineConfig::for_mode`] (per-mode defaults) or
/// [`PipelineConfig::load`] (TOML overrides merged over those defaults), then
/// adjust fields as needed; the pipeline validates before wiring.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: PipelineMode,

    /// Number of concurrent executors (one per worker thread).
    pub max_workers: usize,

    /// Input queue capacity: 20 for VIDEO, 5 for CAMERA.
    pub input_capacity: usize,

    /// Output queue capacity: 50 for VIDEO, 1 for CAMERA.
    pub output_capacity: usize,

    /// Pacing target. `None` uses the source FPS (VIDEO) or 30 (CAMERA).
    pub target_fps: Option<f64>,

    /// Load ratio at/above which CAMERA mode drops frames. VIDEO ignores it.
    pub drop_threshold: f64,

    /// Per-frame wall-clock deadline: 15s for VIDEO, 5s for CAMERA.
    pub inference_timeout: Duration,

    /// Aggregate-log cadence in events per stream.
    pub log_interval: u64,

    /// Rolling-FPS window size in samples.
    pub fps_window: usize,

    /// CAMERA-mode retries for a failed source read.
    pub read_retries: u32,

    /// Backoff between CAMERA-mode read retries.
    pub reconnect_delay: Duration,

    /// Shutdown drain deadline before the output queue is force-closed.
    pub drain_timeout: Duration,

    /// Displayed-frame cadence of the target-vs-actual FPS check.
    pub fps_check_interval: u64,
}

impl PipelineConfig {
    /// Defaults for one mode.
    pub fn for_mode(mode: PipelineMode) -> Self {
        let (input_capacity, output_capacity, inference_timeout) = match mode {
            PipelineMode::Video => (20, 50, Duration::from_secs(15)),
            PipelineMode::Camera => (5, 1, Duration::from_secs(5)),
        };
        Self {
            mode,
            max_workers: 4,
            input_capacity,
            output_capacity,
            target_fps: None,
            drop_threshold: 0.8,
            inference_timeout,
            log_interval: 10,
            fps_window: 50,
            read_retries: 3,
            reconnect_delay: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            fps_check_interval: 30,
        }
    }

    pub fn video() -> Self {
        Self::for_mode(PipelineMode::Video)
    }

    pub fn camera() -> Self {
        Self::for_mode(PipelineMode::Camera)
    }

    /// Loads TOML overrides merged over the mode's defaults. The mode itself
    /// may come from the file (`mode = "video"`) and defaults to CAMERA.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses TOML overrides from a string. See [`load`](Self::load).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let raw = file.pipeline;
        let mut config = Self::for_mode(raw.mode.unwrap_or(PipelineMode::Camera));
        config.apply(raw);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, raw: RawConfig) {
        if let Some(v) = raw.max_workers {
            self.max_workers = v;
        }
        if let Some(v) = raw.input_capacity {
            self.input_capacity = v;
        }
        if let Some(v) = raw.output_capacity {
            self.output_capacity = v;
        }
        if raw.target_fps.is_some() {
            self.target_fps = raw.target_fps;
        }
        if let Some(v) = raw.drop_threshold {
            self.drop_threshold = v;
        }
        if let Some(v) = raw.inference_timeout_s {
            self.inference_timeout = Duration::from_secs_f64(v);
        }
        if let Some(v) = raw.log_interval {
            self.log_interval = v;
        }
        if let Some(v) = raw.fps_window {
            self.fps_window = v;
        }
        if let Some(v) = raw.read_retries {
            self.read_retries = v;
        }
        if let Some(v) = raw.reconnect_delay_s {
            self.reconnect_delay = Duration::from_secs_f64(v);
        }
        if let Some(v) = raw.drain_timeout_s {
            self.drain_timeout = Duration::from_secs_f64(v);
        }
        if let Some(v) = raw.fps_check_interval {
            self.fps_check_interval = v;
        }
    }

    /// Result ordering is a property of the mode, not a free knob.
    pub fn preserve_order(&self) -> bool {
        self.mode == PipelineMode::Video
    }

    /// Resolves the pacing target against the source's nominal rate.
    ///
    /// A configured target wins when positive. Otherwise VIDEO follows the
    /// source and CAMERA runs at 30; a non-positive or unknown rate falls
    /// back to 30 in both modes.
    pub fn effective_fps(&self, source_fps: f64) -> f64 {
        let fallback = match self.mode {
            PipelineMode::Video if source_fps > 0.0 => source_fps,
            _ => DEFAULT_FPS,
        };
        match self.target_fps {
            Some(fps) if fps > 0.0 => fps,
            _ => fallback,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers < 1 {
            return Err(ConfigError::Invalid(format!(
                "max_workers must be >= 1, got {}",
                self.max_workers
            )));
        }
        if self.input_capacity < 1 || self.output_capacity < 1 {
            return Err(ConfigError::Invalid(format!(
                "queue capacities must be >= 1, got input={} output={}",
                self.input_capacity, self.output_capacity
            )));
        }
        if !(self.drop_threshold > 0.0 && self.drop_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "drop_threshold must be in (0, 1], got {}",
                self.drop_threshold
            )));
        }
        if self.inference_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "inference_timeout_s must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pipeline: RawConfig,
}

/// TOML shape: every field optional, merged over the mode defaults.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    mode: Option<PipelineMode>,
    max_workers: Option<usize>,
    input_capacity: Option<usize>,
    output_capacity: Option<usize>,
    target_fps: Option<f64>,
    drop_threshold: Option<f64>,
    inference_timeout_s: Option<f64>,
    log_interval: Option<u64>,
    fps_window: Option<usize>,
    read_retries: Option<u32>,
    reconnect_delay_s: Option<f64>,
    drain_timeout_s: Option<f64>,
    fps_check_interval: Option<u64>,
}
