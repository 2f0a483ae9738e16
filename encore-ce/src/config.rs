//! Configuration resolution for encore-ce
//!
//! Provides multi-tier configuration resolution with CLI → ENV → TOML →
//! compiled-default priority. Every section falls back to its defaults when
//! absent from the TOML file.

use encore_common::config::{config_file_path, load_toml_or_default, read_toml_file, LoggingConfig};
use encore_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Module name used for the config file (~/.config/encore/encore-ce.toml)
pub const MODULE_NAME: &str = "encore-ce";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5740;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// EventBus channel capacity
    pub event_capacity: usize,
    /// Largest accepted request body; audio travels base64-encoded inline
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            event_capacity: 256,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent jobs
    pub count: usize,
    /// Cooperative cancel is requested after this many seconds
    pub soft_timeout_secs: u64,
    /// Job is failed after this many seconds regardless of state
    pub hard_timeout_secs: u64,
    /// Bounded in-memory queue length in front of the workers
    pub queue_capacity: usize,
    /// Redeliveries before a job is given up on
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: num_cpus::get().clamp(1, 4),
            soft_timeout_secs: 240,
            hard_timeout_secs: 300,
            queue_capacity: 64,
            max_attempts: 3,
        }
    }
}

/// Feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Analysis sample rate; decoded audio is resampled to this
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// MAD multiplier for the onset threshold
    pub onset_threshold: f32,
    /// Half-width, in frames, of the sliding median window
    pub onset_window_frames: usize,
    /// Seconds between two accepted onsets
    pub min_onset_gap: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            frame_size: 2048,
            hop_size: 512,
            min_bpm: 60.0,
            max_bpm: 200.0,
            onset_threshold: 2.0,
            onset_window_frames: 16,
            min_onset_gap: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Evenly spaced reference-time points in the output mapping
    pub resample_points: usize,
    /// Chroma matrices are pooled down to at most this many frames
    pub max_dtw_frames: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            resample_points: 512,
            max_dtw_frames: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Seconds either side of a mapped note start searched for an onset
    pub onset_search_window: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            onset_search_window: 0.1,
        }
    }
}

/// Weights combining the per-dimension scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub pitch: f64,
    pub rhythm: f64,
    pub technique: f64,
    pub tempo: f64,
    pub rhythm_absolute: f64,
    pub rhythm_relative: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            pitch: 0.4,
            rhythm: 0.3,
            technique: 0.2,
            tempo: 0.1,
            rhythm_absolute: 0.4,
            rhythm_relative: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Seconds of deviation difference treated as a tie
    pub verdict_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            verdict_tolerance: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Text-generation endpoint; feedback is unavailable when unset
    pub endpoint: Option<String>,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: "ENCORE_FEEDBACK_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl FeedbackConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub extractor: ExtractorConfig,
    pub alignment: AlignmentConfig,
    pub segmenter: SegmenterConfig,
    pub scoring: ScoringConfig,
    pub feedback: FeedbackConfig,
}

/// Values supplied on the command line (or their env fallbacks)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub root_folder: Option<PathBuf>,
    pub feedback_endpoint: Option<String>,
}

impl ServiceConfig {
    /// Load the TOML layer
    ///
    /// An explicit path must exist and parse. Without one, the default
    /// location is tried and missing or invalid files fall back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => {
                let config: ServiceConfig = read_toml_file(path)?;
                info!(path = %path.display(), "Loaded configuration file");
                Ok(config)
            }
            None => match config_file_path(MODULE_NAME) {
                Some(path) if path.exists() => {
                    info!(path = %path.display(), "Loading default configuration file");
                    Ok(load_toml_or_default(&path))
                }
                _ => Ok(ServiceConfig::default()),
            },
        }
    }

    /// Apply command-line / environment overrides on top of the TOML layer
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(workers) = overrides.workers {
            self.workers.count = workers;
        }
        if let Some(root_folder) = overrides.root_folder {
            self.root_folder = Some(root_folder);
        }
        if let Some(endpoint) = overrides.feedback_endpoint {
            self.feedback.endpoint = Some(endpoint);
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let ex = &self.extractor;
        if ex.sample_rate == 0 || ex.frame_size == 0 || ex.hop_size == 0 {
            return Err(Error::Config(
                "extractor sample_rate, frame_size and hop_size must be positive".to_string(),
            ));
        }
        if !(ex.min_bpm > 0.0 && ex.max_bpm > ex.min_bpm) {
            return Err(Error::Config(format!(
                "extractor BPM range invalid: [{}, {}]",
                ex.min_bpm, ex.max_bpm
            )));
        }
        if self.workers.count == 0 {
            return Err(Error::Config("workers.count must be at least 1".to_string()));
        }
        if self.workers.soft_timeout_secs >= self.workers.hard_timeout_secs {
            return Err(Error::Config(format!(
                "workers.soft_timeout_secs ({}) must be below hard_timeout_secs ({})",
                self.workers.soft_timeout_secs, self.workers.hard_timeout_secs
            )));
        }
        if self.alignment.resample_points < 2 || self.alignment.max_dtw_frames < 2 {
            return Err(Error::Config(
                "alignment resample_points and max_dtw_frames must be at least 2".to_string(),
            ));
        }

        let w = &self.scoring.weights;
        let all = [
            w.pitch,
            w.rhythm,
            w.technique,
            w.tempo,
            w.rhythm_absolute,
            w.rhythm_relative,
        ];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::Config(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        let total = w.pitch + w.rhythm + w.technique + w.tempo;
        if (total - 1.0).abs() > 1e-6 {
            warn!(total, "Scoring weights do not sum to 1.0; overall may exceed bounds before clamping");
        }
        Ok(())
    }
}
