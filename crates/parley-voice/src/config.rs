use parley_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_broker_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Where the session broker relay lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_broker_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BrokerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_fft_size() -> usize {
    256
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_db() -> f32 {
    -100.0
}

fn default_max_db() -> f32 {
    -30.0
}

fn default_acquire_attempts() -> u32 {
    20
}

fn default_acquire_interval_ms() -> u64 {
    500
}

fn default_synthetic_min() -> f32 {
    5.0
}

fn default_synthetic_max() -> f32 {
    25.0
}

/// Audio visualizer sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Time between volume samples (about one animation frame).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// FFT length. Must be a power of two.
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Exponential smoothing constant applied to bin magnitudes, in [0, 1).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_db")]
    pub min_db: f32,
    #[serde(default = "default_max_db")]
    pub max_db: f32,
    /// Polls for a remote audio signal before degrading to synthetic samples.
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    #[serde(default = "default_acquire_interval_ms")]
    pub acquire_interval_ms: u64,
    #[serde(default = "default_synthetic_min")]
    pub synthetic_min: f32,
    #[serde(default = "default_synthetic_max")]
    pub synthetic_max: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            min_db: default_min_db(),
            max_db: default_max_db(),
            acquire_attempts: default_acquire_attempts(),
            acquire_interval_ms: default_acquire_interval_ms(),
            synthetic_min: default_synthetic_min(),
            synthetic_max: default_synthetic_max(),
        }
    }
}

impl SamplerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }
}

/// Everything a [`VoiceSession`](crate::VoiceSession) needs besides its
/// collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
}
