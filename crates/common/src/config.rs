//! Engine configuration.
//!
//! Boundary tolerances and drift thresholds were tuned against observed
//! flicker and stutter on real runtimes. They live here as named fields
//! so hosts can adjust them without touching engine code.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Global engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output raster and encoder parameters.
    pub output: OutputConfig,

    /// Empirically tuned timing constants.
    pub tuning: TuningConfig,

    /// Capabilities of the host platform.
    pub platform: PlatformProfile,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Output raster and encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,

    /// Fixed output frame rate.
    pub fps: u32,

    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,

    /// Audio graph native sample rate.
    pub audio_sample_rate: u32,

    /// Frames per audio chunk fed to the audio encoder.
    pub audio_chunk_frames: usize,
}

/// Tunable constants for synchronization and recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Subtracted from the last item's duration when resolving past the end.
    pub end_epsilon_secs: f64,

    /// Window before an item's end where a naturally ended handle is held.
    pub near_end_window_secs: f64,

    pub drift_threshold_export_secs: f64,
    pub drift_threshold_direct_seek_secs: f64,
    pub drift_threshold_playback_secs: f64,
    pub drift_threshold_limited_secs: f64,

    /// Remaining time on the current item below which the next video is primed.
    pub preload_window_secs: f64,

    /// Minimum interval between expensive reseeks during a scrub.
    pub seek_throttle_ms: f64,
    pub seek_resume_timeout_ms: f64,
    pub seek_resume_poll_ms: f64,

    /// Bound on waiting for the first frame before starting playback.
    pub metadata_timeout_ms: f64,

    pub stall_detect_ms: f64,
    pub stall_retry_limit: u32,
    pub stall_retry_cooldown_ms: f64,

    /// Time constant for smooth gain changes.
    pub gain_ramp_secs: f64,

    pub play_debounce_ms: f64,

    pub keep_alive_tone_hz: f64,
    pub keep_alive_tone_amplitude: f32,

    /// Bound on waiting for a handle to present a frame during export.
    pub export_frame_wait_ms: f64,
}

/// Capabilities of the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformProfile {
    /// Restricted platform: loosest drift tolerance, no offline video decode.
    pub capability_limited: bool,

    /// Whether the raster surface supports native blur compositing.
    pub native_blur: bool,

    /// Whether surface snapshots can be pumped manually at a fixed cadence.
    pub deterministic_pump: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelcut_export=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            video_bitrate_kbps: 5000,
            audio_bitrate_kbps: 128,
            audio_sample_rate: 48000,
            audio_chunk_frames: 1024,
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            end_epsilon_secs: 0.001,
            near_end_window_secs: 0.05,
            drift_threshold_export_secs: 0.04,
            drift_threshold_direct_seek_secs: 0.05,
            drift_threshold_playback_secs: 0.3,
            drift_threshold_limited_secs: 0.5,
            preload_window_secs: 3.0,
            seek_throttle_ms: 120.0,
            seek_resume_timeout_ms: 3000.0,
            seek_resume_poll_ms: 50.0,
            metadata_timeout_ms: 5000.0,
            stall_detect_ms: 2000.0,
            stall_retry_limit: 3,
            stall_retry_cooldown_ms: 1500.0,
            gain_ramp_secs: 0.03,
            play_debounce_ms: 250.0,
            keep_alive_tone_hz: 20.0,
            keep_alive_tone_amplitude: 1e-4,
            export_frame_wait_ms: 500.0,
        }
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self {
            capability_limited: false,
            native_blur: true,
            deterministic_pump: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl OutputConfig {
    /// Duration of one output frame in seconds.
    pub fn frame_duration_secs(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }

    /// Number of frames an export of `duration_secs` must contain.
    pub fn expected_frames(&self, duration_secs: f64) -> u64 {
        (duration_secs.max(0.0) * self.fps as f64).round() as u64
    }
}

impl EngineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str::<EngineConfig>(&content) {
                    Ok(config) => match config.validate() {
                        Ok(()) => return config,
                        Err(e) => {
                            tracing::warn!("Ignoring invalid config at {:?}: {}", config_path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(EngineError::config("output dimensions must be non-zero"));
        }
        if self.output.fps == 0 {
            return Err(EngineError::config("output fps must be non-zero"));
        }
        if self.output.audio_sample_rate == 0 || self.output.audio_chunk_frames == 0 {
            return Err(EngineError::config(
                "audio sample rate and chunk size must be non-zero",
            ));
        }
        let t = &self.tuning;
        if t.seek_throttle_ms < 0.0 || t.metadata_timeout_ms <= 0.0 || t.seek_resume_timeout_ms <= 0.0
        {
            return Err(EngineError::config("timeouts must be positive"));
        }
        if t.end_epsilon_secs <= 0.0 {
            return Err(EngineError::config("end epsilon must be positive"));
        }
        Ok(())
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelcut").join("config.json")
}
