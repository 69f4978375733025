//! Configuration for the session pipeline
//!
//! All tunables carry the defaults the pipeline was tuned with; a TOML
//! file can override them per deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub screen: ScreenConfig,
}

/// Session connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket endpoint of the remote tutoring service
    pub endpoint: String,
    /// How long to keep the `Responding` flag armed without a reply
    pub response_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8765/session".to_string(),
            response_timeout_ms: RESPONSE_TIMEOUT_MS,
        }
    }
}

/// Microphone capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target rate of encoded outbound audio
    pub target_sample_rate: u32,
    /// Samples accumulated per processing frame
    pub frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CAPTURE_SAMPLE_RATE,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

/// Playback scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output rate assumed for inbound audio unless the message says otherwise
    pub sample_rate: u32,
    /// Inter-buffer gap inserted before normal-sized chunks, in seconds
    pub gap_secs: f64,
    /// Chunks at or below this duration are treated as utterance
    /// fragments and scheduled with no gap
    pub micro_chunk_secs: f64,
    /// Pending-queue depth that triggers consolidation into one buffer
    pub max_queue_depth: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            gap_secs: PLAYBACK_GAP_SECS,
            micro_chunk_secs: MICRO_CHUNK_SECS,
            max_queue_depth: MAX_QUEUE_DEPTH,
        }
    }
}

/// Screen frame sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Capture period in milliseconds
    pub period_ms: u64,
    /// Maximum frame width after downscale
    pub max_width: u32,
    /// Maximum frame height after downscale
    pub max_height: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            period_ms: SCREEN_CAPTURE_PERIOD_MS,
            max_width: SCREEN_MAX_WIDTH,
            max_height: SCREEN_MAX_HEIGHT,
            jpeg_quality: SCREEN_JPEG_QUALITY,
        }
    }
}

impl AppConfig {
    /// Default config file location under the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tutor-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}
