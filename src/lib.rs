//! # Tutor Stream
//!
//! Real-time tutoring session pipeline: bidirectional low-latency audio
//! streaming, periodic screen-frame sampling and a strict session message
//! protocol over a single duplex WebSocket.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            CLIENT                                │
//! │  ┌────────────┐       ┌───────────────┐      ┌───────────────┐  │
//! │  │ Microphone │       │ Shared screen │      │  UI (external)│  │
//! │  └─────┬──────┘       └───────┬───────┘      └───────▲───────┘  │
//! │        ▼                      ▼                      │          │
//! │  ┌────────────┐       ┌───────────────┐       events │          │
//! │  │  Capture   │       │ ScreenFrame   │              │          │
//! │  │  Engine    │       │ Sampler       │              │          │
//! │  │ (resample, │       │ (downscale,   │              │          │
//! │  │  PCM16,    │       │  JPEG, b64)   │              │          │
//! │  │  base64)   │       └───────┬───────┘              │          │
//! │  └─────┬──────┘               │                      │          │
//! │        │    media chunks      │                      │          │
//! │        └──────────┬───────────┘                      │          │
//! │                   ▼                                  │          │
//! │         ┌───────────────────┐  inbound audio  ┌──────┴───────┐  │
//! │         │ SessionConnection ├────────────────►│  Playback    │  │
//! │         │  (state machine,  │                 │  Scheduler   │  │
//! │         │   JSON protocol,  │                 │ (gapless,    │  │
//! │         │   response timer) │                 │  device clk) │  │
//! │         └─────────┬─────────┘                 └──────┬───────┘  │
//! │                   │ WebSocket                        ▼          │
//! └───────────────────┼──────────────────────────── Speaker ────────┘
//!                     ▼
//!              Remote tutoring service
//! ```

pub mod audio;
pub mod config;
pub mod convert;
pub mod error;
pub mod screen;
pub mod session;

pub use error::{Error, Result};

/// Pipeline-wide constants
pub mod constants {
    /// Sample rate of encoded outbound microphone audio
    pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

    /// Sample rate assumed for inbound audio when unspecified
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

    /// Samples accumulated per capture processing frame
    pub const CAPTURE_FRAME_SIZE: usize = 4096;

    /// Inter-buffer gap for normal-sized playback chunks, in seconds
    pub const PLAYBACK_GAP_SECS: f64 = 0.020;

    /// Chunks at or below this duration schedule with no gap
    pub const MICRO_CHUNK_SECS: f64 = 0.050;

    /// Pending playback frames beyond this depth are consolidated
    pub const MAX_QUEUE_DEPTH: usize = 10;

    /// Response timer duration in milliseconds
    pub const RESPONSE_TIMEOUT_MS: u64 = 10_000;

    /// Screen capture period in milliseconds
    pub const SCREEN_CAPTURE_PERIOD_MS: u64 = 2000;

    /// Maximum screen frame width after downscale
    pub const SCREEN_MAX_WIDTH: u32 = 1280;

    /// Maximum screen frame height after downscale
    pub const SCREEN_MAX_HEIGHT: u32 = 720;

    /// JPEG quality for screen frames, 1-100
    pub const SCREEN_JPEG_QUALITY: u8 = 70;
}
