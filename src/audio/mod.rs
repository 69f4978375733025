//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod output;
pub mod playback;

pub use capture::AudioCaptureEngine;
pub use playback::{AudioFrame, PlaybackClock, PlaybackScheduler, PlaybackSink, ScheduledBuffer};
