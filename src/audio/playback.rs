//! Gapless playback scheduling
//!
//! Accepts arbitrarily sized base64 PCM16 chunks arriving at network
//! cadence and schedules them back-to-back against the output device
//! clock. One buffer is in flight at a time; the next is scheduled when
//! the device reports completion or when a chunk arrives while idle.
//! A backlog deeper than [`PlaybackConfig::max_queue_depth`] is
//! consolidated into a single buffer before scheduling.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::config::PlaybackConfig;
use crate::convert;
use crate::error::{DeviceError, ProtocolError};

/// Decoded audio pending playback
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Frame duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels.max(1) as f64)
    }
}

/// A frame committed to the output device with its playback window.
///
/// For consecutive buffers A then B the scheduler guarantees
/// `B.start_time >= A.end_time`.
#[derive(Debug)]
pub struct ScheduledBuffer {
    pub frame: AudioFrame,
    pub start_time: f64,
    pub end_time: f64,
}

/// Source of playback time. The output device clock is the single
/// scheduling truth; tests substitute a manual clock.
pub trait PlaybackClock: Send {
    /// Seconds elapsed on the output timeline
    fn now(&self) -> f64;
}

/// Destination for scheduled buffers
pub trait PlaybackSink: Send {
    /// Commit a buffer for playback at its start time. The sink owns the
    /// buffer from here on.
    fn submit(&mut self, buffer: ScheduledBuffer);

    /// Hard-stop: discard everything scheduled, including the buffer
    /// currently playing.
    fn cancel_all(&mut self);
}

/// Notification fired on transitions into/out of the idle state
pub type PlayingListener = Box<dyn FnMut(bool) + Send>;

/// Scheduling counters for the UI layer
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackStats {
    pub chunks_enqueued: u64,
    pub buffers_scheduled: u64,
    pub consolidations: u64,
}

/// Schedules decoded chunks for gapless playback.
pub struct PlaybackScheduler {
    clock: Box<dyn PlaybackClock>,
    sink: Box<dyn PlaybackSink>,
    config: PlaybackConfig,
    pending: VecDeque<AudioFrame>,
    last_scheduled_end: f64,
    in_flight: usize,
    playing: bool,
    listener: Option<PlayingListener>,
    completions: Option<mpsc::UnboundedReceiver<()>>,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    /// Build a scheduler over an explicit clock and sink.
    pub fn new(config: PlaybackConfig, clock: Box<dyn PlaybackClock>, sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            clock,
            sink,
            config,
            pending: VecDeque::new(),
            last_scheduled_end: 0.0,
            in_flight: 0,
            playing: false,
            listener: None,
            completions: None,
            stats: PlaybackStats::default(),
        }
    }

    /// Build a scheduler backed by the default output device.
    pub fn open_default(config: PlaybackConfig) -> Result<Self, DeviceError> {
        let (output, clock, completions) = super::output::DeviceOutput::open(config.sample_rate)?;
        let mut scheduler = Self::new(config, Box::new(clock), Box::new(output));
        scheduler.completions = Some(completions);
        Ok(scheduler)
    }

    /// Receiver of end-of-buffer events from the device sink. The session
    /// loop selects on this and calls [`Self::on_buffer_complete`].
    pub fn take_completions(&mut self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.completions.take()
    }

    /// Register the playing-state notification.
    pub fn set_playing_listener(&mut self, listener: PlayingListener) {
        self.listener = Some(listener);
    }

    /// Decode an inbound base64 PCM16 chunk and queue it. Call
    /// [`Self::pump`] afterwards to let the scheduler run.
    pub fn enqueue_chunk(&mut self, data: &str, sample_rate: u32) -> Result<(), ProtocolError> {
        let bytes = convert::decode_base64(data)?;
        let pcm = convert::bytes_to_pcm16(&bytes)?;
        let samples = convert::from_pcm16(&pcm);
        self.enqueue_frame(AudioFrame::new(samples, sample_rate, 1));
        Ok(())
    }

    /// Queue an already decoded frame (FIFO, arrival order preserved).
    pub fn enqueue_frame(&mut self, frame: AudioFrame) {
        self.stats.chunks_enqueued += 1;
        self.pending.push_back(frame);
    }

    /// Run the scheduling step: with no buffer in flight, commit the next
    /// pending frame (consolidating the backlog first when too deep).
    pub fn pump(&mut self) {
        if self.in_flight > 0 {
            return;
        }

        if self.pending.len() > self.config.max_queue_depth {
            self.consolidate();
        }

        // Empty frames have nothing to render and would never complete
        while let Some(frame) = self.pending.pop_front() {
            if frame.samples.is_empty() {
                continue;
            }
            self.schedule(frame);
            break;
        }
    }

    /// End-of-buffer event from the device.
    pub fn on_buffer_complete(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.pump();
        if self.in_flight == 0 && self.pending.is_empty() {
            self.set_playing(false);
        }
    }

    /// Hard-stop playback: cancel in-flight audio, drop the backlog and
    /// reset the timeline.
    pub fn stop(&mut self) {
        self.sink.cancel_all();
        self.pending.clear();
        self.in_flight = 0;
        self.last_scheduled_end = 0.0;
        self.set_playing(false);
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queue_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_scheduled_end(&self) -> f64 {
        self.last_scheduled_end
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    fn schedule(&mut self, frame: AudioFrame) {
        let duration = frame.duration_secs();

        // Micro-chunks are fragments of one utterance and continue
        // seamlessly; normal chunks absorb scheduling jitter with a fixed
        // gap. The first buffer after a reset gets no gap either.
        let micro = duration <= self.config.micro_chunk_secs;
        let earliest = if micro || self.last_scheduled_end == 0.0 {
            self.last_scheduled_end
        } else {
            self.last_scheduled_end + self.config.gap_secs
        };

        let start_time = self.clock.now().max(earliest);
        let end_time = start_time + duration;

        self.sink.submit(ScheduledBuffer {
            frame,
            start_time,
            end_time,
        });

        self.last_scheduled_end = end_time;
        self.in_flight += 1;
        self.stats.buffers_scheduled += 1;
        self.set_playing(true);
    }

    /// Concatenate the whole backlog into one frame, resampling stragglers
    /// to the rate of the oldest frame so order and duration survive.
    fn consolidate(&mut self) {
        let Some(front) = self.pending.front() else {
            return;
        };
        let rate = front.sample_rate;
        let total: usize = self.pending.iter().map(|f| f.samples.len()).sum();

        let mut merged = Vec::with_capacity(total);
        for frame in self.pending.drain(..) {
            if frame.sample_rate == rate {
                merged.extend(frame.samples);
            } else {
                merged.extend(convert::resample(frame.samples, frame.sample_rate, rate));
            }
        }

        self.stats.consolidations += 1;
        tracing::debug!(
            samples = merged.len(),
            rate,
            "consolidated playback backlog into one buffer"
        );
        self.pending.push_back(AudioFrame::new(merged, rate, 1));
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            self.playing = playing;
            if let Some(listener) = &mut self.listener {
                listener(playing);
            }
        }
    }
}
