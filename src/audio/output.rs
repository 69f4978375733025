//! Output device driver
//!
//! Owns the cpal output stream on a dedicated thread (cpal streams are
//! not `Send`) and renders scheduled buffers at their sample-accurate
//! start positions, filling silence in between. The stream callback is
//! the source of the playback clock: time only advances as the device
//! consumes samples.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use super::device;
use super::playback::{PlaybackClock, PlaybackSink, ScheduledBuffer};
use crate::convert;
use crate::error::DeviceError;

/// Scheduled spans waiting for the render callback
const SPAN_QUEUE_CAPACITY: usize = 64;

struct Span {
    start_sample: u64,
    samples: Vec<f32>,
    generation: u64,
}

struct Shared {
    played_samples: AtomicU64,
    /// Bumped by cancel_all; spans from older generations are discarded
    generation: AtomicU64,
    spans: ArrayQueue<Span>,
    running: AtomicBool,
}

/// Playback clock backed by the device's consumed-sample counter
#[derive(Clone)]
pub struct DeviceClock {
    shared: Arc<Shared>,
    sample_rate: u32,
}

impl PlaybackClock for DeviceClock {
    fn now(&self) -> f64 {
        self.shared.played_samples.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

/// Sink committing scheduled buffers to the default output device
pub struct DeviceOutput {
    shared: Arc<Shared>,
    sample_rate: u32,
    completion_tx: mpsc::UnboundedSender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default output device at the given mono sample rate.
    ///
    /// Returns the sink, its clock and the end-of-buffer event receiver.
    pub fn open(
        sample_rate: u32,
    ) -> Result<(Self, DeviceClock, mpsc::UnboundedReceiver<()>), DeviceError> {
        let (device, _native_config) = device::default_output()?;

        let shared = Arc::new(Shared {
            played_samples: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            spans: ArrayQueue::new(SPAN_QUEUE_CAPACITY),
            running: AtomicBool::new(true),
        });

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let render_completion_tx = completion_tx.clone();
        let shared_for_thread = shared.clone();
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let shared = shared_for_thread;
                let render_shared = shared.clone();

                // Render state lives in the callback closure; the
                // callback is the only writer.
                let mut current: Option<(Span, usize)> = None;

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let generation = render_shared.generation.load(Ordering::Relaxed);
                        let mut pos = render_shared.played_samples.load(Ordering::Relaxed);

                        // Drop a span cancelled mid-playback, silently.
                        if current
                            .as_ref()
                            .map_or(false, |(span, _)| span.generation != generation)
                        {
                            current = None;
                        }

                        for slot in data.iter_mut() {
                            if current.is_none() {
                                while let Some(span) = render_shared.spans.pop() {
                                    if span.generation == generation {
                                        current = Some((span, 0));
                                        break;
                                    }
                                }
                            }

                            let mut finished = false;
                            *slot = match &mut current {
                                Some((span, offset)) if pos >= span.start_sample => {
                                    let sample = span.samples[*offset];
                                    *offset += 1;
                                    if *offset >= span.samples.len() {
                                        finished = true;
                                    }
                                    sample
                                }
                                _ => 0.0,
                            };
                            if finished {
                                let _ = render_completion_tx.send(());
                                current = None;
                            }
                            pos += 1;
                        }

                        render_shared.played_samples.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!("Output stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while shared.running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream drops here, stopping output
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                    }
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                shared.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(DeviceError::StreamError(
                    "output stream did not start".to_string(),
                ));
            }
        }

        let clock = DeviceClock {
            shared: shared.clone(),
            sample_rate,
        };

        Ok((
            Self {
                shared,
                sample_rate,
                completion_tx,
                thread_handle: Some(handle),
            },
            clock,
            completion_rx,
        ))
    }
}

impl PlaybackSink for DeviceOutput {
    fn submit(&mut self, buffer: ScheduledBuffer) {
        let frame = buffer.frame;
        let samples = if frame.sample_rate == self.sample_rate {
            frame.samples
        } else {
            convert::resample(frame.samples, frame.sample_rate, self.sample_rate)
        };

        // A chunk shorter than one output sample resamples away entirely.
        // It still owes the scheduler a completion or in_flight never
        // drains; it must not reach the render callback, which would
        // index into the empty span.
        if samples.is_empty() {
            let _ = self.completion_tx.send(());
            return;
        }

        let span = Span {
            start_sample: (buffer.start_time * self.sample_rate as f64).round() as u64,
            samples,
            generation: self.shared.generation.load(Ordering::Relaxed),
        };

        if self.shared.spans.push(span).is_err() {
            tracing::warn!("Playback span queue full, dropping buffer");
        }
    }

    fn cancel_all(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        while self.shared.spans.pop().is_some() {}
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
