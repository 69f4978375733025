//! Microphone capture engine
//!
//! Owns the input device between `start()` and `stop()`, running on a
//! dedicated thread because cpal streams are not `Send`. The stream
//! callback accumulates fixed-size frames, downmixes to mono, resamples
//! to the target rate, quantizes to PCM16 and hands base64 chunks to the
//! session. All per-frame work is plain arithmetic and stays well inside
//! the ~90 ms frame period.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use super::device;
use crate::config::CaptureConfig;
use crate::convert;
use crate::error::DeviceError;
use crate::session::message::MediaChunk;

/// Capture counters for the UI layer
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames_emitted: u64,
    pub samples_captured: u64,
}

/// Turns the default microphone into a stream of encoded audio chunks.
pub struct AudioCaptureEngine {
    config: CaptureConfig,
    chunks: mpsc::UnboundedSender<MediaChunk>,
    running: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
    samples_captured: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<DeviceError>>,
}

impl AudioCaptureEngine {
    pub fn new(config: CaptureConfig, chunks: mpsc::UnboundedSender<MediaChunk>) -> Self {
        Self {
            config,
            chunks,
            running: Arc::new(AtomicBool::new(false)),
            frames_emitted: Arc::new(AtomicU64::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Acquire the microphone and begin emitting chunks.
    ///
    /// Fails with [`DeviceError::Unavailable`] when no input device can
    /// be acquired. Idempotent: a second call while capturing is a no-op.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Fail before spawning anything if there is no device at all.
        let (device, native_config) = device::default_input()?;
        let source_rate = native_config.sample_rate().0;
        let channels = native_config.channels();

        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let chunks = self.chunks.clone();
        let frames_emitted = self.frames_emitted.clone();
        let samples_captured = self.samples_captured.clone();
        let frame_size = self.config.frame_size;
        let target_rate = self.config.target_sample_rate;

        self.frames_emitted.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(source_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut accumulated: Vec<f32> = Vec::with_capacity(frame_size * channels as usize * 2);
                let span = frame_size * channels as usize;

                let stream = device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);
                        accumulated.extend_from_slice(data);

                        while accumulated.len() >= span {
                            let frame: Vec<f32> = accumulated.drain(..span).collect();
                            let chunk = encode_frame(&frame, channels, source_rate, target_rate);
                            frames_emitted.fetch_add(1, Ordering::Relaxed);
                            if chunks.send(chunk).is_err() {
                                // Session gone; stop pushing but keep the
                                // device alive until stop() releases it.
                                running.store(false, Ordering::Relaxed);
                                return;
                            }
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::StreamError(err.to_string()));
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

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream drops here, releasing the device
                    }
                    Err(e) => {
                        let mapped = match e {
                            cpal::BuildStreamError::DeviceNotAvailable => {
                                DeviceError::Unavailable("input device not available".to_string())
                            }
                            other => DeviceError::StreamError(other.to_string()),
                        };
                        let _ = ready_tx.send(Err(mapped));
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                DeviceError::StreamError(e.to_string())
            })?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(DeviceError::StreamError(
                    "input stream did not start".to_string(),
                ))
            }
        }
    }

    /// Release the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
        }
    }

    /// Non-blocking check for stream errors raised after start.
    pub fn check_errors(&self) -> Option<DeviceError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Process one captured frame into an outbound chunk: downmix, resample
/// to the target rate, quantize to PCM16, base64-encode.
fn encode_frame(interleaved: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> MediaChunk {
    let mono = convert::downmix_to_mono(interleaved, channels);
    let resampled = convert::resample(mono, source_rate, target_rate);
    let pcm = convert::to_pcm16(&resampled);
    let data = convert::encode_base64(&convert::pcm16_to_bytes(&pcm));
    MediaChunk::Audio {
        data,
        sample_rate: target_rate,
    }
}
