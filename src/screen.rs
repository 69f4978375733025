//! Screen frame sampling
//!
//! While screen sharing is active, captures one frame per period from a
//! shared display source, downscales it to fit 1280x720, JPEG-encodes it
//! and hands the base64 payload to the session. A single failed capture
//! is logged and skipped; source termination stops the sampler and fires
//! a one-shot notification.

use image::RgbaImage;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ScreenConfig;
use crate::convert;
use crate::error::DeviceError;
use crate::session::message::MediaChunk;

/// A live display being shared. Implementations wrap whatever capture
/// API the platform provides; the sampler only pulls frames from it.
pub trait FrameSource: Send + 'static {
    /// Grab the current frame. A momentary failure is fine; the sampler
    /// logs it and tries again next tick.
    fn capture_frame(&mut self) -> Result<RgbaImage, DeviceError>;

    /// False once the user has revoked sharing.
    fn is_active(&self) -> bool {
        true
    }
}

/// Periodic screen frame sampler
pub struct ScreenFrameSampler {
    config: ScreenConfig,
    chunks: mpsc::UnboundedSender<MediaChunk>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ScreenFrameSampler {
    pub fn new(config: ScreenConfig, chunks: mpsc::UnboundedSender<MediaChunk>) -> Self {
        Self {
            config,
            chunks,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Begin sampling the given source.
    ///
    /// The returned receiver fires once if the source terminates on its
    /// own (sharing revoked). Calling start while already sampling is a
    /// no-op that returns an already-closed receiver.
    pub fn start(&mut self, mut source: Box<dyn FrameSource>) -> oneshot::Receiver<()> {
        let (ended_tx, ended_rx) = oneshot::channel();

        if self.running.swap(true, Ordering::SeqCst) {
            return ended_rx;
        }

        let config = self.config.clone();
        let chunks = self.chunks.clone();
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(config.period_ms));
            let mut ended_tx = Some(ended_tx);

            loop {
                ticker.tick().await;

                if !running.load(Ordering::Relaxed) {
                    break;
                }

                if !source.is_active() {
                    tracing::info!("Screen source terminated, stopping sampler");
                    running.store(false, Ordering::SeqCst);
                    if let Some(tx) = ended_tx.take() {
                        let _ = tx.send(());
                    }
                    break;
                }

                match source.capture_frame() {
                    Ok(frame) => {
                        if let Some(chunk) = encode_screen_frame(frame, &config) {
                            if chunks.send(chunk).is_err() {
                                running.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        // One failed frame never aborts the sampler
                        tracing::warn!("Screen capture failed, skipping frame: {}", e);
                    }
                }
            }
        });

        self.task = Some(task);
        ended_rx
    }

    /// Hard-stop sampling. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ScreenFrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Downscale to fit the configured bounds (never upscale), JPEG-encode
/// at reduced quality and wrap as a base64 screen chunk.
///
/// Returns `None` when the frame cannot be encoded (zero dimensions);
/// a frame that fails here is skipped like a failed capture, never sent.
fn encode_screen_frame(frame: RgbaImage, config: &ScreenConfig) -> Option<MediaChunk> {
    let (width, height) = frame.dimensions();

    let image = image::DynamicImage::ImageRgba8(frame);
    let image = if width > config.max_width || height > config.max_height {
        image.thumbnail(config.max_width, config.max_height)
    } else {
        image
    };

    // JPEG has no alpha channel
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), config.jpeg_quality);
    if let Err(e) = encoder.encode_image(&rgb) {
        tracing::warn!("JPEG encode failed, skipping frame: {}", e);
        return None;
    }

    Some(MediaChunk::Screen {
        data: convert::encode_base64(&jpeg),
    })
}
