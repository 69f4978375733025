//! Tutoring session client
//!
//! Connects the default microphone and speaker to a tutoring endpoint.
//! Lines typed on stdin are sent as turn-ending text; Ctrl-C ends the
//! conversation cleanly.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutor_stream::audio::{AudioCaptureEngine, PlaybackScheduler};
use tutor_stream::config::AppConfig;
use tutor_stream::session::{SessionConnection, SessionEvent, SessionParams};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load_or_default();

    let mut args = std::env::args().skip(1);
    let subject = args.next().unwrap_or_else(|| "math".to_string());
    if let Some(endpoint) = args.next() {
        config.session.endpoint = endpoint;
    }

    let params = SessionParams {
        subject,
        ..SessionParams::default()
    };

    tracing::info!(
        "Connecting to {} (subject: {})",
        config.session.endpoint,
        params.subject
    );

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Text { content, .. } => println!("tutor: {}", content),
                SessionEvent::StateChanged(state) => tracing::info!("Session state: {:?}", state),
                SessionEvent::RemoteError { error, details } => {
                    tracing::warn!("Remote error: {} ({:?})", error, details)
                }
                SessionEvent::ConnectionError(reason) => {
                    tracing::error!("Connection lost: {}", reason)
                }
            }
        }
    });

    let playback = match PlaybackScheduler::open_default(config.playback.clone()) {
        Ok(mut scheduler) => {
            scheduler.set_playing_listener(Box::new(|playing| {
                tracing::info!("Tutor {}", if playing { "speaking" } else { "quiet" });
            }));
            Some(scheduler)
        }
        Err(e) => {
            tracing::warn!("No audio output, continuing without playback: {}", e);
            None
        }
    };

    let mut session = SessionConnection::new(config.session.clone(), events_tx);
    session.connect(&params, playback).await?;

    let media_tx = session
        .media_sender()
        .expect("connected session has a media channel");
    let mut capture = AudioCaptureEngine::new(config.capture.clone(), media_tx);
    match capture.start() {
        Ok(()) => tracing::info!("Microphone capturing"),
        Err(e) => tracing::warn!("No microphone, continuing text-only: {}", e),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.trim().is_empty() => {
                        session.send_text(line.trim(), true)?;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    tracing::info!("Ending conversation");
    capture.stop();
    session.disconnect().await;
    Ok(())
}
