//! Session connection integration tests
//!
//! Drives a SessionConnection against an in-process WebSocket server to
//! exercise the connection state machine, the response timer and the
//! routing of inbound messages.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use tutor_stream::audio::{
    AudioFrame, PlaybackClock, PlaybackScheduler, PlaybackSink, ScheduledBuffer,
};
use tutor_stream::config::{PlaybackConfig, SessionConfig};
use tutor_stream::convert;
use tutor_stream::session::{ConnectionState, SessionConnection, SessionEvent, SessionParams};

enum ServerCmd {
    Send(String),
    Close,
}

/// One-connection WebSocket stub: parsed inbound frames come out of the
/// returned receiver, and the command sender injects responses.
async fn spawn_server() -> (
    String,
    mpsc::UnboundedReceiver<serde_json::Value>,
    mpsc::UnboundedSender<ServerCmd>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ServerCmd>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        loop {
            tokio::select! {
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                        let _ = in_tx.send(value);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                Some(cmd) = cmd_rx.recv() => match cmd {
                    ServerCmd::Send(text) => {
                        let _ = ws.send(Message::Text(text)).await;
                    }
                    ServerCmd::Close => {
                        let _ = ws.close(None).await;
                        break;
                    }
                },
            }
        }
    });

    (format!("ws://{}/session", addr), in_rx, cmd_tx)
}

fn session_config(endpoint: &str, timeout_ms: u64) -> SessionConfig {
    SessionConfig {
        endpoint: endpoint.to_string(),
        response_timeout_ms: timeout_ms,
    }
}

fn params() -> SessionParams {
    SessionParams {
        subject: "math".to_string(),
        skill: Some("fractions".to_string()),
        ..SessionParams::default()
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wanted: ConnectionState,
) {
    loop {
        if let SessionEvent::StateChanged(state) = next_event(events).await {
            if state == wanted {
                return;
            }
        }
    }
}

#[derive(Clone)]
struct ZeroClock;

impl PlaybackClock for ZeroClock {
    fn now(&self) -> f64 {
        0.0
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    scheduled: Arc<Mutex<Vec<AudioFrame>>>,
}

impl PlaybackSink for RecordingSink {
    fn submit(&mut self, buffer: ScheduledBuffer) {
        self.scheduled.lock().push(buffer.frame);
    }

    fn cancel_all(&mut self) {}
}

#[tokio::test]
async fn connect_sends_initial_context_and_awaits_reply() {
    let (url, mut inbound, server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();

    // Initial context is a system text message echoing the params
    let context = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(context["type"], "text");
    assert_eq!(context["is_system_message"], true);
    assert!(context["content"].as_str().unwrap().contains("math"));

    wait_for_state(&mut events, ConnectionState::AwaitingInitialContext).await;

    // Any inbound message opens the conversation
    server
        .send(ServerCmd::Send(
            r#"{"type": "text", "content": "Hi! Ready to practice fractions?", "end_of_turn": true}"#
                .to_string(),
        ))
        .unwrap();

    loop {
        match next_event(&mut events).await {
            SessionEvent::Text {
                content,
                end_of_turn,
            } => {
                assert!(content.contains("fractions"));
                assert!(end_of_turn);
                break;
            }
            SessionEvent::StateChanged(_) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(session.state(), ConnectionState::Connected);

    session.disconnect().await;
}

#[tokio::test]
async fn response_timeout_returns_to_connected() {
    let (url, mut inbound, _server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    // Short timer so the test does not wait 10 s
    let mut session = SessionConnection::new(session_config(&url, 200), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    session.send_end_of_turn().unwrap();
    let eot = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(eot["type"], "end_of_turn");

    wait_for_state(&mut events, ConnectionState::Responding).await;

    // The server never replies; the timer must clear the flag without
    // dropping the connection.
    wait_for_state(&mut events, ConnectionState::Connected).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.is_connected());

    session.disconnect().await;
}

#[tokio::test]
async fn remote_error_is_recoverable() {
    let (url, mut inbound, server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    server
        .send(ServerCmd::Send(
            r#"{"type": "error", "error": "model overloaded", "details": "try again"}"#.to_string(),
        ))
        .unwrap();

    loop {
        match next_event(&mut events).await {
            SessionEvent::RemoteError { error, details } => {
                assert_eq!(error, "model overloaded");
                assert_eq!(details.as_deref(), Some("try again"));
                break;
            }
            SessionEvent::StateChanged(_) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    // Connection stays open and usable
    assert!(session.is_connected());
    session.send_text("still here", false).unwrap();
    let text = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(text["content"], "still here");

    session.disconnect().await;
}

#[tokio::test]
async fn inbound_audio_reaches_playback_scheduler() {
    let (url, mut inbound, server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    let sink = RecordingSink::default();
    let scheduler = PlaybackScheduler::new(
        PlaybackConfig::default(),
        Box::new(ZeroClock),
        Box::new(sink.clone()),
    );

    session.connect(&params(), Some(scheduler)).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    let pcm = vec![1000i16; 2400];
    let data = convert::encode_base64(&convert::pcm16_to_bytes(&pcm));
    server
        .send(ServerCmd::Send(
            serde_json::json!({"type": "audio", "data": data, "sampleRate": 24000}).to_string(),
        ))
        .unwrap();

    // Inbound audio transitions the state machine like any message
    wait_for_state(&mut events, ConnectionState::Connected).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        {
            let scheduled = sink.scheduled.lock();
            if !scheduled.is_empty() {
                assert_eq!(scheduled[0].samples.len(), 2400);
                assert_eq!(scheduled[0].sample_rate, 24000);
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "audio chunk never scheduled"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    session.disconnect().await;
}

#[tokio::test]
async fn malformed_inbound_message_is_dropped() {
    let (url, mut inbound, server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    server
        .send(ServerCmd::Send("this is not json".to_string()))
        .unwrap();
    server
        .send(ServerCmd::Send(
            r#"{"type": "text", "content": "after the garbage", "end_of_turn": false}"#.to_string(),
        ))
        .unwrap();

    // The bad frame is skipped; the next one still arrives
    loop {
        match next_event(&mut events).await {
            SessionEvent::Text { content, .. } => {
                assert_eq!(content, "after the garbage");
                break;
            }
            SessionEvent::StateChanged(_) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(session.is_connected());

    session.disconnect().await;
}

#[tokio::test]
async fn disconnect_sends_end_conversation() {
    let (url, mut inbound, _server) = spawn_server().await;
    let (events_tx, _events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    session.disconnect().await;

    let farewell = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(farewell["type"], "end_conversation");
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropping_session_without_disconnect_ends_conversation() {
    let (url, mut inbound, _server) = spawn_server().await;
    let (events_tx, _events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    // No explicit disconnect; the drop alone must close the conversation
    drop(session);

    let farewell = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(farewell["type"], "end_conversation");
}

#[tokio::test]
async fn remote_close_surfaces_connection_error() {
    let (url, mut inbound, server) = spawn_server().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    server.send(ServerCmd::Close).unwrap();

    loop {
        match next_event(&mut events).await {
            SessionEvent::ConnectionError(_) => break,
            SessionEvent::StateChanged(_) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
    assert!(!session.is_connected());

    // Not connected: sends now fail cleanly
    assert!(session.send_text("anyone there?", false).is_err());
}

#[tokio::test]
async fn outbound_media_chunks_are_forwarded() {
    let (url, mut inbound, _server) = spawn_server().await;
    let (events_tx, _events) = mpsc::unbounded_channel();
    let mut session = SessionConnection::new(session_config(&url, 10_000), events_tx);

    session.connect(&params(), None).await.unwrap();
    let _context = inbound.recv().await.unwrap();

    let media = session.media_sender().unwrap();
    media
        .send(tutor_stream::session::MediaChunk::Audio {
            data: "AAAA".to_string(),
            sample_rate: 16000,
        })
        .unwrap();
    media
        .send(tutor_stream::session::MediaChunk::Screen {
            data: "BBBB".to_string(),
        })
        .unwrap();

    let audio = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audio["type"], "audio");
    assert_eq!(audio["sampleRate"], 16000);

    let screen = timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(screen["type"], "screen");
    assert_eq!(screen["data"], "BBBB");

    session.disconnect().await;
}
