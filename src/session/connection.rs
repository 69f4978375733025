//! Session connection
//!
//! Owns the duplex WebSocket to the tutoring service and serializes the
//! whole session on one task: outbound commands and media chunks,
//! inbound message routing, the response timer and playback completion
//! events all interleave in a single select loop, so connection state
//! and the playback timeline are never touched concurrently.

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::message::{
    ConnectionState, ImageKind, MediaChunk, SessionEvent, SessionParams, WireMessage,
};
use crate::audio::PlaybackScheduler;
use crate::config::SessionConfig;
use crate::error::{Error, ProtocolError, SessionError, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control commands from the owning side into the session loop
enum Command {
    Send(WireMessage),
    StopPlayback,
    Disconnect,
}

/// Client side of one tutoring session.
///
/// The connection does not auto-reconnect: transport loss surfaces as
/// [`SessionEvent::ConnectionError`] and the caller decides whether to
/// call [`SessionConnection::connect`] again.
pub struct SessionConnection {
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<Mutex<ConnectionState>>,
    media_tx: Option<mpsc::UnboundedSender<MediaChunk>>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionConnection {
    pub fn new(config: SessionConfig, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            config,
            events,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            media_tx: None,
            cmd_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected
                | ConnectionState::AwaitingInitialContext
                | ConnectionState::Responding
        )
    }

    /// Sender for encoded capture/screen chunks. Valid for the current
    /// connection; obtain a fresh one after reconnecting.
    pub fn media_sender(&self) -> Option<mpsc::UnboundedSender<MediaChunk>> {
        self.media_tx.clone()
    }

    /// Open the transport, send the initial context and start the
    /// session loop. Inbound audio is routed to `playback` when given.
    pub async fn connect(
        &mut self,
        params: &SessionParams,
        playback: Option<PlaybackScheduler>,
    ) -> Result<(), Error> {
        if self.is_connected() {
            return Err(SessionError::AlreadyConnected.into());
        }

        let mut url = url::Url::parse(&self.config.endpoint)
            .map_err(|e| SessionError::InvalidUrl(e.to_string()))?;
        params.apply_to_url(&mut url);

        self.set_state(ConnectionState::Connecting);

        let (ws, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::ConnectionFailed(e.to_string()).into());
            }
        };

        self.set_state(ConnectionState::Connected);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(cmd_tx);
        self.media_tx = Some(media_tx);

        let runner = Runner {
            events: self.events.clone(),
            state: self.state.clone(),
            playback,
            timeout: Duration::from_millis(self.config.response_timeout_ms),
            responding_deadline: None,
        };
        let params = params.clone();

        self.task = Some(tokio::spawn(async move {
            runner.run(ws, cmd_rx, media_rx, params).await;
        }));

        Ok(())
    }

    /// Send a student text message.
    pub fn send_text(&self, content: &str, end_of_turn: bool) -> Result<(), Error> {
        self.send(WireMessage::Text {
            content: content.to_string(),
            is_system_message: None,
            end_of_turn,
        })
    }

    /// Submit an image payload (canvas snapshot, problem photo, ...).
    pub fn send_image(
        &self,
        data_base64: String,
        image_type: ImageKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        self.send(WireMessage::Image {
            data: data_base64,
            image_type,
            metadata,
        })
    }

    /// Signal that the student finished their turn and expects a reply.
    pub fn send_end_of_turn(&self) -> Result<(), Error> {
        self.send(WireMessage::EndOfTurn)
    }

    /// Interrupt tutor audio currently playing.
    pub fn stop_playback(&self) -> Result<(), Error> {
        self.command(Command::StopPlayback)
    }

    /// Send `end_conversation`, close the transport and wait for the
    /// session loop to finish. No-op when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Disconnect);
        }
        self.media_tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, message: WireMessage) -> Result<(), Error> {
        self.command(Command::Send(message))
    }

    fn command(&self, command: Command) -> Result<(), Error> {
        let cmd_tx = self.cmd_tx.as_ref().ok_or(SessionError::NotConnected)?;
        cmd_tx
            .send(command)
            .map_err(|_| SessionError::NotConnected.into())
    }

    fn set_state(&self, state: ConnectionState) {
        set_state(&self.state, &self.events, state);
    }
}

impl Drop for SessionConnection {
    /// Signal the session loop to close the conversation. Drop cannot
    /// await the task; call [`SessionConnection::disconnect`] to wait
    /// for an orderly close.
    fn drop(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Disconnect);
        }
    }
}

fn set_state(
    cell: &Arc<Mutex<ConnectionState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    state: ConnectionState,
) {
    let changed = {
        let mut current = cell.lock();
        if *current != state {
            *current = state;
            true
        } else {
            false
        }
    };
    if changed {
        tracing::debug!(?state, "session state changed");
        let _ = events.send(SessionEvent::StateChanged(state));
    }
}

/// Per-connection state driven by the session loop
struct Runner {
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<Mutex<ConnectionState>>,
    playback: Option<PlaybackScheduler>,
    timeout: Duration,
    responding_deadline: Option<Instant>,
}

impl Runner {
    async fn run(
        mut self,
        ws: WsStream,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut media_rx: mpsc::UnboundedReceiver<MediaChunk>,
        params: SessionParams,
    ) {
        let mut completions = self
            .playback
            .as_mut()
            .and_then(|p| p.take_completions());
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Initial context: the connect parameters echoed as a system
        // text message. The remote replies to open the conversation.
        let context = WireMessage::Text {
            content: serde_json::to_string(&params).unwrap_or_default(),
            is_system_message: Some(true),
            end_of_turn: false,
        };
        if let Err(e) = send_wire(&mut ws_tx, &context).await {
            self.fail(e);
            return;
        }
        self.set_state(ConnectionState::AwaitingInitialContext);

        loop {
            tokio::select! {
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => self.handle_inbound(&text),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            self.fail(TransportError::Closed(
                                "connection closed by remote".to_string(),
                            ));
                            return;
                        }
                        Some(Ok(_)) => {} // pings and binary frames are not part of the protocol
                        Some(Err(e)) => {
                            self.fail(TransportError::Closed(e.to_string()));
                            return;
                        }
                    }
                }

                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::Send(message) => {
                            let expects_reply = message.expects_reply();
                            if let Err(e) = send_wire(&mut ws_tx, &message).await {
                                self.fail(e);
                                return;
                            }
                            if expects_reply {
                                self.set_state(ConnectionState::Responding);
                                self.responding_deadline = Some(Instant::now() + self.timeout);
                            }
                        }
                        Command::StopPlayback => {
                            if let Some(playback) = self.playback.as_mut() {
                                playback.stop();
                            }
                        }
                        Command::Disconnect => {
                            let _ = send_wire(&mut ws_tx, &WireMessage::EndConversation).await;
                            let _ = ws_tx.close().await;
                            self.shutdown();
                            return;
                        }
                    }
                }

                Some(chunk) = media_rx.recv() => {
                    let message = match chunk {
                        MediaChunk::Audio { data, sample_rate } => {
                            WireMessage::Audio { data, sample_rate }
                        }
                        MediaChunk::Screen { data } => WireMessage::Screen { data },
                    };
                    if let Err(e) = send_wire(&mut ws_tx, &message).await {
                        self.fail(e);
                        return;
                    }
                }

                Some(()) = recv_completion(&mut completions) => {
                    if let Some(playback) = self.playback.as_mut() {
                        playback.on_buffer_complete();
                    }
                }

                () = deadline_elapsed(self.responding_deadline) => {
                    // The remote may still be thinking; clear the flag
                    // without surfacing an error.
                    tracing::debug!("response timer expired");
                    self.responding_deadline = None;
                    self.set_state(ConnectionState::Connected);
                }
            }
        }
    }

    /// Route one inbound frame. A malformed message is dropped without
    /// touching connection state.
    fn handle_inbound(&mut self, text: &str) {
        let message: WireMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                let err = ProtocolError::MalformedMessage(e.to_string());
                tracing::warn!("Dropping inbound message: {}", err);
                return;
            }
        };

        // Any inbound message satisfies the pending response.
        self.responding_deadline = None;
        let state = *self.state.lock();
        if matches!(
            state,
            ConnectionState::AwaitingInitialContext | ConnectionState::Responding
        ) {
            self.set_state(ConnectionState::Connected);
        }

        match message {
            WireMessage::Text {
                content,
                end_of_turn,
                ..
            } => {
                let _ = self.events.send(SessionEvent::Text {
                    content,
                    end_of_turn,
                });
            }
            WireMessage::Audio { data, sample_rate } => {
                if let Some(playback) = self.playback.as_mut() {
                    match playback.enqueue_chunk(&data, sample_rate) {
                        Ok(()) => playback.pump(),
                        Err(e) => tracing::warn!("Dropping undecodable audio chunk: {}", e),
                    }
                } else {
                    tracing::debug!("No playback scheduler, discarding audio chunk");
                }
            }
            WireMessage::Error { error, details } => {
                tracing::warn!("Remote error: {} ({:?})", error, details);
                let _ = self
                    .events
                    .send(SessionEvent::RemoteError { error, details });
            }
            other => {
                tracing::warn!("Dropping unexpected inbound message: {:?}", other);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        set_state(&self.state, &self.events, state);
    }

    /// Transport failure: report, stop playback, end the session.
    fn fail(&mut self, error: TransportError) {
        tracing::warn!("Session transport failed: {}", error);
        let _ = self
            .events
            .send(SessionEvent::ConnectionError(error.to_string()));
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.stop();
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn send_wire(
    ws_tx: &mut (impl Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    message: &WireMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    ws_tx
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

async fn recv_completion(rx: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
