//! Upstream link to the remote voice service.
//!
//! An [`UpstreamLink`] is the session-side handle of a message-oriented
//! connection. The transport runs in its own task and talks to the link over
//! two bounded channels: outbound [`LinkCommand`]s and inbound
//! [`UpstreamEvent`]s. The transport stops reading the socket while the event
//! channel is full, so a slow session pushes back on the voice service.
//! The transport end is an [`UpstreamPeer`], which is what
//! [`WebSocketConnector`] drives and what tests script directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::base::{LinkState, RelayError, RelayResult, SessionTarget};

/// Capacity of the command and event channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the service to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A message received from the voice service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamMessage {
    /// Audio frame
    Binary(Bytes),
    /// JSON control frame
    Text(String),
}

/// Lifecycle and data events produced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Opened,
    Message(UpstreamMessage),
    Closed(Option<String>),
    Failed(String),
}

/// Instructions from the session to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Send an audio frame
    Audio(Bytes),
    /// Start the close handshake
    Close,
}

/// Session-side handle of the upstream connection.
#[derive(Debug)]
pub struct UpstreamLink {
    state: Arc<AtomicU8>,
    commands: mpsc::Sender<LinkCommand>,
    events: mpsc::Receiver<UpstreamEvent>,
}

/// Transport-side end of an [`UpstreamLink`].
#[derive(Debug)]
pub struct UpstreamPeer {
    state: Arc<AtomicU8>,
    commands: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<UpstreamEvent>,
}

impl UpstreamLink {
    /// Create a link in the `Connecting` state together with its transport end.
    ///
    /// `capacity` bounds both directions.
    pub fn channel(capacity: usize) -> (UpstreamLink, UpstreamPeer) {
        let capacity = capacity.max(1);
        let state = Arc::new(AtomicU8::new(LinkState::Connecting as u8));
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        (
            UpstreamLink {
                state: state.clone(),
                commands: command_tx,
                events: event_rx,
            },
            UpstreamPeer {
                state,
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Queue an audio frame for the service.
    ///
    /// Returns `false` without sending when the link is not open; callers
    /// treat that as a dropped frame, not an error.
    pub async fn send(&self, audio: Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        self.commands.send(LinkCommand::Audio(audio)).await.is_ok()
    }

    /// Begin closing the link.
    ///
    /// Only the first call on a connecting or open link issues a close; later
    /// calls, and calls after the transport already closed, return `false`.
    pub async fn close(&self) -> bool {
        let claimed = [LinkState::Open, LinkState::Connecting]
            .into_iter()
            .any(|from| {
                self.state
                    .compare_exchange(
                        from as u8,
                        LinkState::Closing as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
            });

        if claimed {
            let _ = self.commands.send(LinkCommand::Close).await;
        }
        claimed
    }

    /// Wait for the next transport event; `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }
}

impl UpstreamPeer {
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Mark the link open and report it.
    pub fn open(&self) {
        self.state.store(LinkState::Open as u8, Ordering::SeqCst);
        self.emit(UpstreamEvent::Opened);
    }

    /// Deliver a message to the session.
    ///
    /// Returns `false` if the event channel is full or the session is gone;
    /// check [`has_room`](Self::has_room) first to avoid losing frames.
    pub fn deliver(&self, message: UpstreamMessage) -> bool {
        self.emit(UpstreamEvent::Message(message))
    }

    /// Whether the next event can be queued without waiting.
    ///
    /// Also true once the session has dropped its link, since events are
    /// discarded from then on.
    pub fn has_room(&self) -> bool {
        self.events.capacity() > 0 || self.events.is_closed()
    }

    /// Mark the link closed and report the reason.
    pub fn closed(&self, reason: Option<String>) {
        self.state.store(LinkState::Closed as u8, Ordering::SeqCst);
        self.emit(UpstreamEvent::Closed(reason));
    }

    /// Mark the link closed after a transport error.
    pub fn failed(&self, error: impl Into<String>) {
        self.state.store(LinkState::Closed as u8, Ordering::SeqCst);
        self.emit(UpstreamEvent::Failed(error.into()));
    }

    /// Next command from the session; `None` once the link handle is dropped.
    pub async fn next_command(&mut self) -> Option<LinkCommand> {
        self.commands.recv().await
    }

    /// Take a pending command without waiting.
    pub fn try_next_command(&mut self) -> Option<LinkCommand> {
        self.commands.try_recv().ok()
    }

    // A lifecycle event lost to a full channel is recovered when the peer is
    // dropped: the session then sees the event stream end.
    fn emit(&self, event: UpstreamEvent) -> bool {
        self.events.try_send(event).is_ok()
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens upstream links for session targets.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Establish a connection; returns once the handshake has completed.
    async fn connect(&self, target: &SessionTarget) -> RelayResult<UpstreamLink>;
}

/// Connects to the voice service over a websocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    channel_capacity: usize,
}

impl WebSocketConnector {
    pub fn new(channel_capacity: usize) -> Self {
        Self { channel_capacity }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, target: &SessionTarget) -> RelayResult<UpstreamLink> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(target.as_str())
            .await
            .map_err(|e| RelayError::UpstreamConnectionFailure(e.to_string()))?;

        debug!(status = %response.status(), "Upstream websocket handshake complete");

        let (link, peer) = UpstreamLink::channel(self.channel_capacity);
        tokio::spawn(pump_websocket(ws_stream, peer));
        Ok(link)
    }
}

/// Move frames between the websocket and the link until either side closes.
async fn pump_websocket<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>, mut peer: UpstreamPeer)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut close_deadline: Option<Instant> = None;

    peer.open();
    info!("Upstream link open");

    loop {
        // Only read from the socket when the frame can be queued right away.
        let room = peer.has_room();

        tokio::select! {
            command = peer.commands.recv(), if close_deadline.is_none() => match command {
                Some(LinkCommand::Audio(audio)) => {
                    if let Err(e) = ws_sink.send(Message::Binary(audio)).await {
                        warn!("Failed to send audio upstream: {}", e);
                        peer.failed(e.to_string());
                        break;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    debug!("Closing upstream link");
                    close_deadline = Some(Instant::now() + CLOSE_GRACE);
                    if let Err(e) = ws_sink.send(Message::Close(None)).await {
                        debug!("Failed to send close frame: {}", e);
                        peer.closed(None);
                        break;
                    }
                }
            },

            // Resolves once the session frees a slot; the permit is released at once.
            _ = peer.events.reserve(), if !room => {}

            message = ws_stream.next(), if room => match message {
                Some(Ok(Message::Binary(data))) => {
                    peer.deliver(UpstreamMessage::Binary(data));
                }
                Some(Ok(Message::Text(text))) => {
                    peer.deliver(UpstreamMessage::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        debug!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    info!(reason = ?reason, "Upstream link closed by peer");
                    peer.closed(reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if close_deadline.is_some() {
                        debug!("Upstream error during close: {}", e);
                        peer.closed(None);
                    } else {
                        warn!("Upstream websocket error: {}", e);
                        peer.failed(e.to_string());
                    }
                    break;
                }
                None => {
                    peer.closed(None);
                    break;
                }
            },

            _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                debug!("Upstream did not acknowledge close in time");
                peer.closed(None);
                break;
            }
        }
    }
}
