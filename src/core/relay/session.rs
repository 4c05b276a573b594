//! Relay session state machine.
//!
//! A session moves `Resolving -> Connecting -> Active -> Closing -> Closed`.
//! [`RelaySession::establish`] covers resolution and the upstream handshake
//! and yields an [`ActiveSession`]; [`ActiveSession::run`] then pumps audio in
//! both directions until the first termination trigger and tears down both
//! sides exactly once. A session dropped before it reached `Closed`, for
//! instance because the client went away during setup, is counted as failed.
//!
//! Each session owns its link, buffer and output channel; nothing here is
//! shared between sessions except the [`RelayStats`] counters.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::base::{
    CallContext, LinkState, RelayError, RelayResult, SessionState, SessionTarget, SetupStage,
    TerminationReason,
};
use super::buffer::{DEFAULT_FLUSH_WINDOW, RelayBuffer};
use super::messages::{ControlEvent, parse_control_frame};
use super::resolver::SessionResolver;
use super::stats::RelayStats;
use super::upstream::{UpstreamConnector, UpstreamEvent, UpstreamLink, UpstreamMessage};
use crate::utils::validate_session_target;

/// Default bound on session resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the upstream handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Window for batching upstream audio before it is written to the client
    pub flush_window: Duration,
    /// Bound on the resolver call
    pub resolve_timeout: Duration,
    /// Bound on the upstream handshake
    pub connect_timeout: Duration,
    /// Accept targets on loopback/private addresses
    pub allow_private_targets: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            flush_window: DEFAULT_FLUSH_WINDOW,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            allow_private_targets: false,
        }
    }
}

/// Observable session activity.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Control(ControlEvent),
}

/// Sender half for [`SessionEvent`]s.
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

/// Accounting for a finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub call_id: String,
    pub reason: TerminationReason,
    /// Client bytes handed to the upstream link
    pub bytes_upstream: u64,
    /// Upstream audio bytes received
    pub bytes_received: u64,
    /// Upstream audio bytes written to the client
    pub bytes_flushed: u64,
    /// Upstream audio bytes never written to the client
    pub bytes_discarded: u64,
    pub flushes: u64,
    /// Client chunks dropped because the link was not open
    pub dropped_sends: u64,
    /// Whether teardown issued the upstream close (false if upstream closed first)
    pub closed_upstream: bool,
}

impl SessionSummary {
    /// The error behind a failed session, for diagnostics.
    pub fn error(&self) -> Option<RelayError> {
        self.reason.to_error()
    }
}

// =============================================================================
// Setup
// =============================================================================

/// A session that has not reached `Active` yet.
pub struct RelaySession {
    id: Uuid,
    context: CallContext,
    state: SessionState,
    settings: RelaySettings,
    stats: Arc<RelayStats>,
    events: Option<SessionEventSender>,
}

impl RelaySession {
    pub fn new(context: CallContext, settings: RelaySettings, stats: Arc<RelayStats>) -> Self {
        stats.session_started();
        Self {
            id: Uuid::new_v4(),
            context,
            state: SessionState::Resolving,
            settings,
            stats,
            events: None,
        }
    }

    /// Report state changes and control events on `events`.
    pub fn with_events(mut self, events: SessionEventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolve the target and open the upstream link.
    ///
    /// On failure the session goes straight to `Closed` and no link is left
    /// open.
    pub async fn establish(
        mut self,
        resolver: &dyn SessionResolver,
        connector: &dyn UpstreamConnector,
    ) -> RelayResult<ActiveSession> {
        info!(
            session_id = %self.id,
            call_id = %self.context.call_id,
            from = %self.context.from,
            to = %self.context.to,
            "Resolving relay session"
        );

        let target = match self.resolve_target(resolver).await {
            Ok(target) => target,
            Err(e) => return Err(self.abort(e)),
        };

        self.transition(SessionState::Connecting);
        let link = match self.open_link(connector, &target).await {
            Ok(link) => link,
            Err(e) => return Err(self.abort(e)),
        };

        self.transition(SessionState::Active);
        self.stats.session_activated();

        Ok(ActiveSession {
            buffer: RelayBuffer::new(self.settings.flush_window),
            session: self,
            link,
            bytes_upstream: 0,
            bytes_delivered: 0,
            flushes: 0,
            dropped_sends: 0,
        })
    }

    async fn resolve_target(&self, resolver: &dyn SessionResolver) -> RelayResult<SessionTarget> {
        let after = self.settings.resolve_timeout;
        let target = timeout(after, resolver.resolve(&self.context))
            .await
            .map_err(|_| RelayError::TimeoutFailure {
                stage: SetupStage::Resolution,
                after,
            })??;

        validate_session_target(target.as_str(), self.settings.allow_private_targets)
            .map_err(|e| RelayError::InvalidTarget(e.to_string()))?;

        Ok(target)
    }

    async fn open_link(
        &self,
        connector: &dyn UpstreamConnector,
        target: &SessionTarget,
    ) -> RelayResult<UpstreamLink> {
        let after = self.settings.connect_timeout;
        let handshake = async {
            let mut link = connector.connect(target).await?;
            match link.recv().await {
                Some(UpstreamEvent::Opened) => Ok(link),
                Some(UpstreamEvent::Failed(e)) => Err(RelayError::UpstreamConnectionFailure(e)),
                Some(UpstreamEvent::Closed(reason)) => {
                    Err(RelayError::UpstreamConnectionFailure(format!(
                        "closed before open ({})",
                        reason.as_deref().unwrap_or("no reason")
                    )))
                }
                Some(UpstreamEvent::Message(_)) => Err(RelayError::UpstreamConnectionFailure(
                    "message received before open".to_string(),
                )),
                None => Err(RelayError::UpstreamConnectionFailure(
                    "transport ended before open".to_string(),
                )),
            }
        };

        timeout(after, handshake)
            .await
            .map_err(|_| RelayError::TimeoutFailure {
                stage: SetupStage::Handshake,
                after,
            })?
    }

    fn abort(&mut self, error: RelayError) -> RelayError {
        error!(
            session_id = %self.id,
            call_id = %self.context.call_id,
            state = %self.state,
            "Relay session setup failed: {}",
            error
        );
        self.transition(SessionState::Closed);
        self.stats.session_closed(false, true);
        error
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.state;
        self.state = next;
        debug!(
            session_id = %self.id,
            call_id = %self.context.call_id,
            from = %from,
            to = %next,
            "Relay session state changed"
        );
        self.emit(SessionEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

// Settles the counters when a session is dropped before it closed, e.g. the
// client disconnected mid-setup and the handler future was cancelled.
impl Drop for RelaySession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        let was_active = matches!(self.state, SessionState::Active | SessionState::Closing);
        warn!(
            session_id = %self.id,
            call_id = %self.context.call_id,
            state = %self.state,
            "Relay session dropped before closing"
        );
        self.transition(SessionState::Closed);
        self.stats.session_closed(was_active, true);
    }
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("state", &self.state)
            .finish()
    }
}

// =============================================================================
// Active session
// =============================================================================

/// A session with an open upstream link.
pub struct ActiveSession {
    session: RelaySession,
    link: UpstreamLink,
    buffer: RelayBuffer,
    bytes_upstream: u64,
    bytes_delivered: u64,
    flushes: u64,
    dropped_sends: u64,
}

impl ActiveSession {
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn context(&self) -> &CallContext {
        &self.session.context
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Relay until a termination trigger fires, then tear down.
    ///
    /// `inbound` is the client's audio body; flushed upstream audio is sent on
    /// `outbound`, which is dropped when the session closes so the client
    /// response ends.
    pub async fn run<S, E>(mut self, inbound: S, outbound: mpsc::Sender<Bytes>) -> SessionSummary
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let mut inbound = pin!(inbound);

        let reason = loop {
            tokio::select! {
                chunk = inbound.next() => match chunk {
                    Some(Ok(audio)) => self.forward_upstream(audio).await,
                    Some(Err(e)) => break TerminationReason::ClientFailed(e.to_string()),
                    None => break TerminationReason::ClientEnded,
                },

                event = self.link.recv() => match event {
                    Some(UpstreamEvent::Message(UpstreamMessage::Binary(frame))) => {
                        if let Some(chunk) = self.buffer.push(&frame, Instant::now()) {
                            let len = chunk.len();
                            if outbound.send(chunk).await.is_err() {
                                break TerminationReason::ClientGone;
                            }
                            self.bytes_delivered += len as u64;
                            self.flushes += 1;
                            self.session.stats.record_flush(len);
                        }
                    }
                    Some(UpstreamEvent::Message(UpstreamMessage::Text(text))) => {
                        match parse_control_frame(&text) {
                            Ok(Some(event)) => self.observe(event),
                            Ok(None) => {}
                            Err(e) => {
                                self.session.stats.record_malformed_frame();
                                let detail = match e {
                                    RelayError::MalformedControlMessage(detail) => detail,
                                    other => other.to_string(),
                                };
                                break TerminationReason::MalformedControl(detail);
                            }
                        }
                    }
                    Some(UpstreamEvent::Opened) => {}
                    Some(UpstreamEvent::Closed(reason)) => break TerminationReason::UpstreamClosed(reason),
                    Some(UpstreamEvent::Failed(e)) => break TerminationReason::UpstreamFailed(e),
                    None => break TerminationReason::UpstreamClosed(None),
                },

                _ = outbound.closed() => break TerminationReason::ClientGone,
            }
        };

        self.teardown(reason, outbound).await
    }

    async fn forward_upstream(&mut self, audio: Bytes) {
        if audio.is_empty() {
            return;
        }

        let len = audio.len();
        if self.link.send(audio).await {
            self.bytes_upstream += len as u64;
            self.session.stats.record_upstream(len);
        } else {
            self.dropped_sends += 1;
            self.session.stats.record_dropped_send();
            debug!(
                session_id = %self.session.id,
                bytes = len,
                link_state = %self.link.state(),
                "Upstream link not open, dropping client audio"
            );
        }
    }

    fn observe(&mut self, event: ControlEvent) {
        let session_id = self.session.id;
        let call_id = &self.session.context.call_id;

        match &event {
            ControlEvent::CallStarted { call_id: remote } => {
                info!(%session_id, %call_id, remote_call_id = ?remote, "Voice service call started");
            }
            ControlEvent::State { state } => {
                info!(%session_id, %call_id, state = %state, "Voice service state changed");
            }
            ControlEvent::Transcript { role, medium, text } => {
                info!(%session_id, %call_id, role = %role, medium = %medium, text = %text, "Transcript");
            }
            ControlEvent::PlaybackClearBuffer => {
                info!(%session_id, %call_id, "Voice service requested playback clear");
            }
            ControlEvent::Error { error } => {
                self.session.stats.record_upstream_error();
                warn!(%session_id, %call_id, error = %error, "Voice service reported an error");
            }
            ControlEvent::Unrecognized { message_type } => {
                debug!(%session_id, %call_id, message_type = ?message_type, "Unrecognized control frame");
            }
        }

        self.session.emit(SessionEvent::Control(event));
    }

    async fn teardown(self, reason: TerminationReason, outbound: mpsc::Sender<Bytes>) -> SessionSummary {
        let ActiveSession {
            mut session,
            link,
            mut buffer,
            bytes_upstream,
            bytes_delivered,
            flushes,
            dropped_sends,
        } = self;

        session.transition(SessionState::Closing);

        let closed_upstream = link.close().await;
        drop(outbound);
        buffer.discard();

        let bytes_received = buffer.received_bytes();
        let bytes_discarded = bytes_received - bytes_delivered;
        session.stats.record_discarded(bytes_discarded as usize);

        session.transition(SessionState::Closed);
        session.stats.session_closed(true, reason.is_failure());

        if reason.is_failure() {
            warn!(
                session_id = %session.id,
                call_id = %session.context.call_id,
                bytes_upstream,
                bytes_flushed = bytes_delivered,
                bytes_discarded,
                "Relay session failed: {}",
                reason
            );
        } else {
            info!(
                session_id = %session.id,
                call_id = %session.context.call_id,
                bytes_upstream,
                bytes_flushed = bytes_delivered,
                bytes_discarded,
                "Relay session closed: {}",
                reason
            );
        }

        SessionSummary {
            session_id: session.id,
            call_id: session.context.call_id.clone(),
            reason,
            bytes_upstream,
            bytes_received,
            bytes_flushed: bytes_delivered,
            bytes_discarded,
            flushes,
            dropped_sends,
            closed_upstream,
        }
    }
}

impl fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSession")
            .field("session", &self.session)
            .field("link_state", &self.link.state())
            .field("pending_bytes", &self.buffer.pending_len())
            .finish()
    }
}
