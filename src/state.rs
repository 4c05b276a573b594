//! Shared application state.
//!
//! Holds the configured collaborators (resolver, connector), the process-wide
//! relay counters, the registry of live sessions and the connection tracker
//! used by the limit middleware.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::core::relay::{
    CallContext, ControlEvent, HttpSessionResolver, RelayStats, SessionEvent, SessionEventSender,
    SessionResolver, SessionState, UpstreamConnector, WebSocketConnector,
};

// =============================================================================
// Connection limits
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("Server at capacity. Please try again later.")]
    GlobalLimitReached,
    #[error("Too many sessions from your IP address.")]
    PerIpLimitReached,
}

/// Counts open relay sessions globally and per client IP.
#[derive(Debug)]
pub struct ConnectionTracker {
    max_total: Option<usize>,
    max_per_ip: usize,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl ConnectionTracker {
    pub fn new(max_total: Option<usize>, max_per_ip: usize) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    /// Take a slot for `ip`; the slot is released when dropped.
    pub fn try_acquire(
        self: &Arc<Self>,
        ip: IpAddr,
    ) -> Result<ConnectionSlot, ConnectionLimitError> {
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match self.max_total {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        let mut count = self.per_ip.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            drop(count);
            self.total.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;

        Ok(ConnectionSlot {
            tracker: Arc::clone(self),
            ip,
        })
    }

    fn release(&self, ip: IpAddr) {
        self.total.fetch_sub(1, Ordering::AcqRel);

        let now_empty = match self.per_ip.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_empty {
            self.per_ip.remove_if(&ip, |_, count| *count == 0);
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn for_ip(&self, ip: &IpAddr) -> usize {
        self.per_ip.get(ip).map(|count| *count).unwrap_or(0)
    }
}

/// A held connection slot.
#[derive(Debug)]
pub struct ConnectionSlot {
    tracker: Arc<ConnectionTracker>,
    ip: IpAddr,
}

impl ConnectionSlot {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.tracker.release(self.ip);
    }
}

// =============================================================================
// Session registry
// =============================================================================

/// Live view of one relay session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub call: CallContext,
    pub state: SessionState,
    /// Last state reported by the voice service
    pub service_state: Option<String>,
    pub started_at_ms: u64,
}

/// Sessions that have not reached `Closed` yet.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the sender its events should go to.
    ///
    /// The entry follows the session's events and is removed once the session
    /// closes or its event sender is dropped.
    pub fn track(self: &Arc<Self>, session_id: Uuid, call: &CallContext) -> SessionEventSender {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        self.sessions.insert(
            session_id,
            SessionInfo {
                session_id,
                call: call.clone(),
                state: SessionState::Resolving,
                service_state: None,
                started_at_ms,
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                registry.apply(session_id, &event);
            }
            registry.sessions.remove(&session_id);
        });

        tx
    }

    /// Fold a session event into the registry entry.
    pub fn apply(&self, session_id: Uuid, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged {
                to: SessionState::Closed,
                ..
            } => {
                self.sessions.remove(&session_id);
            }
            SessionEvent::StateChanged { to, .. } => {
                if let Some(mut info) = self.sessions.get_mut(&session_id) {
                    info.state = *to;
                }
            }
            SessionEvent::Control(ControlEvent::State { state }) => {
                if let Some(mut info) = self.sessions.get_mut(&session_id) {
                    info.service_state = Some(state.clone());
                }
            }
            SessionEvent::Control(_) => {}
        }
    }

    pub fn get(&self, session_id: &Uuid) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|info| info.value().clone())
    }

    /// All live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by_key(|info| info.started_at_ms);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =============================================================================
// Application state
// =============================================================================

pub struct AppState {
    pub config: ServerConfig,
    pub resolver: Arc<dyn SessionResolver>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub stats: Arc<RelayStats>,
    pub sessions: Arc<SessionRegistry>,
    connections: Arc<ConnectionTracker>,
}

impl AppState {
    /// State wired to the HTTP resolver and websocket connector.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let resolver = Arc::new(HttpSessionResolver::new(&config.resolver_config()));
        let connector = Arc::new(WebSocketConnector::new(config.outbound_channel_capacity));
        Self::with_collaborators(config, resolver, connector)
    }

    /// State with caller-supplied collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        resolver: Arc<dyn SessionResolver>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Arc<Self> {
        let connections = Arc::new(ConnectionTracker::new(
            config.max_sessions,
            config.max_sessions_per_ip,
        ));

        Arc::new(Self {
            config,
            resolver,
            connector,
            stats: Arc::new(RelayStats::new()),
            sessions: Arc::new(SessionRegistry::new()),
            connections,
        })
    }

    pub fn try_acquire_connection(
        &self,
        ip: IpAddr,
    ) -> Result<ConnectionSlot, ConnectionLimitError> {
        self.connections.try_acquire(ip)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.total()
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.connections.for_ip(ip)
    }
}
