//! In-process doubles for the relay's collaborators

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use voice_relay::core::relay::{
    CallContext, ProvisioningReason, RelayError, RelayResult, SessionResolver, SessionTarget,
    UpstreamConnector, UpstreamLink, UpstreamPeer,
};

/// Resolver that answers with a fixed target after an optional delay
pub struct StaticResolver {
    target: String,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(target: impl Into<String>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(target)
        }
    }
}

#[async_trait]
impl SessionResolver for StaticResolver {
    async fn resolve(&self, _context: &CallContext) -> RelayResult<SessionTarget> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        SessionTarget::new(self.target.clone())
    }
}

/// Resolver that always fails with the given provisioning reason
pub struct FailingResolver(pub ProvisioningReason);

#[async_trait]
impl SessionResolver for FailingResolver {
    async fn resolve(&self, _context: &CallContext) -> RelayResult<SessionTarget> {
        Err(RelayError::ProvisioningFailure(self.0.clone()))
    }
}

/// How [`PeerConnector`] treats new links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    /// Open the link immediately
    Open,
    /// Leave the link connecting; the test drives the handshake
    Manual,
}

/// Connector that hands the transport side of each link to the test
pub struct PeerConnector {
    mode: PeerMode,
    peers: mpsc::UnboundedSender<UpstreamPeer>,
    pub connects: AtomicUsize,
}

impl PeerConnector {
    pub fn new(mode: PeerMode) -> (Self, mpsc::UnboundedReceiver<UpstreamPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode,
                peers: tx,
                connects: AtomicUsize::new(0),
            },
            rx,
        )
    }
}

#[async_trait]
impl UpstreamConnector for PeerConnector {
    async fn connect(&self, _target: &SessionTarget) -> RelayResult<UpstreamLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (link, peer) = UpstreamLink::channel(64);
        if self.mode == PeerMode::Open {
            peer.open();
        }
        let _ = self.peers.send(peer);
        Ok(link)
    }
}
