//! Base types for the stream relay.
//!
//! This module defines the error taxonomy, the call context that identifies a
//! session, the connection target returned by the session resolver, and the
//! state enums observed while a session runs.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Identifier used when the caller or callee is not supplied.
pub const UNKNOWN_PARTY: &str = "unknown";

// =============================================================================
// Error Types
// =============================================================================

/// Why provisioning a session target failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningReason {
    /// The resolver could not be reached
    Transport(String),
    /// The resolver answered with a non-success status
    Status(u16),
    /// The response body was not the expected JSON document
    InvalidBody(String),
    /// The response did not carry a connection target
    MissingTarget,
}

impl fmt::Display for ProvisioningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningReason::Transport(e) => write!(f, "transport error: {e}"),
            ProvisioningReason::Status(code) => write!(f, "resolver returned status {code}"),
            ProvisioningReason::InvalidBody(e) => write!(f, "invalid response body: {e}"),
            ProvisioningReason::MissingTarget => write!(f, "response is missing the join url"),
        }
    }
}

/// Stage of session setup that a timeout applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// Session resolver round trip
    Resolution,
    /// Upstream websocket handshake
    Handshake,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::Resolution => write!(f, "session resolution"),
            SetupStage::Handshake => write!(f, "upstream handshake"),
        }
    }
}

/// Errors that can terminate a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The session resolver was unreachable or answered with an unusable body
    #[error("Provisioning failed: {0}")]
    ProvisioningFailure(ProvisioningReason),

    /// The upstream handshake failed or the socket errored mid-session
    #[error("Upstream connection failed: {0}")]
    UpstreamConnectionFailure(String),

    /// A text frame from upstream could not be interpreted
    #[error("Malformed control message: {0}")]
    MalformedControlMessage(String),

    /// The inbound client body errored
    #[error("Client stream failed: {0}")]
    ClientStreamFailure(String),

    /// Session setup did not finish in time
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    TimeoutFailure { stage: SetupStage, after: Duration },

    /// The resolver returned a target the relay refuses to connect to
    #[error("Invalid session target: {0}")]
    InvalidTarget(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

// =============================================================================
// Call Context
// =============================================================================

/// Identifiers of the call being relayed.
///
/// Serializes to the resolver request body `{"from", "to", "callId"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    pub from: String,
    pub to: String,
    pub call_id: String,
}

impl CallContext {
    /// Build a context, substituting [`UNKNOWN_PARTY`] for absent or blank parties.
    pub fn new(call_id: impl Into<String>, from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: normalize_party(from),
            to: normalize_party(to),
            call_id: call_id.into(),
        }
    }
}

fn normalize_party(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_PARTY.to_string(),
    }
}

/// Connection target for the remote voice service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget(String);

impl SessionTarget {
    /// Wrap a resolver-provided url; an empty value is a provisioning failure.
    pub fn new(url: impl Into<String>) -> RelayResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(RelayError::ProvisioningFailure(
                ProvisioningReason::MissingTarget,
            ));
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Session / Link State
// =============================================================================

/// Lifecycle of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Resolving,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Resolving => write!(f, "resolving"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl LinkState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkState::Connecting,
            1 => LinkState::Open,
            2 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Open => write!(f, "open"),
            LinkState::Closing => write!(f, "closing"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// What ended an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Upstream sent a close frame or the socket ended
    UpstreamClosed(Option<String>),
    /// Upstream socket errored
    UpstreamFailed(String),
    /// The client finished its request body
    ClientEnded,
    /// The client request body errored
    ClientFailed(String),
    /// The client stopped reading the response
    ClientGone,
    /// Upstream sent a text frame that could not be interpreted
    MalformedControl(String),
}

impl TerminationReason {
    /// Whether the session ended because of a failure rather than a normal close.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TerminationReason::UpstreamFailed(_)
                | TerminationReason::ClientFailed(_)
                | TerminationReason::MalformedControl(_)
        )
    }

    /// The error value for failure terminations.
    pub fn to_error(&self) -> Option<RelayError> {
        match self {
            TerminationReason::UpstreamFailed(e) => {
                Some(RelayError::UpstreamConnectionFailure(e.clone()))
            }
            TerminationReason::ClientFailed(e) => Some(RelayError::ClientStreamFailure(e.clone())),
            TerminationReason::MalformedControl(e) => {
                Some(RelayError::MalformedControlMessage(e.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::UpstreamClosed(Some(reason)) => {
                write!(f, "upstream closed: {reason}")
            }
            TerminationReason::UpstreamClosed(None) => write!(f, "upstream closed"),
            TerminationReason::UpstreamFailed(e) => write!(f, "upstream failed: {e}"),
            TerminationReason::ClientEnded => write!(f, "client ended"),
            TerminationReason::ClientFailed(e) => write!(f, "client failed: {e}"),
            TerminationReason::ClientGone => write!(f, "client gone"),
            TerminationReason::MalformedControl(e) => write!(f, "malformed control frame: {e}"),
        }
    }
}
