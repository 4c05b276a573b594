//! Stream relay between an HTTP client and a realtime voice service.
//!
//! One relay session couples two streaming connections:
//!
//! - the client side: an HTTP request body of raw audio in, and the response
//!   body of buffered audio out
//! - the upstream side: a WebSocket to the voice service, whose join URL is
//!   provisioned per call through a REST resolver
//!
//! # Architecture
//!
//! - `SessionResolver` trait turns a [`CallContext`] into a [`SessionTarget`]
//! - `UpstreamConnector` trait opens an [`UpstreamLink`] to that target
//! - [`RelayBuffer`] batches upstream audio into fixed windows
//! - [`RelaySession`] / [`ActiveSession`] drive the lifecycle and teardown
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay::core::relay::*;
//! use std::sync::Arc;
//!
//! let context = CallContext::new("call-42", Some("+15550100"), None);
//! let session = RelaySession::new(context, RelaySettings::default(), Arc::new(RelayStats::new()));
//! let active = session.establish(&resolver, &WebSocketConnector::default()).await?;
//! let summary = active.run(body_stream, response_tx).await;
//! ```

mod base;
mod buffer;
mod messages;
mod resolver;
mod session;
mod stats;
mod upstream;

pub use base::{
    CallContext, LinkState, ProvisioningReason, RelayError, RelayResult, SessionState,
    SessionTarget, SetupStage, TerminationReason, UNKNOWN_PARTY,
};
pub use buffer::{DEFAULT_FLUSH_WINDOW, RelayBuffer};
pub use messages::{ControlEvent, parse_control_frame};
pub use resolver::{
    API_KEY_HEADER, DEFAULT_JOIN_URL_POINTER, DEFAULT_RESOLVER_PATH, HttpSessionResolver,
    ResolverConfig, SessionResolver,
};
pub use session::{
    ActiveSession, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESOLVE_TIMEOUT, RelaySession, RelaySettings,
    SessionEvent, SessionEventSender, SessionSummary,
};
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use upstream::{
    DEFAULT_CHANNEL_CAPACITY, LinkCommand, UpstreamConnector, UpstreamEvent, UpstreamLink,
    UpstreamMessage, UpstreamPeer, WebSocketConnector,
};
