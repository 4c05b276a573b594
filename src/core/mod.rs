pub mod relay;

// Re-export commonly used types for convenience
pub use relay::{
    ActiveSession, CallContext, ControlEvent, HttpSessionResolver, RelayError, RelayResult,
    RelaySession, RelaySettings, RelayStats, SessionResolver, SessionState, SessionTarget,
    UpstreamConnector, UpstreamLink, WebSocketConnector,
};
