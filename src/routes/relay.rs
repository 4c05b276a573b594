//! Relay route configuration

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

use crate::handlers::relay::stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay router
///
/// # Endpoint
///
/// `POST /stream` - full-duplex audio relay
///
/// # Protocol
///
/// The client sends call identifiers as headers and streams raw audio as the
/// request body:
///
/// ```text
/// POST /stream
/// x-call-id: abc
/// x-from: +15550100
/// x-to: +15550199
/// ```
///
/// The response is `200 application/octet-stream`; its body carries the
/// voice service's audio in batches until either side ends the session.
///
/// Connection limits are applied in `main` so they can share state.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", post(stream_handler))
        .layer(TraceLayer::new_for_http())
}
