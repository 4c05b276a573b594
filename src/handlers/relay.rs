//! Streaming relay endpoint
//!
//! `POST /stream` takes the call identifiers from headers and the caller's
//! audio as the request body. The session is resolved and the upstream link
//! opened before any response is produced, so setup failures get a proper
//! status code. After that the response body streams flushed upstream audio
//! until the session closes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::Response,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::relay::{CallContext, RelaySession};
use crate::errors::{AppError, AppResult};
use crate::state::{AppState, ConnectionSlot};

/// Header carrying the call identifier (required)
pub const CALL_ID_HEADER: &str = "x-call-id";

/// Header carrying the caller identifier
pub const FROM_HEADER: &str = "x-from";

/// Header carrying the callee identifier
pub const TO_HEADER: &str = "x-to";

/// Relay handler
///
/// # Headers
/// * `x-call-id` - call identifier, 400 when absent or empty
/// * `x-from` / `x-to` - parties, default to `unknown`
///
/// # Returns
/// * `200 application/octet-stream` streaming relayed audio, or an error
///   status if resolution or the upstream handshake fails
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let (mut parts, body) = request.into_parts();

    // Held until the session ends; absent when no limit middleware is installed.
    let slot = parts.extensions.remove::<Arc<ConnectionSlot>>();

    let call_id =
        header_value(&parts.headers, CALL_ID_HEADER).ok_or(AppError::MissingHeader(CALL_ID_HEADER))?;
    let context = CallContext::new(
        call_id,
        header_value(&parts.headers, FROM_HEADER),
        header_value(&parts.headers, TO_HEADER),
    );

    let session = RelaySession::new(
        context.clone(),
        state.config.relay_settings(),
        state.stats.clone(),
    );
    let session_id = session.id();
    let events = state.sessions.track(session_id, &context);

    let active = session
        .with_events(events)
        .establish(state.resolver.as_ref(), state.connector.as_ref())
        .await?;

    info!(
        %session_id,
        call_id = %context.call_id,
        client_ip = ?slot.as_ref().map(|s| s.ip()),
        "Relay session established"
    );

    let (tx, mut rx) = mpsc::channel::<Bytes>(state.config.outbound_channel_capacity);

    tokio::spawn(async move {
        let _slot = slot;
        let summary = active.run(body.into_data_stream(), tx).await;
        debug!(
            session_id = %summary.session_id,
            reason = %summary.reason,
            flushes = summary.flushes,
            dropped_sends = summary.dropped_sends,
            "Relay task finished"
        );
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Trimmed, non-empty header value.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
