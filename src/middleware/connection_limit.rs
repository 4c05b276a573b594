//! Connection limit middleware for relay sessions
//!
//! This module provides middleware to enforce session limits:
//! - Global maximum concurrent sessions
//! - Per-IP session limits
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use voice_relay::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/stream", post(stream_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::errors::AppError;
use crate::state::AppState;

/// Middleware that enforces session limits.
///
/// This middleware:
/// 1. Checks if the global session limit has been reached
/// 2. Checks if the per-IP session limit has been reached
/// 3. Returns 503 Service Unavailable if global limit is exceeded
/// 4. Returns 429 Too Many Requests if per-IP limit is exceeded
/// 5. Injects the held `ConnectionSlot` so the handler keeps it for the
///    lifetime of the session
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(slot) => {
            request.extensions_mut().insert(Arc::new(slot));
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(ip = %client_ip, "Rejecting relay session: {}", e);
            AppError::from(e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::state::ConnectionSlot;
    use axum::{
        Extension, Router,
        extract::connect_info::MockConnectInfo,
        http::StatusCode,
        middleware,
        routing::get,
    };
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    fn limited_state(max_total: Option<usize>, per_ip: usize) -> Arc<AppState> {
        let mut config = ServerConfig::new("https://voice.example.com");
        config.max_sessions = max_total;
        config.max_sessions_per_ip = per_ip;
        AppState::new(config)
    }

    fn app(state: Arc<AppState>, ip: [u8; 4]) -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(slot): Extension<Arc<ConnectionSlot>>| async move {
                    slot.ip().to_string()
                }),
            )
            .layer(middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
            .layer(MockConnectInfo(SocketAddr::from((ip, 40000))))
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_slot_injected_and_released() {
        let state = limited_state(Some(10), 3);

        let response = app(state.clone(), [10, 0, 0, 7])
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"10.0.0.7");

        // Handler finished, slot dropped
        assert_eq!(state.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_per_ip_limit_returns_429() {
        let state = limited_state(Some(10), 1);
        let ip: IpAddr = Ipv4Addr::new(10, 0, 0, 8).into();
        let _held = state.try_acquire_connection(ip).unwrap();

        let response = app(state.clone(), [10, 0, 0, 8])
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.ip_connection_count(&ip), 1);
    }

    #[tokio::test]
    async fn test_global_limit_returns_503() {
        let state = limited_state(Some(1), 10);
        let _held = state
            .try_acquire_connection(Ipv4Addr::new(10, 0, 0, 1).into())
            .unwrap();

        let response = app(state.clone(), [10, 0, 0, 2])
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.connection_count(), 1);
    }
}
