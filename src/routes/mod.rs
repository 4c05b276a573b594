use std::sync::Arc;

use axum::{Router, middleware};

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

pub mod api;
pub mod relay;

/// Assemble the full application router.
///
/// The relay route sits behind the connection limit middleware; the read-only
/// API routes do not. Serve with `into_make_service_with_connect_info` so the
/// middleware can see the client address.
pub fn create_app(state: Arc<AppState>) -> Router {
    let relay_routes = relay::create_relay_router().layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));

    api::create_api_router()
        .merge(relay_routes)
        .with_state(state)
}
