use axum::{Json, extract::State};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::core::relay::RelayStatsSnapshot;
use crate::state::{AppState, SessionInfo};

/// Health check
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// Process-wide relay counters
pub async fn relay_stats(State(state): State<Arc<AppState>>) -> Json<RelayStatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Sessions that have not closed yet, oldest first
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions: Vec<SessionInfo> = state.sessions.list();
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}
