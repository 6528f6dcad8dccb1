//! Core Router
//!
//! Unauthenticated infrastructure routes: health check and the realtime socket.

use crate::core::AppState;
use crate::realtime::socket::ws_connect;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_connect))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
    }))
}
