//! Chat Handlers and Router

use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

pub mod conversations;
pub mod messages;
pub mod presence;

/// Authenticated chat routes.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/conversations/{id}/messages",
            post(messages::send_message).get(conversations::get_messages),
        )
        .route(
            "/conversations/{id}/read",
            put(conversations::mark_conversation_read),
        )
        .route("/messages/{id}/read", put(messages::mark_message_read))
        .route(
            "/messages/{id}",
            axum::routing::delete(messages::delete_message),
        )
        .route("/users/{id}/presence", get(presence::get_presence))
        .route_layer(middleware::from_fn_with_state(state, mw_require_auth))
}
