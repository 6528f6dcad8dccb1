use crate::core::auth::Ctx;
use crate::core::models::PresenceView;
use crate::core::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

/// GET /users/{id}/presence
///
/// Live view from the connection registry, not the persisted projection.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    _ctx: Ctx,
) -> Json<PresenceView> {
    Json(state.hub.presence_of(&user_id))
}
