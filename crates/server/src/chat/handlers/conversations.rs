use crate::core::auth::Ctx;
use crate::core::error::Result;
use crate::core::store::page_size;
use crate::core::AppState;
use crate::realtime::ServerEvent;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// GET /conversations/{id}/messages
///
/// Fetching history counts as viewing the conversation.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    ctx: Ctx,
) -> Result<Json<Value>> {
    let page = state
        .messages
        .messages_for(
            &conversation_id,
            ctx.user_id(),
            page_size(query.limit),
            query.cursor.as_deref(),
        )
        .await?;

    state.hub.conversation_viewed(ctx.user_id(), &conversation_id);

    Ok(Json(json!({ "success": true, "data": page })))
}

/// PUT /conversations/{id}/read
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    ctx: Ctx,
) -> Result<Json<Value>> {
    let updated = state
        .messages
        .mark_conversation_read(&conversation_id, ctx.user_id())
        .await?;
    debug!(
        "[Chat] {} read {} message(s) in {}",
        ctx.user_id(),
        updated,
        conversation_id
    );

    state.hub.conversation_viewed(ctx.user_id(), &conversation_id);
    state.hub.emit_to_room(
        &conversation_id,
        &ServerEvent::ConversationRead {
            conversation_id: conversation_id.clone(),
            user_id: ctx.user_id().to_string(),
        },
    );

    Ok(Json(json!({ "success": true, "message": "Conversation marked as read" })))
}
