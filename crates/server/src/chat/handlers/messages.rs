use crate::core::auth::Ctx;
use crate::core::error::{Error, Result};
use crate::core::models::{DeletedFor, NewMessage};
use crate::core::AppState;
use crate::realtime::ServerEvent;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// POST /conversations/{id}/messages
///
/// Persist first, then hand the stored message to the hub for live delivery.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    ctx: Ctx,
    Json(input): Json<NewMessage>,
) -> Result<(StatusCode, Json<Value>)> {
    if input.is_empty() {
        return Err(Error::BadRequest(
            "Message must contain text or an image".to_string(),
        ));
    }

    let message = state
        .messages
        .create_message(&conversation_id, ctx.user_id(), input)
        .await?;

    let report = state.hub.notify_message_delivered(&message);
    info!(
        "[Chat] {} sent {} in {} ({} live recipient(s))",
        ctx.user_id(),
        message.id,
        conversation_id,
        report.recipients
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": { "message": message } })),
    ))
}

/// PUT /messages/{id}/read
pub async fn mark_message_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    ctx: Ctx,
) -> Result<Json<Value>> {
    let message = state
        .messages
        .mark_message_read(&message_id, ctx.user_id())
        .await?;

    // Reading your own message changes nothing
    if message.sender_id != ctx.user_id() {
        state
            .hub
            .conversation_viewed(ctx.user_id(), &message.conversation_id);
        state.hub.emit_to_room(
            &message.conversation_id,
            &ServerEvent::MessageRead {
                message_id: message.id.clone(),
                conversation_id: message.conversation_id.clone(),
                user_id: ctx.user_id().to_string(),
            },
        );
    }

    Ok(Json(json!({ "success": true, "message": "Message marked as read" })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(rename = "for", default = "default_scope")]
    pub scope: DeletedFor,
}

fn default_scope() -> DeletedFor {
    DeletedFor::OnlyMe
}

/// DELETE /messages/{id}?for=self|everyone
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
    ctx: Ctx,
) -> Result<Json<Value>> {
    let deleted = state
        .messages
        .soft_delete(&message_id, ctx.user_id(), query.scope)
        .await?;

    let event = ServerEvent::MessageDeleted {
        message_id: deleted.message_id.clone(),
        conversation_id: deleted.conversation_id.clone(),
    };
    match deleted.deleted_for {
        DeletedFor::Everyone => state.hub.emit_to_room(&deleted.conversation_id, &event),
        DeletedFor::OnlyMe => state.hub.emit_to_user(ctx.user_id(), &event),
    };

    Ok(Json(json!({ "success": true, "data": deleted })))
}
