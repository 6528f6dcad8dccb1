//! Collaborator interfaces consumed by the realtime core and the API layer.
//!
//! The core only ever talks to storage through [`Identity`] and
//! [`Persistence`]; the HTTP handlers additionally use [`MessageStore`].

pub mod memory;
pub mod sqlite;

use crate::core::error::{AuthError, StoreError};
use crate::core::models::{
    DeletedFor, DeletedMessage, Message, MessagePage, NewMessage, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Default and maximum page sizes for history fetches.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Resolves a connection credential to a user.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn verify_connection_credential(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Narrow write/read surface the realtime core depends on.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// +1 unread for every participant of the conversation except `exclude_user_id`.
    async fn increment_unread_count(
        &self,
        conversation_id: &str,
        exclude_user_id: &str,
    ) -> Result<(), StoreError>;

    async fn reset_unread_count(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), StoreError>;

    /// Project live presence onto the user record. `last_active` is only
    /// overwritten when provided.
    async fn write_through_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn participants_of(&self, conversation_id: &str) -> Result<HashSet<UserId>, StoreError>;
}

/// Message CRUD used by the HTTP API layer.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message from a participant with status `sent`.
    async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        input: NewMessage,
    ) -> Result<Message, StoreError>;

    async fn messages_for(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MessagePage, StoreError>;

    async fn message_by_id(&self, message_id: &str) -> Result<Message, StoreError>;

    /// Mark one message read by `user_id`. Reading your own message is a no-op.
    async fn mark_message_read(&self, message_id: &str, user_id: &str)
        -> Result<Message, StoreError>;

    /// Mark every message from other senders in the conversation read.
    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<u64, StoreError>;

    async fn soft_delete(
        &self,
        message_id: &str,
        user_id: &str,
        scope: DeletedFor,
    ) -> Result<DeletedMessage, StoreError>;
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_clamps() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(500)), MAX_PAGE_SIZE);
        assert_eq!(page_size(Some(20)), 20);
    }
}
