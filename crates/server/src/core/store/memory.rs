//! In-memory store implementing every collaborator trait.
//!
//! Used by the test suites. Failure injection switches let tests exercise the
//! logged-and-swallowed error paths of the realtime core.

use super::{Identity, MessageStore, Persistence};
use crate::core::error::{AuthError, StoreError};
use crate::core::models::{
    ConversationId, DeletedFor, DeletedMessage, Message, MessagePage, MessageStatus, NewMessage,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct UserRecord {
    is_online: bool,
    last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    deleted_for: Option<DeletedFor>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserRecord>,
    sessions: HashMap<String, (UserId, DateTime<Utc>)>,
    participants: HashMap<ConversationId, Vec<UserId>>,
    unread: HashMap<(UserId, ConversationId), u32>,
    messages: Vec<StoredMessage>,
}

impl MemoryState {
    fn is_participant(&self, user_id: &str, conversation_id: &str) -> bool {
        self.participants
            .get(conversation_id)
            .is_some_and(|members| members.iter().any(|m| m == user_id))
    }

    fn require_participant(&self, user_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        if self.is_participant(user_id, conversation_id) {
            Ok(())
        } else {
            Err(StoreError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ))
        }
    }

    fn message_mut(&mut self, message_id: &str) -> Result<&mut StoredMessage, StoreError> {
        self.messages
            .iter_mut()
            .find(|m| m.message.id == message_id)
            .ok_or(StoreError::NotFound("Message"))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_unread: AtomicBool,
    fail_presence: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        self.state
            .lock()
            .users
            .entry(user_id.to_string())
            .or_default();
    }

    /// Issue a session token valid for one day.
    pub fn create_session(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.state.lock().sessions.insert(
            token.clone(),
            (user_id.to_string(), Utc::now() + Duration::days(1)),
        );
        token
    }

    /// Insert a session that has already expired.
    pub fn create_expired_session(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.state.lock().sessions.insert(
            token.clone(),
            (user_id.to_string(), Utc::now() - Duration::minutes(1)),
        );
        token
    }

    pub fn add_conversation(&self, conversation_id: &str, members: &[&str]) {
        let mut state = self.state.lock();
        for member in members {
            state.users.entry(member.to_string()).or_default();
            state
                .unread
                .entry((member.to_string(), conversation_id.to_string()))
                .or_insert(0);
        }
        state.participants.insert(
            conversation_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn unread_count(&self, user_id: &str, conversation_id: &str) -> u32 {
        self.state
            .lock()
            .unread
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Persisted presence projection `(is_online, last_active)`.
    pub fn presence_of(&self, user_id: &str) -> Option<(bool, Option<DateTime<Utc>>)> {
        self.state
            .lock()
            .users
            .get(user_id)
            .map(|u| (u.is_online, u.last_active))
    }

    pub fn fail_unread_increments(&self, fail: bool) {
        self.fail_unread.store(fail, Ordering::SeqCst);
    }

    pub fn fail_presence_writes(&self, fail: bool) {
        self.fail_presence.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Identity for MemoryStore {
    async fn verify_connection_credential(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let state = self.state.lock();
        let (user_id, expires_at) = state
            .sessions
            .get(token)
            .ok_or(AuthError::InvalidCredential)?;
        if *expires_at <= Utc::now() {
            return Err(AuthError::Expired);
        }
        if !state.users.contains_key(user_id) {
            return Err(AuthError::UnknownUser(user_id.clone()));
        }
        Ok(user_id.clone())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn increment_unread_count(
        &self,
        conversation_id: &str,
        exclude_user_id: &str,
    ) -> Result<(), StoreError> {
        if self.fail_unread.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected unread failure".to_string()));
        }
        let mut state = self.state.lock();
        let members = state
            .participants
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        for member in members.into_iter().filter(|m| m != exclude_user_id) {
            *state
                .unread
                .entry((member, conversation_id.to_string()))
                .or_insert(0) += 1;
        }
        Ok(())
    }

    async fn reset_unread_count(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.require_participant(user_id, conversation_id)?;
        state
            .unread
            .insert((user_id.to_string(), conversation_id.to_string()), 0);
        Ok(())
    }

    async fn write_through_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if self.fail_presence.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected presence failure".to_string()));
        }
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(user_id)
            .ok_or(StoreError::NotFound("User"))?;
        user.is_online = is_online;
        if last_active.is_some() {
            user.last_active = last_active;
        }
        Ok(())
    }

    async fn participants_of(&self, conversation_id: &str) -> Result<HashSet<UserId>, StoreError> {
        Ok(self
            .state
            .lock()
            .participants
            .get(conversation_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        input: NewMessage,
    ) -> Result<Message, StoreError> {
        let mut state = self.state.lock();
        state.require_participant(sender_id, conversation_id)?;
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: input.text,
            image_url: input.image_url,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        };
        state.messages.push(StoredMessage {
            message: message.clone(),
            deleted_for: None,
        });
        Ok(message)
    }

    async fn messages_for(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MessagePage, StoreError> {
        let state = self.state.lock();
        state.require_participant(user_id, conversation_id)?;

        let mut visible = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.message.conversation_id == conversation_id && m.deleted_for.is_none())
            .map(|m| &m.message);

        if let Some(cursor) = cursor {
            // Advance past the cursor message
            for m in visible.by_ref() {
                if m.id == cursor {
                    break;
                }
            }
        }

        let mut messages: Vec<Message> = visible.take(limit as usize + 1).cloned().collect();
        let has_more = messages.len() > limit as usize;
        if has_more {
            messages.pop();
        }
        let next_cursor = if has_more {
            messages.last().map(|m| m.id.clone())
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            next_cursor,
            has_more,
        })
    }

    async fn message_by_id(&self, message_id: &str) -> Result<Message, StoreError> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.message.id == message_id)
            .map(|m| m.message.clone())
            .ok_or(StoreError::NotFound("Message"))
    }

    async fn mark_message_read(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<Message, StoreError> {
        let mut state = self.state.lock();
        let message = state.message_mut(message_id)?.message.clone();
        if message.sender_id == user_id {
            return Ok(message);
        }
        state.require_participant(user_id, &message.conversation_id)?;
        let stored = state.message_mut(message_id)?;
        stored.message.status = MessageStatus::Read;
        Ok(stored.message.clone())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        state.require_participant(user_id, conversation_id)?;
        let mut updated = 0;
        for stored in state.messages.iter_mut().filter(|m| {
            m.message.conversation_id == conversation_id
                && m.message.sender_id != user_id
                && m.message.status == MessageStatus::Sent
        }) {
            stored.message.status = MessageStatus::Read;
            updated += 1;
        }
        Ok(updated)
    }

    async fn soft_delete(
        &self,
        message_id: &str,
        user_id: &str,
        scope: DeletedFor,
    ) -> Result<DeletedMessage, StoreError> {
        let mut state = self.state.lock();
        let conversation_id = state.message_mut(message_id)?.message.conversation_id.clone();
        state.require_participant(user_id, &conversation_id)?;
        let stored = state.message_mut(message_id)?;
        if scope == DeletedFor::Everyone && stored.message.sender_id != user_id {
            return Err(StoreError::Forbidden(
                "Can only delete your own messages for everyone".to_string(),
            ));
        }
        stored.deleted_for = Some(scope);
        Ok(DeletedMessage {
            message_id: stored.message.id.clone(),
            conversation_id: stored.message.conversation_id.clone(),
            deleted_for: scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_skips_sender() {
        let store = MemoryStore::new();
        store.add_conversation("c1", &["alice", "bob", "carol"]);

        store.increment_unread_count("c1", "alice").await.unwrap();

        assert_eq!(store.unread_count("alice", "c1"), 0);
        assert_eq!(store.unread_count("bob", "c1"), 1);
        assert_eq!(store.unread_count("carol", "c1"), 1);
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let store = MemoryStore::new();
        store.add_user("alice");
        let token = store.create_expired_session("alice");

        let result = store.verify_connection_credential(&token).await;
        assert!(matches!(result, Err(AuthError::Expired)));
        assert!(matches!(
            store.verify_connection_credential("nope").await,
            Err(AuthError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_history_pages_newest_first() {
        let store = MemoryStore::new();
        store.add_conversation("c1", &["alice", "bob"]);
        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = store
                .create_message(
                    "c1",
                    "alice",
                    NewMessage {
                        text: Some(format!("msg {}", i)),
                        image_url: None,
                    },
                )
                .await
                .unwrap();
            ids.push(msg.id);
        }

        let first = store.messages_for("c1", "bob", 2, None).await.unwrap();
        assert!(first.has_more);
        assert_eq!(first.messages[0].id, ids[4]);
        assert_eq!(first.messages[1].id, ids[3]);

        let cursor = first.next_cursor.unwrap();
        let second = store
            .messages_for("c1", "bob", 10, Some(&cursor))
            .await
            .unwrap();
        assert!(!second.has_more);
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[0].id, ids[2]);
    }

    #[tokio::test]
    async fn test_delete_for_everyone_requires_sender() {
        let store = MemoryStore::new();
        store.add_conversation("c1", &["alice", "bob"]);
        let msg = store
            .create_message(
                "c1",
                "alice",
                NewMessage {
                    text: Some("oops".into()),
                    image_url: None,
                },
            )
            .await
            .unwrap();

        let denied = store.soft_delete(&msg.id, "bob", DeletedFor::Everyone).await;
        assert!(matches!(denied, Err(StoreError::Forbidden(_))));

        store
            .soft_delete(&msg.id, "alice", DeletedFor::Everyone)
            .await
            .unwrap();
        let page = store.messages_for("c1", "bob", 10, None).await.unwrap();
        assert!(page.messages.is_empty());
    }
}
