//! SQLite-backed store (sqlx).
//!
//! Implements the identity, persistence and message traits against a small
//! relational schema. Dates are stored as RFC 3339 text.

use super::{Identity, MessageStore, Persistence};
use crate::core::error::{AuthError, StoreError};
use crate::core::models::{
    ConversationId, ConversationKind, DeletedFor, DeletedMessage, Message, MessagePage,
    MessageStatus, NewMessage, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        username TEXT UNIQUE NOT NULL,
        is_online INTEGER NOT NULL DEFAULT 0,
        last_active TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        name TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS participants (
        user_id TEXT NOT NULL,
        conversation_id TEXT NOT NULL,
        unread_count INTEGER NOT NULL DEFAULT 0,
        last_read_at TEXT,
        is_muted INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, conversation_id),
        FOREIGN KEY (user_id) REFERENCES users(id),
        FOREIGN KEY (conversation_id) REFERENCES conversations(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        text TEXT,
        image_url TEXT,
        status TEXT NOT NULL DEFAULT 'sent',
        deleted_for TEXT,
        deleted_at TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id),
        FOREIGN KEY (sender_id) REFERENCES users(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
];

type MessageRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, text, image_url, status, created_at";

fn parse_time(s: &str) -> DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}

fn row_to_message(row: MessageRow) -> Message {
    let (id, conversation_id, sender_id, text, image_url, status, created_at) = row;
    Message {
        id,
        conversation_id,
        sender_id,
        text,
        image_url,
        created_at: parse_time(&created_at),
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Sent),
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        info!("[Store] SQLite store ready at {}", url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn create_user(&self, name: &str, username: &str) -> Result<UserId, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, name, username) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(username)
            .execute(&self.pool)
            .await?;
        debug!("[Store] Created user {} ({})", username, id);
        Ok(id)
    }

    /// Issue a session token. Token issuance proper lives outside this
    /// server; this exists for seeding and tests.
    pub async fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String, StoreError> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(token)
    }

    pub async fn create_conversation(
        &self,
        kind: ConversationKind,
        name: Option<&str>,
        members: &[&str],
    ) -> Result<ConversationId, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, kind, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for member in members {
            sqlx::query("INSERT INTO participants (user_id, conversation_id) VALUES (?, ?)")
                .bind(*member)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(id)
    }

    pub async fn unread_count(&self, user_id: &str, conversation_id: &str) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT unread_count FROM participants WHERE user_id = ? AND conversation_id = ?",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(n,)| n).ok_or(StoreError::NotFound("Participant"))
    }

    pub async fn presence_of(
        &self,
        user_id: &str,
    ) -> Result<(bool, Option<DateTime<Utc>>), StoreError> {
        let row: Option<(bool, Option<String>)> =
            sqlx::query_as("SELECT is_online, last_active FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        let (online, last_active) = row.ok_or(StoreError::NotFound("User"))?;
        Ok((online, last_active.as_deref().map(parse_time)))
    }

    async fn is_participant(&self, user_id: &str, conversation_id: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM participants WHERE user_id = ? AND conversation_id = ?",
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn require_participant(&self, user_id: &str, conversation_id: &str) -> Result<(), StoreError> {
        if self.is_participant(user_id, conversation_id).await? {
            Ok(())
        } else {
            Err(StoreError::Forbidden(
                "Not a participant of this conversation".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Identity for SqliteStore {
    async fn verify_connection_credential(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let row: Option<(String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT s.user_id, s.expires_at, u.id
            FROM sessions s
            LEFT JOIN users u ON u.id = s.user_id
            WHERE s.token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Backend(e.to_string()))?;

        let (user_id, expires_at, existing) = row.ok_or(AuthError::InvalidCredential)?;
        let expires: DateTime<Utc> = expires_at
            .parse()
            .map_err(|_| AuthError::Backend("Invalid session expiry".to_string()))?;
        if expires <= Utc::now() {
            return Err(AuthError::Expired);
        }
        if existing.is_none() {
            return Err(AuthError::UnknownUser(user_id));
        }
        Ok(user_id)
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn increment_unread_count(
        &self,
        conversation_id: &str,
        exclude_user_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE participants SET unread_count = unread_count + 1 WHERE conversation_id = ? AND user_id != ?",
        )
        .bind(conversation_id)
        .bind(exclude_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_unread_count(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE participants SET unread_count = 0, last_read_at = ? WHERE user_id = ? AND conversation_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Participant"));
        }
        Ok(())
    }

    async fn write_through_presence(
        &self,
        user_id: &str,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET is_online = ?, last_active = COALESCE(?, last_active) WHERE id = ?",
        )
        .bind(is_online)
        .bind(last_active.map(|t| t.to_rfc3339()))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("User"));
        }
        Ok(())
    }

    async fn participants_of(&self, conversation_id: &str) -> Result<HashSet<UserId>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM participants WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        input: NewMessage,
    ) -> Result<Message, StoreError> {
        self.require_participant(sender_id, conversation_id).await?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: input.text,
            image_url: input.image_url,
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, image_url, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(&message.image_url)
        .bind(message.status.as_str())
        .bind(message.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(message.created_at.to_rfc3339())
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(message)
    }

    async fn messages_for(
        &self,
        conversation_id: &str,
        user_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<MessagePage, StoreError> {
        self.require_participant(user_id, conversation_id).await?;

        let fetch = i64::from(limit) + 1;
        let rows: Vec<MessageRow> = match cursor {
            Some(cursor) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM messages WHERE conversation_id = ? AND deleted_at IS NULL \
                     AND rowid < (SELECT rowid FROM messages WHERE id = ?) \
                     ORDER BY rowid DESC LIMIT ?",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(cursor)
                .bind(fetch)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM messages WHERE conversation_id = ? AND deleted_at IS NULL \
                     ORDER BY rowid DESC LIMIT ?",
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(fetch)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut messages: Vec<Message> = rows.into_iter().map(row_to_message).collect();
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
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_message).ok_or(StoreError::NotFound("Message"))
    }

    async fn mark_message_read(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<Message, StoreError> {
        let mut message = self.message_by_id(message_id).await?;
        if message.sender_id == user_id {
            return Ok(message);
        }
        self.require_participant(user_id, &message.conversation_id)
            .await?;

        sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(MessageStatus::Read.as_str())
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        message.status = MessageStatus::Read;
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<u64, StoreError> {
        self.require_participant(user_id, conversation_id).await?;
        let result = sqlx::query(
            "UPDATE messages SET status = ? WHERE conversation_id = ? AND sender_id != ? AND status = ?",
        )
        .bind(MessageStatus::Read.as_str())
        .bind(conversation_id)
        .bind(user_id)
        .bind(MessageStatus::Sent.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete(
        &self,
        message_id: &str,
        user_id: &str,
        scope: DeletedFor,
    ) -> Result<DeletedMessage, StoreError> {
        let message = self.message_by_id(message_id).await?;
        self.require_participant(user_id, &message.conversation_id)
            .await?;
        if scope == DeletedFor::Everyone && message.sender_id != user_id {
            return Err(StoreError::Forbidden(
                "Can only delete your own messages for everyone".to_string(),
            ));
        }

        sqlx::query("UPDATE messages SET deleted_at = ?, deleted_for = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(scope.as_str())
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(DeletedMessage {
            message_id: message.id,
            conversation_id: message.conversation_id,
            deleted_for: scope,
        })
    }
}
