//! Connection registry: which users are live, and through which connections.
//!
//! Per-user buckets live in a sharded `DashMap`, so presence transitions are
//! decided under the owning user's shard lock and never from a stale read.

use super::protocol::OutboundFrame;
use crate::core::models::{ConnectionId, UserId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Addressable endpoint of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<OutboundFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The recipient's queue is full; the frame was dropped for it.
    QueueFull,
    /// The recipient's writer has gone away.
    Closed,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<UserId>, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// Non-blocking enqueue; a slow consumer never stalls the caller.
    pub fn push(&self, frame: OutboundFrame) -> Result<(), PushError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PushError::QueueFull,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// 0 -> 1: the user just came online.
    FirstConnection,
    /// Another device for an already-online user.
    AdditionalConnection,
    /// The connection id was already known; nothing changed.
    AlreadyRegistered,
}

/// Outcome of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unregistered {
    /// 1 -> 0: the user just went offline.
    LastConnection { user_id: UserId },
    Remaining { user_id: UserId, remaining: usize },
}

impl Unregistered {
    pub fn user_id(&self) -> &str {
        match self {
            Unregistered::LastConnection { user_id } | Unregistered::Remaining { user_id, .. } => {
                user_id
            }
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    /// user -> live connection ids
    users: DashMap<UserId, HashSet<ConnectionId>>,
    /// connection id -> handle
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection. Idempotent per connection id.
    pub fn register(&self, handle: ConnectionHandle) -> Registered {
        let mut bucket = self.users.entry(handle.user_id.clone()).or_default();
        if bucket.contains(&handle.id) {
            return Registered::AlreadyRegistered;
        }
        let first = bucket.is_empty();
        bucket.insert(handle.id);
        self.connections.insert(handle.id, handle);

        if first {
            Registered::FirstConnection
        } else {
            Registered::AdditionalConnection
        }
    }

    /// Remove exactly one connection. Returns `None` when it was not registered,
    /// which makes repeated cleanup a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Unregistered> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        let user_id = handle.user_id;

        match self.users.entry(user_id.clone()) {
            Entry::Occupied(mut bucket) => {
                bucket.get_mut().remove(&connection_id);
                let remaining = bucket.get().len();
                if remaining == 0 {
                    bucket.remove();
                    Some(Unregistered::LastConnection { user_id })
                } else {
                    Some(Unregistered::Remaining { user_id, remaining })
                }
            }
            // Bucket already gone; treat as the last connection
            Entry::Vacant(_) => Some(Unregistered::LastConnection { user_id }),
        }
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.users
            .get(user_id)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, |bucket| bucket.len())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connection_count(user_id) > 0
    }

    /// Owning user of a live connection, read in place.
    pub fn owner_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&connection_id)
            .map(|h| h.user_id.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Push a frame to one connection. Unknown connections count as closed.
    pub fn push_to(&self, connection_id: ConnectionId, frame: OutboundFrame) -> Result<(), PushError> {
        match self.connections.get(&connection_id) {
            Some(handle) => handle.push(frame),
            None => Err(PushError::Closed),
        }
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.users.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop every connection (server shutdown). Dropping the handles closes
    /// each connection's outbound queue.
    pub fn clear(&self) {
        self.connections.clear();
        self.users.clear();
    }
}
