//! Room membership: which connections receive a conversation's live events.
//!
//! Pure routing table. Participancy is checked before a join ever reaches
//! this module.

use crate::core::models::{ConnectionId, ConversationId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Tables {
    members: HashMap<ConversationId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<ConversationId>>,
}

/// Many-to-many connection <-> room relation behind one read-mostly lock.
#[derive(Default)]
pub struct RoomTable {
    tables: RwLock<Tables>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the connection was not already a member.
    pub fn join(&self, connection_id: ConnectionId, conversation_id: &str) -> bool {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let added = tables
            .members
            .entry(conversation_id.to_string())
            .or_default()
            .insert(connection_id);
        tables
            .joined
            .entry(connection_id)
            .or_default()
            .insert(conversation_id.to_string());
        added
    }

    /// Returns `true` if the connection was a member.
    pub fn leave(&self, connection_id: ConnectionId, conversation_id: &str) -> bool {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let removed = match tables.members.get_mut(conversation_id) {
            Some(members) => {
                let removed = members.remove(&connection_id);
                if members.is_empty() {
                    tables.members.remove(conversation_id);
                }
                removed
            }
            None => false,
        };
        if let Some(rooms) = tables.joined.get_mut(&connection_id) {
            rooms.remove(conversation_id);
            if rooms.is_empty() {
                tables.joined.remove(&connection_id);
            }
        }
        removed
    }

    /// Remove the connection from every room it joined. Returns those rooms.
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<ConversationId> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        let rooms = tables.joined.remove(&connection_id).unwrap_or_default();
        for room in &rooms {
            if let Some(members) = tables.members.get_mut(room) {
                members.remove(&connection_id);
                if members.is_empty() {
                    tables.members.remove(room);
                }
            }
        }
        rooms.into_iter().collect()
    }

    pub fn members_of(&self, conversation_id: &str) -> HashSet<ConnectionId> {
        self.tables
            .read()
            .members
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<ConversationId> {
        self.tables
            .read()
            .joined
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.tables.read().members.len()
    }

    pub fn clear(&self) {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        tables.members.clear();
        tables.joined.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let rooms = RoomTable::new();
        let conn = ConnectionId::new();

        assert!(rooms.join(conn, "c1"));
        let once = rooms.members_of("c1");
        assert!(!rooms.join(conn, "c1"));
        assert_eq!(rooms.members_of("c1"), once);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn test_leave_non_member_is_noop() {
        let rooms = RoomTable::new();
        let conn = ConnectionId::new();
        assert!(!rooms.leave(conn, "c1"));

        rooms.join(conn, "c1");
        assert!(rooms.leave(conn, "c1"));
        assert!(rooms.members_of("c1").is_empty());
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_leave_all_clears_every_room() {
        let rooms = RoomTable::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        for room in ["c1", "c2", "c3"] {
            rooms.join(a, room);
        }
        rooms.join(b, "c2");

        let mut left = rooms.leave_all(a);
        left.sort();
        assert_eq!(left, vec!["c1", "c2", "c3"]);

        for room in ["c1", "c2", "c3"] {
            assert!(!rooms.members_of(room).contains(&a));
        }
        assert!(rooms.members_of("c2").contains(&b));
        assert!(rooms.rooms_of(a).is_empty());
        assert!(rooms.leave_all(a).is_empty());
    }
}
