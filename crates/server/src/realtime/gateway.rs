//! Egress primitives: the only way other components push to clients.

use super::protocol::{OutboundFrame, ServerEvent};
use super::registry::{ConnectionRegistry, PushError};
use super::rooms::RoomTable;
use crate::core::models::ConnectionId;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
}

impl Gateway {
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomTable>) -> Self {
        Self { registry, rooms }
    }

    /// Deliver to every connection of `user_id`. Returns how many queues
    /// accepted the frame; zero means the user is offline.
    pub fn emit_to_user(&self, user_id: &str, frame: &OutboundFrame) -> usize {
        let targets = self.registry.connections_for(user_id);
        self.push_all(targets, frame)
    }

    /// Deliver to every connection joined to the conversation's room.
    pub fn emit_to_room(&self, conversation_id: &str, frame: &OutboundFrame) -> usize {
        let targets = self.rooms.members_of(conversation_id);
        self.push_all(targets, frame)
    }

    /// Room delivery skipping every connection owned by `except_user`.
    pub fn emit_to_room_except(
        &self,
        conversation_id: &str,
        except_user: &str,
        frame: &OutboundFrame,
    ) -> usize {
        let targets = self
            .rooms
            .members_of(conversation_id)
            .into_iter()
            .filter(|id| {
                self.registry
                    .owner_of(*id)
                    .is_some_and(|owner| owner != except_user)
            });
        self.push_all(targets, frame)
    }

    /// Encode a typed event, logging (not propagating) encoding failures.
    pub fn encode(event: &ServerEvent) -> Option<OutboundFrame> {
        match OutboundFrame::try_from(event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("[Gateway] Failed to encode {:?}: {}", event, e);
                None
            }
        }
    }

    /// Push to each target independently; one failing recipient never
    /// affects the others.
    fn push_all(
        &self,
        targets: impl IntoIterator<Item = ConnectionId>,
        frame: &OutboundFrame,
    ) -> usize {
        let mut delivered = 0;
        for id in targets {
            match self.registry.push_to(id, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(PushError::QueueFull) => {
                    warn!("[Gateway] Outbound queue full for {}, dropping frame", id);
                }
                Err(PushError::Closed) => {
                    debug!("[Gateway] Connection {} already closed", id);
                }
            }
        }
        delivered
    }
}
