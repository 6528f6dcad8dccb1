//! Message fan-out: push a persisted message to its room and schedule the
//! unread-counter side effect.

use super::effects::{SideEffect, SideEffects};
use super::gateway::Gateway;
use super::protocol::ServerEvent;
use crate::core::models::Message;
use tracing::debug;

/// What a single `deliver` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections whose queue accepted the frame. Zero is a normal outcome.
    pub recipients: usize,
}

pub struct FanoutEngine {
    gateway: Gateway,
    effects: SideEffects,
}

impl FanoutEngine {
    pub fn new(gateway: Gateway, effects: SideEffects) -> Self {
        Self { gateway, effects }
    }

    /// Deliver an already-persisted message.
    ///
    /// The push is synchronous into each member's FIFO queue, so two
    /// sequential calls for one conversation are observed in call order by
    /// every member. The unread increment is queued and never delays the push.
    pub fn deliver(&self, message: &Message) -> DeliveryReport {
        let recipients = match Gateway::encode(&ServerEvent::MessageNew(message.clone())) {
            Some(frame) => self.gateway.emit_to_room(&message.conversation_id, &frame),
            None => 0,
        };

        self.effects.enqueue(SideEffect::IncrementUnread {
            conversation_id: message.conversation_id.clone(),
            exclude_user_id: message.sender_id.clone(),
        });

        debug!(
            "[Fanout] Message {} in {} pushed to {} connection(s)",
            message.id, message.conversation_id, recipients
        );
        DeliveryReport { recipients }
    }
}
