//! Realtime delivery and presence core.
//!
//! [`Hub`] is the injected entry point: the socket handler opens sessions and
//! dispatches inbound [`ClientEvent`]s through it, and the HTTP layer calls
//! [`Hub::notify_message_delivered`] after a message is durably stored.

pub mod effects;
pub mod fanout;
pub mod gateway;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod socket;
pub mod typing;

use crate::core::models::{ConnectionId, Message, PresenceView};
use crate::core::store::Persistence;
use effects::{SideEffect, SideEffects};
use fanout::{DeliveryReport, FanoutEngine};
use gateway::Gateway;
use parking_lot::Mutex;
use presence::PresenceTracker;
use registry::{ConnectionHandle, ConnectionRegistry, Unregistered};
use rooms::RoomTable;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use typing::TypingRelay;

pub use protocol::{ClientEvent, OutboundFrame, ServerEvent};
pub use session::SessionGuard;

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub outbound_queue_capacity: usize,
    /// Server-side auto-stop for typing indicators; `None` disables it.
    pub typing_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            typing_timeout: None,
        }
    }
}

struct HubInner {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
    gateway: Gateway,
    presence: PresenceTracker,
    fanout: FanoutEngine,
    typing: TypingRelay,
    effects: SideEffects,
    persistence: Arc<dyn Persistence>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to the realtime core. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Build the core and start its side-effect worker. Must be called from
    /// within a tokio runtime.
    pub fn new(persistence: Arc<dyn Persistence>, config: HubConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomTable::new());
        let gateway = Gateway::new(registry.clone(), rooms.clone());
        let (effects, worker) = SideEffects::spawn(persistence.clone());

        let presence = PresenceTracker::new(registry.clone(), gateway.clone(), effects.clone());
        let fanout = FanoutEngine::new(gateway.clone(), effects.clone());
        let typing = TypingRelay::new(gateway.clone(), config.typing_timeout);

        Self {
            inner: Arc::new(HubInner {
                config,
                registry,
                rooms,
                gateway,
                presence,
                fanout,
                typing,
                effects,
                persistence,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Register a new authenticated connection for `user_id`. The returned
    /// receiver is the connection's outbound queue.
    pub fn open_session(&self, user_id: &str) -> (SessionGuard, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(self.inner.config.outbound_queue_capacity);
        let handle = ConnectionHandle::new(user_id, tx);
        let connection_id = handle.id;

        let presence = &self.inner.presence;
        presence.with_user_lock(user_id, || {
            let registered = self.inner.registry.register(handle);
            presence.on_connect(user_id, registered);
        });
        info!("[Session] {} connected ({})", user_id, connection_id);

        (
            SessionGuard::new(self.clone(), connection_id, user_id.to_string()),
            rx,
        )
    }

    /// Cleanup for one connection; a second call for the same id is a no-op.
    pub(crate) fn end_session(&self, connection_id: ConnectionId) -> bool {
        let Some(owner) = self.inner.registry.owner_of(connection_id) else {
            return false;
        };
        let presence = &self.inner.presence;
        let cleaned = presence.with_user_lock(&owner, || {
            let outcome = self.inner.registry.unregister(connection_id)?;
            let left = self.inner.rooms.leave_all(connection_id);
            if let Unregistered::LastConnection { user_id } = &outcome {
                self.inner.typing.clear_user(user_id);
            }
            presence.on_disconnect(&outcome);
            Some((outcome, left))
        });
        let Some((outcome, left)) = cleaned else {
            return false;
        };

        info!(
            "[Session] {} disconnected ({}), left {} room(s)",
            outcome.user_id(),
            connection_id,
            left.len()
        );
        true
    }

    /// Route one inbound client event.
    pub async fn dispatch(&self, session: &SessionGuard, event: ClientEvent) {
        if session.is_closed() {
            return;
        }
        let user_id = session.user_id();
        let connection_id = session.connection_id();

        match event {
            ClientEvent::JoinConversation(r) => {
                self.join_checked(user_id, connection_id, &r.conversation_id)
                    .await;
            }
            ClientEvent::LeaveConversation(r) => {
                self.inner.rooms.leave(connection_id, &r.conversation_id);
                debug!("[Gateway] {} left {}", user_id, r.conversation_id);
            }
            ClientEvent::TypingStart(r) => {
                self.inner.typing.start_typing(user_id, &r.conversation_id);
            }
            ClientEvent::TypingStop(r) => {
                self.inner.typing.stop_typing(user_id, &r.conversation_id);
            }
        }
    }

    /// Participancy is verified against the store before the room table
    /// sees the join.
    async fn join_checked(&self, user_id: &str, connection_id: ConnectionId, conversation_id: &str) {
        match self.inner.persistence.participants_of(conversation_id).await {
            Ok(participants) if participants.contains(user_id) => {
                self.inner.rooms.join(connection_id, conversation_id);
                // The connection may have closed while we awaited the store
                if !self.inner.registry.contains(connection_id) {
                    self.inner.rooms.leave(connection_id, conversation_id);
                    return;
                }
                debug!("[Gateway] {} joined {}", user_id, conversation_id);
            }
            Ok(_) => {
                debug!(
                    "[Gateway] {} is not a participant of {}, ignoring join",
                    user_id, conversation_id
                );
            }
            Err(e) => {
                warn!(
                    "[Gateway] Participant lookup for {} failed: {}",
                    conversation_id, e
                );
            }
        }
    }

    /// Entry point for the API layer, called once a message is durably stored.
    pub fn notify_message_delivered(&self, message: &Message) -> DeliveryReport {
        self.inner.fanout.deliver(message)
    }

    /// The user has seen the conversation; schedule the unread reset.
    pub fn conversation_viewed(&self, user_id: &str, conversation_id: &str) {
        self.inner.effects.enqueue(SideEffect::ResetUnread {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn emit_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        Gateway::encode(event).map_or(0, |frame| self.inner.gateway.emit_to_user(user_id, &frame))
    }

    pub fn emit_to_room(&self, conversation_id: &str, event: &ServerEvent) -> usize {
        Gateway::encode(event).map_or(0, |frame| {
            self.inner.gateway.emit_to_room(conversation_id, &frame)
        })
    }

    /// Untyped variant of [`Hub::emit_to_user`] for ad-hoc server pushes.
    pub fn emit_raw_to_user(&self, user_id: &str, event_name: &str, payload: Value) -> usize {
        self.inner
            .gateway
            .emit_to_user(user_id, &OutboundFrame::new(event_name, payload))
    }

    pub fn emit_raw_to_room(&self, conversation_id: &str, event_name: &str, payload: Value) -> usize {
        self.inner
            .gateway
            .emit_to_room(conversation_id, &OutboundFrame::new(event_name, payload))
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.registry.is_online(user_id)
    }

    pub fn connections_for(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.inner.registry.connections_for(user_id)
    }

    pub fn presence_of(&self, user_id: &str) -> PresenceView {
        let connections = self.inner.registry.connection_count(user_id);
        PresenceView {
            user_id: user_id.to_string(),
            is_online: connections > 0,
            connections,
        }
    }

    pub fn members_of(&self, conversation_id: &str) -> HashSet<ConnectionId> {
        self.inner.rooms.members_of(conversation_id)
    }

    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<String> {
        self.inner.rooms.rooms_of(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Wait until every queued persistence side effect has been attempted.
    pub async fn flush_side_effects(&self) {
        self.inner.effects.flush().await;
    }

    /// Drain side effects, then drop all live state.
    pub async fn shutdown(&self) {
        info!(
            "[Hub] Shutting down with {} live connection(s)",
            self.inner.registry.len()
        );
        self.inner.effects.flush().await;
        self.inner.registry.clear();
        self.inner.rooms.clear();
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.abort();
        }
    }
}
