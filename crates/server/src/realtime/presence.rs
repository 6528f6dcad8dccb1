//! Presence: binary online/offline derived from registry transitions.

use super::effects::{SideEffect, SideEffects};
use super::gateway::Gateway;
use super::protocol::ServerEvent;
use super::registry::{ConnectionRegistry, Registered, Unregistered};
use crate::core::models::UserId;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    gateway: Gateway,
    effects: SideEffects,
    /// Per-user transition locks; present only while someone holds one.
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, gateway: Gateway, effects: SideEffects) -> Self {
        Self {
            registry,
            gateway,
            effects,
            user_locks: DashMap::new(),
        }
    }

    /// Run a registry transition for `user_id` together with its presence
    /// announcement, so transitions of one user are published in the order
    /// they were decided. Callers must not nest this for the same user.
    pub fn with_user_lock<R>(&self, user_id: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.user_locks.entry(user_id.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.user_locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Called with the outcome of a registration. Only the 0 -> 1 transition
    /// announces anything.
    pub fn on_connect(&self, user_id: &str, registered: Registered) -> bool {
        if registered != Registered::FirstConnection {
            return false;
        }

        info!("[Presence] {} is online", user_id);
        self.broadcast_except(
            user_id,
            &ServerEvent::UserOnline {
                user_id: user_id.to_string(),
            },
        );
        self.effects.enqueue(SideEffect::WritePresence {
            user_id: user_id.to_string(),
            is_online: true,
            last_active: None,
        });
        true
    }

    /// Called with the outcome of an unregistration. Only the 1 -> 0
    /// transition announces anything.
    pub fn on_disconnect(&self, unregistered: &Unregistered) -> bool {
        let Unregistered::LastConnection { user_id } = unregistered else {
            return false;
        };

        let last_active = Utc::now();
        info!("[Presence] {} is offline", user_id);
        self.broadcast_except(
            user_id,
            &ServerEvent::UserOffline {
                user_id: user_id.clone(),
                last_active,
            },
        );
        self.effects.enqueue(SideEffect::WritePresence {
            user_id: user_id.clone(),
            is_online: false,
            last_active: Some(last_active),
        });
        true
    }

    fn broadcast_except(&self, subject: &str, event: &ServerEvent) {
        let Some(frame) = Gateway::encode(event) else {
            return;
        };
        for user in self.registry.online_users() {
            if user != subject {
                self.gateway.emit_to_user(&user, &frame);
            }
        }
    }
}
