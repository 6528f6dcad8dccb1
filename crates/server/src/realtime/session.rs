//! Per-connection lifecycle guard.

use super::Hub;
use crate::core::models::{ConnectionId, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Owns one registered connection. Cleanup runs exactly once, either through
/// [`SessionGuard::close`] or on drop (task cancellation, panic).
pub struct SessionGuard {
    hub: Hub,
    connection_id: ConnectionId,
    user_id: UserId,
    closed: AtomicBool,
}

impl SessionGuard {
    pub(crate) fn new(hub: Hub, connection_id: ConnectionId, user_id: UserId) -> Self {
        Self {
            hub,
            connection_id,
            user_id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unregister, leave every room, and evaluate presence. Returns `false`
    /// if cleanup had already run.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hub.end_session(self.connection_id);
        true
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.close() {
            debug!("[Session] {} cleaned up on drop", self.connection_id);
        }
    }
}
