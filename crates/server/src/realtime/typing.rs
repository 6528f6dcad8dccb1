//! Typing indicators: ephemeral, never persisted, never retried.
//!
//! With a configured timeout the relay arms a timer per (user, conversation)
//! and emits the stop itself if the client never does.

use super::gateway::Gateway;
use super::protocol::ServerEvent;
use crate::core::models::{ConversationId, UserId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type TimerKey = (UserId, ConversationId);

pub struct TypingRelay {
    gateway: Gateway,
    timeout: Option<Duration>,
    /// Armed timers, keyed to the epoch that armed them.
    timers: Arc<Mutex<HashMap<TimerKey, u64>>>,
    next_epoch: AtomicU64,
}

impl TypingRelay {
    pub fn new(gateway: Gateway, timeout: Option<Duration>) -> Self {
        Self {
            gateway,
            timeout,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_epoch: AtomicU64::new(0),
        }
    }

    pub fn start_typing(&self, user_id: &str, conversation_id: &str) -> usize {
        let sent = relay(&self.gateway, user_id, conversation_id, true);
        if let Some(timeout) = self.timeout {
            self.arm(user_id, conversation_id, timeout);
        }
        sent
    }

    pub fn stop_typing(&self, user_id: &str, conversation_id: &str) -> usize {
        self.timers
            .lock()
            .remove(&(user_id.to_string(), conversation_id.to_string()));
        relay(&self.gateway, user_id, conversation_id, false)
    }

    /// Cancel every armed timer for a user who just went offline and tell the
    /// affected rooms they stopped typing.
    pub fn clear_user(&self, user_id: &str) {
        let cleared: Vec<ConversationId> = {
            let mut timers = self.timers.lock();
            let keys: Vec<TimerKey> = timers
                .keys()
                .filter(|(user, _)| user == user_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| timers.remove(&key).map(|_| key.1))
                .collect()
        };
        for conversation_id in cleared {
            relay(&self.gateway, user_id, &conversation_id, false);
        }
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.lock().len()
    }

    fn arm(&self, user_id: &str, conversation_id: &str, timeout: Duration) {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let key: TimerKey = (user_id.to_string(), conversation_id.to_string());
        self.timers.lock().insert(key.clone(), epoch);

        let timers = self.timers.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut timers = timers.lock();
                // Only the timer that is still current may fire
                if timers.get(&key) == Some(&epoch) {
                    timers.remove(&key);
                    true
                } else {
                    false
                }
            };
            if expired {
                debug!("[Typing] Auto-stop for {} in {}", key.0, key.1);
                relay(&gateway, &key.0, &key.1, false);
            }
        });
    }
}

fn relay(gateway: &Gateway, user_id: &str, conversation_id: &str, is_typing: bool) -> usize {
    let event = ServerEvent::Typing {
        conversation_id: conversation_id.to_string(),
        user_id: user_id.to_string(),
        is_typing,
    };
    match Gateway::encode(&event) {
        Some(frame) => gateway.emit_to_room_except(conversation_id, user_id, &frame),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::OutboundFrame;
    use crate::realtime::registry::{ConnectionHandle, ConnectionRegistry};
    use crate::realtime::rooms::RoomTable;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomTable>,
        gateway: Gateway,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = Arc::new(RoomTable::new());
            let gateway = Gateway::new(registry.clone(), rooms.clone());
            Self {
                registry,
                rooms,
                gateway,
            }
        }

        fn join(&self, user: &str, room: &str) -> mpsc::Receiver<OutboundFrame> {
            let (tx, rx) = mpsc::channel(8);
            let handle = ConnectionHandle::new(user, tx);
            self.rooms.join(handle.id, room);
            self.registry.register(handle);
            rx
        }
    }

    fn typing_flags(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<bool> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.to_value()["data"]["isTyping"].as_bool().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_sender_never_sees_own_typing() {
        let fx = Fixture::new();
        let mut alice = fx.join("alice", "c1");
        let mut alice_tab = fx.join("alice", "c1");
        let mut bob = fx.join("bob", "c1");
        let mut carol = fx.join("carol", "c1");
        let relay = TypingRelay::new(fx.gateway.clone(), None);

        assert_eq!(relay.start_typing("alice", "c1"), 2);
        relay.stop_typing("alice", "c1");

        assert_eq!(typing_flags(&mut bob), vec![true, false]);
        assert_eq!(typing_flags(&mut carol), vec![true, false]);
        assert!(typing_flags(&mut alice).is_empty());
        assert!(typing_flags(&mut alice_tab).is_empty());
        assert_eq!(relay.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_emits_stop() {
        let fx = Fixture::new();
        let _alice = fx.join("alice", "c1");
        let mut bob = fx.join("bob", "c1");
        let relay = TypingRelay::new(fx.gateway.clone(), Some(Duration::from_secs(5)));

        relay.start_typing("alice", "c1");
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(typing_flags(&mut bob), vec![true, false]);
        assert_eq!(relay.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rearms_timer() {
        let fx = Fixture::new();
        let _alice = fx.join("alice", "c1");
        let mut bob = fx.join("bob", "c1");
        let relay = TypingRelay::new(fx.gateway.clone(), Some(Duration::from_secs(5)));

        relay.start_typing("alice", "c1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        relay.start_typing("alice", "c1");
        tokio::time::sleep(Duration::from_secs(3)).await;
        // First timer expired but was superseded
        assert_eq!(typing_flags(&mut bob), vec![true, true]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(typing_flags(&mut bob), vec![false]);
    }
}
