//! Best-effort persistence side effects, applied off the delivery path.
//!
//! A single worker drains the queue in FIFO order, so a user's presence
//! write-throughs and a conversation's unread increments/resets land in the
//! order they were requested. Failures are logged and swallowed here.

use crate::core::error::StoreError;
use crate::core::models::{ConversationId, UserId};
use crate::core::store::Persistence;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    IncrementUnread {
        conversation_id: ConversationId,
        exclude_user_id: UserId,
    },
    ResetUnread {
        user_id: UserId,
        conversation_id: ConversationId,
    },
    WritePresence {
        user_id: UserId,
        is_online: bool,
        last_active: Option<DateTime<Utc>>,
    },
}

enum Job {
    Apply(SideEffect),
    Flush(oneshot::Sender<()>),
}

/// Handle to the side-effect worker. Cheap to clone.
#[derive(Clone)]
pub struct SideEffects {
    tx: mpsc::UnboundedSender<Job>,
}

impl SideEffects {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn Persistence>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(store, rx));
        (Self { tx }, worker)
    }

    /// Queue an effect. Never blocks.
    pub fn enqueue(&self, effect: SideEffect) {
        if let Err(e) = self.tx.send(Job::Apply(effect)) {
            if let Job::Apply(effect) = e.0 {
                warn!("[Effects] Worker stopped, dropping {:?}", effect);
            }
        }
    }

    /// Wait until every effect queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run_worker(store: Arc<dyn Persistence>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Apply(effect) => {
                if let Err(e) = apply(store.as_ref(), &effect).await {
                    warn!("[Effects] {:?} failed: {}", effect, e);
                } else {
                    debug!("[Effects] Applied {:?}", effect);
                }
            }
            Job::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("[Effects] Worker stopped");
}

async fn apply(store: &dyn Persistence, effect: &SideEffect) -> Result<(), StoreError> {
    match effect {
        SideEffect::IncrementUnread {
            conversation_id,
            exclude_user_id,
        } => {
            store
                .increment_unread_count(conversation_id, exclude_user_id)
                .await
        }
        SideEffect::ResetUnread {
            user_id,
            conversation_id,
        } => store.reset_unread_count(user_id, conversation_id).await,
        SideEffect::WritePresence {
            user_id,
            is_online,
            last_active,
        } => {
            store
                .write_through_presence(user_id, *is_online, *last_active)
                .await
        }
    }
}
