//! Message store collaborator.
//!
//! Durable message state lives outside this service. The relay only needs to
//! know who the two parties of a message are, to persist read marks and to
//! mutate reactions atomically. [`MemoryMessageStore`] is the default backing
//! used when no external store is wired in; it forgets messages that have not
//! been touched within its retention window.

pub mod retention;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::chat::messages::MessageStatus;
use crate::chat::reactions::Reaction;
use retention::Retention;

/// Retention used by [`MemoryMessageStore::new`].
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// The two parties of a one-to-one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub sender_id: String,
    pub receiver_id: String,
}

pub trait MessageStore: Send + Sync {
    fn record_participants(&self, message_id: &str, participants: Participants);

    fn participants(&self, message_id: &str) -> Option<Participants>;

    /// Mark known messages read. Unknown ids are skipped.
    fn mark_read(&self, message_ids: &[String]);

    /// Run `update` against the message's reactions under the store's lock
    /// and return the resulting list. `None` if the message is unknown.
    fn update_reactions(
        &self,
        message_id: &str,
        update: &mut dyn FnMut(&mut Vec<Reaction>),
    ) -> Option<Vec<Reaction>>;

    /// Drop everything known about a deleted message.
    fn forget(&self, message_id: &str);
}

#[derive(Debug, Clone)]
struct StoredMessage {
    participants: Participants,
    status: Option<MessageStatus>,
    reactions: Vec<Reaction>,
    touched: Instant,
}

/// In-process message store backed by a DashMap.
#[derive(Debug, Clone)]
pub struct MemoryMessageStore {
    messages: Arc<DashMap<String, StoredMessage>>,
    retention: Arc<Retention>,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(keep_for: Duration) -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            retention: Arc::new(Retention::new(keep_for)),
        }
    }

    pub fn status(&self, message_id: &str) -> Option<MessageStatus> {
        self.messages.get(message_id).and_then(|m| m.status)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop messages not touched within the retention window.
    pub fn sweep(&self) {
        self.messages
            .retain(|_, message| self.retention.is_fresh(message.touched));
    }

    fn wrote(&self) {
        if self.retention.record_write() {
            self.sweep();
        }
    }
}

impl MessageStore for MemoryMessageStore {
    fn record_participants(&self, message_id: &str, participants: Participants) {
        {
            let mut message = self
                .messages
                .entry(message_id.to_string())
                .or_insert_with(|| StoredMessage {
                    participants: participants.clone(),
                    status: None,
                    reactions: Vec::new(),
                    touched: Instant::now(),
                });
            message.participants = participants;
            message.touched = Instant::now();
        }
        self.wrote();
    }

    fn participants(&self, message_id: &str) -> Option<Participants> {
        self.messages
            .get(message_id)
            .map(|m| m.participants.clone())
    }

    fn mark_read(&self, message_ids: &[String]) {
        for id in message_ids {
            if let Some(mut message) = self.messages.get_mut(id) {
                message.status = Some(MessageStatus::Read);
                message.touched = Instant::now();
            }
        }
    }

    fn update_reactions(
        &self,
        message_id: &str,
        update: &mut dyn FnMut(&mut Vec<Reaction>),
    ) -> Option<Vec<Reaction>> {
        let mut message = self.messages.get_mut(message_id)?;
        update(&mut message.reactions);
        message.touched = Instant::now();
        Some(message.reactions.clone())
    }

    fn forget(&self, message_id: &str) {
        self.messages.remove(message_id);
    }
}
