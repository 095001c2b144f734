//! Typing indicators with auto-expiry.
//!
//! Each (user, conversation) pair owns at most one expiry timer. Starting to
//! type again replaces the timer; stopping cancels it. Every timer carries the
//! generation it was armed with and only fires if that generation is still
//! current, so a timer that loses a race with a later start/stop stays silent.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::proto::server::UserTyping;
use crate::proto::ServerEvent;
use crate::ws::broadcast::send_to_user;
use crate::ws::ConnectionRegistry;

pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

/// (user_id, conversation_id)
type TypingKey = (String, String);

#[derive(Debug)]
struct TypingEntry {
    is_typing: bool,
    /// Last receiver named for this conversation; expiry notifies them.
    receiver_id: String,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct TypingCoordinator {
    registry: ConnectionRegistry,
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    generations: Arc<AtomicU64>,
    timeout: Duration,
}

impl TypingCoordinator {
    pub fn new(registry: ConnectionRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            entries: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Mark the user as typing and (re)arm the expiry timer.
    pub fn start_typing(&self, user_id: &str, conversation_id: &str, receiver_id: &str) {
        let key = (user_id.to_string(), conversation_id.to_string());
        let generation = self.next_generation();

        {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(|| TypingEntry {
                is_typing: false,
                receiver_id: receiver_id.to_string(),
                generation,
                timer: None,
            });
            // Armed while the entry is locked: the timer cannot observe a
            // half-updated entry.
            let timer = self.spawn_expiry(key, generation);
            if let Some(previous) = entry.timer.replace(timer) {
                previous.abort();
            }
            entry.is_typing = true;
            entry.receiver_id = receiver_id.to_string();
            entry.generation = generation;
        }

        self.notify(user_id, conversation_id, receiver_id, true);
    }

    /// Mark the user as no longer typing and cancel any pending timer.
    pub fn stop_typing(&self, user_id: &str, conversation_id: &str, receiver_id: &str) {
        let key = (user_id.to_string(), conversation_id.to_string());
        let generation = self.next_generation();

        {
            let mut entry = self.entries.entry(key).or_insert_with(|| TypingEntry {
                is_typing: false,
                receiver_id: receiver_id.to_string(),
                generation,
                timer: None,
            });
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.is_typing = false;
            entry.receiver_id = receiver_id.to_string();
            entry.generation = generation;
        }

        self.notify(user_id, conversation_id, receiver_id, false);
    }

    /// Drop all typing state of a user, cancelling their timers. No
    /// notifications are sent; peers learn about the disconnect from presence.
    pub fn clear_user(&self, user_id: &str) {
        self.entries.retain(|(owner, _), entry| {
            if owner != user_id {
                return true;
            }
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            false
        });
    }

    pub fn is_typing(&self, user_id: &str, conversation_id: &str) -> bool {
        self.entries
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .map(|entry| entry.is_typing)
            .unwrap_or(false)
    }

    /// Number of armed timers for a user across all conversations.
    pub fn pending_timers(&self, user_id: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == user_id && entry.value().timer.is_some())
            .count()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn spawn_expiry(&self, key: TypingKey, generation: u64) -> JoinHandle<()> {
        let coordinator = self.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            coordinator.expire(&key, generation);
        })
    }

    fn expire(&self, key: &TypingKey, generation: u64) {
        let receiver_id = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return;
            };
            if entry.generation != generation || !entry.is_typing {
                return;
            }
            entry.is_typing = false;
            entry.timer = None;
            entry.receiver_id.clone()
        };

        tracing::debug!(
            user_id = %key.0,
            conversation_id = %key.1,
            "Typing indicator expired"
        );
        self.notify(&key.0, &key.1, &receiver_id, false);
    }

    fn notify(&self, user_id: &str, conversation_id: &str, receiver_id: &str, is_typing: bool) {
        send_to_user(
            &self.registry,
            receiver_id,
            &ServerEvent::UserTyping(UserTyping {
                user_id: user_id.to_string(),
                conversation_id: conversation_id.to_string(),
                is_typing,
            }),
        );
    }
}
