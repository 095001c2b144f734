use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Lifecycle of a one-to-one call.
///
/// `Initiated -> Ringing -> Accepted -> Connected`, with `Rejected`, `Failed`
/// and `Ended` reachable from any non-terminal state. No state is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Initiated,
    Ringing,
    Accepted,
    Connected,
    Rejected,
    Failed,
    Ended,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Ended)
    }

    pub fn can_transition_to(self, next: CallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Ringing => self == Self::Initiated,
            Self::Accepted => self == Self::Ringing,
            Self::Connected => self == Self::Accepted,
            Self::Rejected | Self::Failed | Self::Ended => true,
            Self::Initiated => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Accepted => "accepted",
            Self::Connected => "connected",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Ended => "ended",
        }
    }
}

/// One call between a caller and a receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub receiver_id: String,
    pub call_type: String,
    pub state: CallState,
}

impl CallSession {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.receiver_id == user_id
    }

    /// The other participant, if `user_id` is one of the two.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.caller_id == user_id {
            Some(&self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

/// Error type for call session operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallError {
    #[error("unknown or finished call {0}")]
    UnknownCall(String),
    #[error("call {call_id} cannot move from {from} to {to}")]
    InvalidTransition {
        call_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("call {call_id} is {actual}, expected {expected}")]
    UnexpectedState {
        call_id: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// In-memory call session table.
///
/// Sessions are removed as soon as they reach a terminal state, so any later
/// event naming that call id finds nothing and is dropped.
#[derive(Debug, Clone, Default)]
pub struct CallTable {
    /// call_id -> CallSession
    sessions: Arc<DashMap<String, CallSession>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session in `Initiated`. The id is
    /// `{caller}-{receiver}-{unix millis}`; the millisecond suffix is bumped
    /// until the id is unused.
    pub fn create(&self, caller_id: &str, receiver_id: &str, call_type: &str) -> CallSession {
        let mut stamp = Utc::now().timestamp_millis();
        loop {
            let call_id = format!("{}-{}-{}", caller_id, receiver_id, stamp);
            match self.sessions.entry(call_id.clone()) {
                Entry::Vacant(slot) => {
                    let session = CallSession {
                        call_id,
                        caller_id: caller_id.to_string(),
                        receiver_id: receiver_id.to_string(),
                        call_type: call_type.to_string(),
                        state: CallState::Initiated,
                    };
                    slot.insert(session.clone());
                    return session;
                }
                Entry::Occupied(_) => stamp += 1,
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    /// Move a session to `next`, returning the updated session. Terminal
    /// sessions are removed from the table.
    pub fn transition(&self, call_id: &str, next: CallState) -> Result<CallSession, CallError> {
        self.transition_checked(call_id, None, next)
    }

    /// Like [`CallTable::transition`], but only from `expected`.
    pub fn transition_from(
        &self,
        call_id: &str,
        expected: CallState,
        next: CallState,
    ) -> Result<CallSession, CallError> {
        self.transition_checked(call_id, Some(expected), next)
    }

    fn transition_checked(
        &self,
        call_id: &str,
        expected: Option<CallState>,
        next: CallState,
    ) -> Result<CallSession, CallError> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(call_id)
                .ok_or_else(|| CallError::UnknownCall(call_id.to_string()))?;
            let current = entry.state;
            if let Some(expected) = expected.filter(|expected| *expected != current) {
                return Err(CallError::UnexpectedState {
                    call_id: call_id.to_string(),
                    expected: expected.as_str(),
                    actual: current.as_str(),
                });
            }
            if !current.can_transition_to(next) {
                return Err(CallError::InvalidTransition {
                    call_id: call_id.to_string(),
                    from: current.as_str(),
                    to: next.as_str(),
                });
            }
            entry.state = next;
            entry.value().clone()
        };

        if next.is_terminal() {
            self.sessions.remove(call_id);
        }
        Ok(session)
    }

    /// Force every live session of `user_id` into a terminal state: calls
    /// that never got picked up fail, established ones end.
    pub fn terminate_for_user(&self, user_id: &str) -> Vec<CallSession> {
        // Collect ids first to avoid holding shard locks during mutation
        let call_ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_participant(user_id))
            .map(|entry| entry.key().clone())
            .collect();

        call_ids
            .iter()
            .filter_map(|call_id| {
                let state = self.sessions.get(call_id)?.state;
                let next = match state {
                    CallState::Initiated | CallState::Ringing => CallState::Failed,
                    _ => CallState::Ended,
                };
                self.transition(call_id, next).ok()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
