//! Call signaling relay.
//!
//! Relays call control events and WebRTC offer/answer/ICE payloads strictly
//! between the two participants of a live session. Media never passes
//! through here. Every target is resolved by user id at the time of sending.

use serde::Serialize;
use std::time::Duration;

use crate::call::state::{CallError, CallSession, CallState, CallTable};
use crate::proto::client::{PartyInfo, SignalPayload};
use crate::proto::server::{CallAccepted, CallFailed, CallRef, IncomingCall, RelayedSignal};
use crate::proto::ServerEvent;
use crate::ws::broadcast::send_to_user;
use crate::ws::ConnectionRegistry;

/// Reason sent with `call_failed` when the receiver has no live connection.
pub const RECEIVER_OFFLINE: &str = "user is offline";
/// Reason sent with `call_failed` when nobody picked up in time.
pub const NO_ANSWER: &str = "no answer";

pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(30);

/// Ack reply to `initiate_call`; `callId` is null when the call failed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub call_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallSignalingRelay {
    registry: ConnectionRegistry,
    calls: CallTable,
    ring_timeout: Duration,
}

impl CallSignalingRelay {
    pub fn new(registry: ConnectionRegistry, ring_timeout: Duration) -> Self {
        Self {
            registry,
            calls: CallTable::new(),
            ring_timeout,
        }
    }

    pub fn session(&self, call_id: &str) -> Option<CallSession> {
        self.calls.get(call_id)
    }

    /// Start a call. Fails fast with `call_failed` to the caller when the
    /// receiver is unreachable; otherwise rings the receiver.
    pub fn initiate(
        &self,
        caller_id: &str,
        receiver_id: &str,
        call_type: &str,
        caller_info: &PartyInfo,
    ) -> Option<CallSession> {
        let Some(receiver) = self.registry.route_to(receiver_id) else {
            tracing::info!(
                caller_id = %caller_id,
                receiver_id = %receiver_id,
                "Call receiver offline"
            );
            send_to_user(
                &self.registry,
                caller_id,
                &ServerEvent::CallFailed(CallFailed {
                    reason: RECEIVER_OFFLINE.to_string(),
                    call_id: None,
                }),
            );
            return None;
        };

        let session = self.calls.create(caller_id, receiver_id, call_type);
        let session = self.log_err(self.calls.transition(&session.call_id, CallState::Ringing))?;

        receiver.send(&ServerEvent::IncomingCall(IncomingCall {
            call_id: session.call_id.clone(),
            caller_id: caller_id.to_string(),
            caller_name: caller_info.username.clone(),
            caller_avatar: caller_info.profile_picture.clone(),
            call_type: call_type.to_string(),
        }));

        tracing::info!(
            call_id = %session.call_id,
            call_type = %call_type,
            "Call ringing"
        );
        self.arm_ring_timeout(session.call_id.clone());
        Some(session)
    }

    /// Fail a call that is still ringing: the caller gets `call_failed`, the
    /// receiver `call_ended`. Calls in any other state are left alone.
    pub fn expire_ringing(&self, call_id: &str) -> Option<CallSession> {
        let session = self
            .calls
            .transition_from(call_id, CallState::Ringing, CallState::Failed)
            .ok()?;

        send_to_user(
            &self.registry,
            &session.caller_id,
            &ServerEvent::CallFailed(CallFailed {
                reason: NO_ANSWER.to_string(),
                call_id: Some(session.call_id.clone()),
            }),
        );
        send_to_user(
            &self.registry,
            &session.receiver_id,
            &ServerEvent::CallEnded(CallRef {
                call_id: session.call_id.clone(),
            }),
        );

        tracing::info!(call_id = %session.call_id, "Call not answered");
        Some(session)
    }

    fn arm_ring_timeout(&self, call_id: String) {
        let relay = self.clone();
        let timeout = self.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            relay.expire_ringing(&call_id);
        });
    }

    /// Receiver picks up. A no-op if the caller is no longer reachable.
    pub fn accept(
        &self,
        receiver_id: &str,
        caller_id: &str,
        call_id: &str,
        receiver_info: &PartyInfo,
    ) -> Option<CallState> {
        self.session_between(call_id, caller_id, receiver_id)?;

        let Some(caller) = self.registry.route_to(caller_id) else {
            tracing::debug!(call_id = %call_id, "Caller gone before accept");
            return None;
        };

        let session = self.log_err(self.calls.transition(call_id, CallState::Accepted))?;
        caller.send(&ServerEvent::CallAccepted(CallAccepted {
            call_id: call_id.to_string(),
            caller_name: receiver_info.username.clone(),
            caller_avatar: receiver_info.profile_picture.clone(),
        }));
        Some(session.state)
    }

    /// Receiver declines.
    pub fn reject(&self, receiver_id: &str, caller_id: &str, call_id: &str) -> Option<CallState> {
        self.session_between(call_id, caller_id, receiver_id)?;

        let session = self.log_err(self.calls.transition(call_id, CallState::Rejected))?;
        send_to_user(
            &self.registry,
            caller_id,
            &ServerEvent::CallRejected(CallRef {
                call_id: call_id.to_string(),
            }),
        );
        Some(session.state)
    }

    /// Either participant hangs up; `participant_id` is the one to notify.
    pub fn end(&self, user_id: &str, call_id: &str, participant_id: &str) -> Option<CallState> {
        let session = self.calls.get(call_id)?;
        if session.peer_of(user_id) != Some(participant_id) {
            tracing::debug!(
                call_id = %call_id,
                user_id = %user_id,
                "end_call from outside the call ignored"
            );
            return None;
        }

        let session = self.log_err(self.calls.transition(call_id, CallState::Ended))?;
        send_to_user(
            &self.registry,
            participant_id,
            &ServerEvent::CallEnded(CallRef {
                call_id: call_id.to_string(),
            }),
        );
        Some(session.state)
    }

    /// Forward a WebRTC signal to the other participant. Signals naming an
    /// unknown or finished call, or parties outside it, are dropped. An
    /// answer relayed on an accepted call marks it connected.
    pub fn relay_signal(
        &self,
        sender_id: &str,
        payload: SignalPayload,
        receiver_id: &str,
        call_id: &str,
    ) -> bool {
        let Some(session) = self.calls.get(call_id) else {
            tracing::debug!(call_id = %call_id, "Signal for unknown call dropped");
            return false;
        };
        if session.peer_of(sender_id) != Some(receiver_id) {
            tracing::debug!(
                call_id = %call_id,
                sender_id = %sender_id,
                "Signal between non-participants dropped"
            );
            return false;
        }

        let kind = payload.kind();
        let event = ServerEvent::signal(RelayedSignal {
            payload,
            sender_id: sender_id.to_string(),
            call_id: call_id.to_string(),
        });
        let delivered = send_to_user(&self.registry, receiver_id, &event);

        let answered = matches!(event, ServerEvent::WebrtcAnswer(_));
        if delivered && answered && session.state == CallState::Accepted {
            if let Ok(session) = self.calls.transition(call_id, CallState::Connected) {
                tracing::info!(call_id = %session.call_id, "Call connected");
            }
        }

        tracing::trace!(
            call_id = %call_id,
            kind = kind.as_str(),
            delivered = delivered,
            "Signal relayed"
        );
        delivered
    }

    /// Terminate every live call of a user whose connection dropped and tell
    /// the remaining participant.
    pub fn drop_participant(&self, user_id: &str) -> Vec<CallSession> {
        let terminated = self.calls.terminate_for_user(user_id);
        for session in &terminated {
            if let Some(peer) = session.peer_of(user_id) {
                send_to_user(
                    &self.registry,
                    peer,
                    &ServerEvent::CallEnded(CallRef {
                        call_id: session.call_id.clone(),
                    }),
                );
            }
            tracing::info!(
                call_id = %session.call_id,
                state = session.state.as_str(),
                "Call terminated by disconnect"
            );
        }
        terminated
    }

    /// Session `call_id` if it is exactly between `caller_id` and `receiver_id`.
    fn session_between(
        &self,
        call_id: &str,
        caller_id: &str,
        receiver_id: &str,
    ) -> Option<CallSession> {
        let session = self.calls.get(call_id)?;
        if session.caller_id != caller_id || session.receiver_id != receiver_id {
            tracing::debug!(call_id = %call_id, "Call party mismatch, ignored");
            return None;
        }
        Some(session)
    }

    fn log_err(&self, result: Result<CallSession, CallError>) -> Option<CallSession> {
        match result {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Call event ignored");
                None
            }
        }
    }
}
