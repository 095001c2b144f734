use crate::call::signaling::InitiateResponse;
use crate::call::CallSignalingRelay;
use crate::chat::messages::{ForwardResponse, MessageStatus};
use crate::chat::presence;
use crate::proto::client::{AddReaction, Signal, SignalKind, Typing};
use crate::proto::server::UserStatus;
use crate::proto::{self, ClientEvent, ServerEvent};
use crate::state::AppState;
use crate::ws::ConnectionHandle;

/// Per-connection state owned by the reader loop.
#[derive(Debug)]
pub struct ConnectionContext {
    pub handle: ConnectionHandle,
    /// Set by `user_connected`.
    pub user_id: Option<String>,
    /// User id proven by the upgrade token, when authentication is enabled.
    pub authenticated: Option<String>,
}

impl ConnectionContext {
    pub fn new(handle: ConnectionHandle, authenticated: Option<String>) -> Self {
        Self {
            handle,
            user_id: None,
            authenticated,
        }
    }
}

/// Handle an incoming text frame.
/// Decodes the event and dispatches it; malformed frames are logged and dropped.
pub fn handle_text_message(text: &str, ctx: &mut ConnectionContext, state: &AppState) {
    let inbound = match proto::decode(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            tracing::warn!(
                connection = %ctx.handle.id(),
                user_id = ?ctx.user_id,
                error = %e,
                "Dropping malformed frame"
            );
            return;
        }
    };

    match inbound.event {
        ClientEvent::UserConnected(user_id) => handle_user_connected(user_id, ctx, state),
        ClientEvent::GetUserStatus(user_id) => {
            handle_get_user_status(&user_id, inbound.ack, ctx, state)
        }
        event => {
            let Some(user_id) = ctx.user_id.clone() else {
                tracing::debug!(
                    connection = %ctx.handle.id(),
                    "Event from unregistered connection ignored"
                );
                return;
            };
            dispatch_event(event, inbound.ack, &user_id, ctx, state);
        }
    }
}

/// Dispatch an event from a registered connection.
fn dispatch_event(
    event: ClientEvent,
    ack: Option<u64>,
    user_id: &str,
    ctx: &ConnectionContext,
    state: &AppState,
) {
    match event {
        ClientEvent::SendMessage(message) => {
            let delivered = state.messages.forward_new_message(message);
            if let Some(ack) = ack {
                reply(ctx, ack, &ForwardResponse { delivered });
            }
        }
        ClientEvent::MessageRead(read) => {
            state.store.mark_read(&read.message_ids);
            state.messages.mark_read(&read.message_ids, &read.sender_id);
        }
        ClientEvent::MessageDelivered(delivered) => {
            state.messages.relay_status(
                &delivered.message_ids,
                &delivered.sender_id,
                MessageStatus::Delivered,
            );
        }
        ClientEvent::TypingStart(typing) => {
            if let Some(typing) = typing_target(typing) {
                state
                    .typing
                    .start_typing(user_id, &typing.conversation_id, &typing.receiver_id);
            }
        }
        ClientEvent::TypingStop(typing) => {
            if let Some(typing) = typing_target(typing) {
                state
                    .typing
                    .stop_typing(user_id, &typing.conversation_id, &typing.receiver_id);
            }
        }
        ClientEvent::AddReaction(reaction) => handle_add_reaction(reaction, user_id, state),
        ClientEvent::InitiateCall(call) => {
            if call.caller_id != user_id {
                tracing::warn!(
                    user_id = %user_id,
                    caller_id = %call.caller_id,
                    "initiate_call on behalf of another user ignored"
                );
                return;
            }
            let session = state.calls.initiate(
                user_id,
                &call.receiver_id,
                &call.call_type,
                &call.caller_info,
            );
            if let Some(ack) = ack {
                let call_id = session.map(|session| session.call_id);
                reply(ctx, ack, &InitiateResponse { call_id });
            }
        }
        ClientEvent::AcceptCall(call) => {
            state
                .calls
                .accept(user_id, &call.caller_id, &call.call_id, &call.receiver_info);
        }
        ClientEvent::RejectCall(call) => {
            state.calls.reject(user_id, &call.caller_id, &call.call_id);
        }
        ClientEvent::EndCall(call) => {
            state.calls.end(user_id, &call.call_id, &call.participant_id);
        }
        ClientEvent::WebrtcOffer(signal) => {
            relay_signal(&state.calls, user_id, SignalKind::Offer, signal)
        }
        ClientEvent::WebrtcAnswer(signal) => {
            relay_signal(&state.calls, user_id, SignalKind::Answer, signal)
        }
        ClientEvent::WebrtcIceCandidate(signal) => {
            relay_signal(&state.calls, user_id, SignalKind::IceCandidate, signal)
        }
        ClientEvent::UserConnected(_) | ClientEvent::GetUserStatus(_) => {}
    }
}

/// Bind the connection to a user. A connection that was bound to someone
/// else is released first.
fn handle_user_connected(user_id: String, ctx: &mut ConnectionContext, state: &AppState) {
    if user_id.is_empty() {
        tracing::debug!(connection = %ctx.handle.id(), "user_connected without id ignored");
        return;
    }
    if let Some(authenticated) = &ctx.authenticated {
        if *authenticated != user_id {
            tracing::warn!(
                connection = %ctx.handle.id(),
                token_user = %authenticated,
                claimed = %user_id,
                "user_connected does not match token, ignored"
            );
            return;
        }
    }

    if let Some(previous) = ctx.user_id.take() {
        if previous != user_id {
            presence::disconnect_user(state, &previous, &ctx.handle);
        }
    }

    presence::connect_user(state, &user_id, ctx.handle.clone());
    ctx.user_id = Some(user_id);
}

/// Presence lookup answered only to the requester: as the ack reply when the
/// request carries one, otherwise as a `user_status` event.
fn handle_get_user_status(
    user_id: &str,
    ack: Option<u64>,
    ctx: &ConnectionContext,
    state: &AppState,
) {
    let status = state.presence.query_status(user_id);
    match ack {
        Some(ack) => reply(ctx, ack, &status),
        None => {
            ctx.handle.send(&ServerEvent::UserStatus(UserStatus {
                user_id: status.user_id,
                is_online: status.is_online,
                last_seen: status.last_seen,
            }));
        }
    }
}

fn handle_add_reaction(reaction: AddReaction, user_id: &str, state: &AppState) {
    if let Some(claimed) = &reaction.user_id {
        if claimed != user_id {
            tracing::warn!(
                user_id = %user_id,
                claimed = %claimed,
                "add_reaction on behalf of another user ignored"
            );
            return;
        }
    }
    if reaction.message_id.is_empty() || reaction.emoji.is_empty() {
        return;
    }

    let (sender_id, receiver_id) = match (reaction.sender_id, reaction.receiver_id) {
        (Some(sender), Some(receiver)) => (sender, receiver),
        (sender, receiver) => {
            let Some(known) = state.messages.participants(&reaction.message_id) else {
                tracing::debug!(
                    message_id = %reaction.message_id,
                    "Reaction on unknown message ignored"
                );
                return;
            };
            (
                sender.unwrap_or(known.sender_id),
                receiver.unwrap_or(known.receiver_id),
            )
        }
    };

    state.messages.apply_reaction(
        &reaction.message_id,
        user_id,
        &reaction.emoji,
        &sender_id,
        &receiver_id,
    );
}

fn relay_signal(calls: &CallSignalingRelay, user_id: &str, expected: SignalKind, signal: Signal) {
    if signal.payload.kind() != expected {
        tracing::debug!(
            user_id = %user_id,
            expected = expected.as_str(),
            "Signal payload does not match event, ignored"
        );
        return;
    }
    calls.relay_signal(user_id, signal.payload, &signal.receiver_id, &signal.call_id);
}

/// Typing payloads need both a conversation and a receiver.
fn typing_target(typing: Typing) -> Option<Typing> {
    if typing.conversation_id.is_empty() || typing.receiver_id.is_empty() {
        return None;
    }
    Some(typing)
}

fn reply<T: serde::Serialize>(ctx: &ConnectionContext, ack: u64, data: &T) {
    if let Some(msg) = proto::encode_ack(ack, data) {
        ctx.handle.send_message(msg);
    }
}
