use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::chat::presence;
use crate::state::{AppState, Heartbeat};
use crate::ws::protocol::{self, ConnectionContext};
use crate::ws::{ConnectionHandle, ConnectionSender};

/// Close code sent when the peer stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Ping task: heartbeat, closes the connection when pongs stop arriving
/// - Reader loop: decodes incoming frames and dispatches them
///
/// The connection is not routable until the client sends `user_connected`.
/// When the reader loop exits, whatever user the connection was bound to is
/// deregistered.
pub async fn run_connection(socket: WebSocket, state: AppState, authenticated: Option<String>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let mut ctx = ConnectionContext::new(ConnectionHandle::new(tx.clone()), authenticated);
    let connection_id = ctx.handle.id();

    tracing::info!(
        connection = %connection_id,
        authenticated = ?ctx.authenticated,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut ping_handle = tokio::spawn(ping_task(tx.clone(), pong_rx, state.heartbeat));

    // Reader loop: process incoming WebSocket messages until the peer goes
    // away or the ping task gives up on it
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut ping_handle => {
                tracing::info!(
                    connection = %connection_id,
                    user_id = ?ctx.user_id,
                    "Heartbeat lost"
                );
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &mut ctx, &state);
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection = %connection_id,
                        len = data.len(),
                        "Binary frame ignored"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection = %connection_id,
                        user_id = ?ctx.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection = %connection_id,
                    user_id = ?ctx.user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    if let Some(user_id) = ctx.user_id.take() {
        presence::disconnect_user(&state, &user_id, &ctx.handle);
    }

    // Dropping the last senders lets the writer flush queued frames and stop
    drop(ctx);
    drop(tx);
    if timeout(state.heartbeat.ping_interval, &mut writer_handle).await.is_err() {
        tracing::debug!(connection = %connection_id, "Writer did not drain in time");
        writer_handle.abort();
    }

    tracing::info!(connection = %connection_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
    let _ = ws_sender.close().await;
}

/// Ping task: sends periodic pings and closes the connection when no pong
/// arrives within the timeout.
async fn ping_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    heartbeat: Heartbeat,
) {
    let mut ping_timer = interval(heartbeat.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(heartbeat.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {
                // Extra pongs must not answer the next ping
                while pong_rx.try_recv().is_ok() {}
            }
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
