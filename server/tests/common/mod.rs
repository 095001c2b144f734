//! Shared helpers for the integration tests: an in-process server on a random
//! port and a small JSON WebSocket client.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::config::Config;
use relay_server::state::AppState;
use relay_server::store::MemoryMessageStore;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const INTERNAL_TOKEN: &str = "integration-internal-token";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Start the server on a random port with the given config.
pub async fn start_server(config: Config) -> TestServer {
    let store = MemoryMessageStore::with_retention(config.message_retention());
    let state = AppState::new(&config, Arc::new(store));
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer { addr, state }
}

/// Server without authentication.
pub async fn start_test_server() -> TestServer {
    start_server(Config::default()).await
}

/// Server requiring JWTs on /ws and the internal token on /internal.
pub async fn start_secured_server() -> TestServer {
    start_server(Config {
        jwt_secret: Some(JWT_SECRET.to_string()),
        internal_token: Some(INTERNAL_TOKEN.to_string()),
        ..Config::default()
    })
    .await
}

pub fn token_for(user_id: &str, ttl_secs: i64) -> String {
    relay_server::auth::jwt::issue_token(JWT_SECRET.as_bytes(), user_id, ttl_secs).unwrap()
}

pub struct WsClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Self {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Failed to connect to WebSocket");
        let (write, read) = stream.split();
        Self { write, read }
    }

    pub async fn connect_with_bearer(url: &str, token: &str) -> Self {
        let mut request = url.into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", token).parse().unwrap());
        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("Failed to connect to WebSocket");
        let (write, read) = stream.split();
        Self { write, read }
    }

    /// Connect and bind to `user_id`, consuming the own online broadcast.
    pub async fn register(server: &TestServer, user_id: &str) -> Self {
        let mut client = Self::connect(&server.ws_url()).await;
        client.emit("user_connected", json!(user_id)).await;
        client.expect_status(user_id, true).await;
        client
    }

    pub async fn emit(&mut self, event: &str, data: Value) {
        self.send_frame(json!({ "event": event, "data": data })).await;
    }

    pub async fn emit_with_ack(&mut self, event: &str, data: Value, ack: u64) -> Value {
        self.send_frame(json!({ "event": event, "data": data, "ack": ack }))
            .await;
        loop {
            let frame = self.next_event().await.expect("Expected ack frame");
            if frame["event"] == "ack" && frame["ack"] == ack {
                return frame["data"].clone();
            }
        }
    }

    pub async fn send_frame(&mut self, frame: Value) {
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("Failed to send frame");
    }

    pub async fn send_raw(&mut self, msg: Message) {
        self.write.send(msg).await.expect("Failed to send message");
    }

    /// Next JSON event within two seconds. Control frames are skipped.
    pub async fn next_event(&mut self) -> Option<Value> {
        self.next_event_within(Duration::from_secs(2)).await
    }

    pub async fn next_event_within(&mut self, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.read.next()).await.ok()??;
            match msg {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Skip frames until the named event arrives.
    pub async fn expect_event(&mut self, event: &str) -> Value {
        loop {
            match self.next_event().await {
                Some(frame) if frame["event"] == event => return frame["data"].clone(),
                Some(_) => continue,
                None => panic!("Expected `{}` event", event),
            }
        }
    }

    pub async fn expect_status(&mut self, user_id: &str, online: bool) -> Value {
        loop {
            let data = self.expect_event("user_status").await;
            if data["userId"] == user_id && data["isOnline"] == online {
                return data;
            }
        }
    }

    /// Collect every event that arrives within `wait`.
    pub async fn drain_within(&mut self, wait: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut frames = Vec::new();
        while let Some(frame) = self
            .next_event_within(deadline.saturating_duration_since(tokio::time::Instant::now()))
            .await
        {
            frames.push(frame);
        }
        frames
    }

    pub async fn drain(&mut self) -> Vec<Value> {
        self.drain_within(Duration::from_millis(200)).await
    }

    /// Events named `event` among the frames that arrive within `wait`.
    pub async fn collect(&mut self, event: &str, wait: Duration) -> Vec<Value> {
        self.drain_within(wait)
            .await
            .into_iter()
            .filter(|frame| frame["event"] == event)
            .map(|frame| frame["data"].clone())
            .collect()
    }

    /// Wait for the server's close frame.
    pub async fn expect_close(&mut self) -> Option<CloseFrame> {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), self.read.next()).await {
                Ok(Some(Ok(Message::Close(frame)))) => return frame,
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
