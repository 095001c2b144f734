//! Integration tests for the WebSocket relay: presence, typing, messages,
//! calls, auth and heartbeat.

mod common;

use common::{
    eventually, start_secured_server, start_server, start_test_server, token_for, WsClient,
};
use relay_server::config::Config;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_register_broadcasts_presence_to_everyone() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;

    let status = a.expect_status("b1", true).await;
    assert!(status.get("lastSeen").is_none());

    b.close().await;
    let status = a.expect_status("b1", false).await;
    assert!(status["lastSeen"].is_string());
}

#[tokio::test]
async fn test_typing_expires_once_end_to_end() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    let mut c = WsClient::register(&server, "c1").await;
    a.drain().await;
    b.drain().await;

    a.emit("typing_start", json!({"conversationId": "c1", "receiverId": "b1"}))
        .await;

    let typing = b.expect_event("user_typing").await;
    assert_eq!(typing, json!({"userId": "a1", "conversationId": "c1", "isTyping": true}));

    // Nothing before the timeout
    assert!(b.collect("user_typing", Duration::from_millis(2500)).await.is_empty());

    let expired = b.collect("user_typing", Duration::from_millis(2000)).await;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0]["isTyping"], false);
    assert_eq!(expired[0]["userId"], "a1");

    assert!(b.collect("user_typing", Duration::from_millis(500)).await.is_empty());
    assert!(c.collect("user_typing", Duration::from_millis(100)).await.is_empty());
}

#[tokio::test]
async fn test_typing_stop_cancels_expiry() {
    let server = start_server(Config {
        typing_timeout_ms: 300,
        ..Config::default()
    })
    .await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    a.drain().await;

    a.emit("typing_start", json!({"conversationId": "c1", "receiverId": "b1"}))
        .await;
    a.emit("typing_stop", json!({"conversationId": "c1", "receiverId": "b1"}))
        .await;

    let events = b.collect("user_typing", Duration::from_millis(800)).await;
    let flags: Vec<bool> = events.iter().map(|e| e["isTyping"].as_bool().unwrap()).collect();
    assert_eq!(flags, vec![true, false]);
}

#[tokio::test]
async fn test_reregister_routes_only_to_newest_connection() {
    let server = start_test_server().await;
    let mut old = WsClient::register(&server, "u1").await;
    let mut new = WsClient::register(&server, "u1").await;
    let mut sender = WsClient::register(&server, "s1").await;
    old.drain().await;
    new.drain().await;

    sender
        .emit(
            "send_message",
            json!({"_id": "m1", "senderId": "s1", "receiverId": "u1", "text": "hello"}),
        )
        .await;

    assert_eq!(new.expect_event("receive_message").await["text"], "hello");
    assert!(old.collect("receive_message", Duration::from_millis(300)).await.is_empty());

    // The displaced connection closing does not take the user offline.
    old.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.connections.is_online("u1"));
    assert!(sender.collect("user_status", Duration::from_millis(200)).await.is_empty());
}

#[tokio::test]
async fn test_get_user_status_replies_to_requester_only() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    a.drain().await;
    b.drain().await;

    let reply = a.emit_with_ack("get_user_status", json!("b1"), 1).await;
    assert_eq!(reply["userId"], "b1");
    assert_eq!(reply["isOnline"], true);

    let reply = a.emit_with_ack("get_user_status", json!("nobody"), 2).await;
    assert_eq!(reply["isOnline"], false);
    assert!(reply["lastSeen"].is_null());

    assert!(b.drain().await.is_empty());
}

#[tokio::test]
async fn test_message_status_and_reactions() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    a.drain().await;

    let ack = a
        .emit_with_ack(
            "send_message",
            json!({"_id": "m1", "sender": {"_id": "a1"}, "receiver": {"_id": "b1"}}),
            9,
        )
        .await;
    assert_eq!(ack["delivered"], true);
    b.expect_event("receive_message").await;

    b.emit("message_read", json!({"messageIds": ["m1"], "senderId": "a1"}))
        .await;
    let update = a.expect_event("message_status_update").await;
    assert_eq!(update, json!({"messageId": "m1", "messageStatus": "read"}));

    b.emit("add_reaction", json!({"messageId": "m1", "emoji": "❤️"})).await;
    let to_a = a.expect_event("reaction_update").await;
    let to_b = b.expect_event("reaction_update").await;
    assert_eq!(to_a, to_b);
    assert_eq!(to_a["reactions"], json!([{"userId": "b1", "emoji": "❤️"}]));

    // Same emoji again toggles it off
    b.emit("add_reaction", json!({"messageId": "m1", "emoji": "❤️"})).await;
    assert_eq!(a.expect_event("reaction_update").await["reactions"], json!([]));
}

#[tokio::test]
async fn test_call_lifecycle() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    a.drain().await;

    a.emit(
        "initiate_call",
        json!({
            "callerId": "a1",
            "receiverId": "b1",
            "callType": "video",
            "callerInfo": {"username": "alice", "profilePicture": "a.png"}
        }),
    )
    .await;
    let incoming = b.expect_event("incoming_call").await;
    assert_eq!(incoming["callerName"], "alice");
    assert_eq!(incoming["callerAvatar"], "a.png");
    let call_id = incoming["callId"].as_str().unwrap().to_string();
    assert!(call_id.starts_with("a1-b1-"));

    b.emit(
        "accept_call",
        json!({"callerId": "a1", "callId": call_id, "receiverInfo": {"username": "bob"}}),
    )
    .await;
    let accepted = a.expect_event("call_accepted").await;
    assert_eq!(accepted["callId"], call_id.as_str());
    assert_eq!(accepted["callerName"], "bob");

    a.emit("webrtc_offer", json!({"offer": {"sdp": "o"}, "receiverId": "b1", "callId": call_id}))
        .await;
    let offer = b.expect_event("webrtc_offer").await;
    assert_eq!(offer["offer"]["sdp"], "o");
    assert_eq!(offer["senderId"], "a1");

    b.emit("webrtc_answer", json!({"answer": {"sdp": "a"}, "receiverId": "a1", "callId": call_id}))
        .await;
    assert_eq!(a.expect_event("webrtc_answer").await["answer"]["sdp"], "a");

    a.emit(
        "webrtc_ice_candidate",
        json!({"candidate": {"candidate": "c0"}, "receiverId": "b1", "callId": call_id}),
    )
    .await;
    assert_eq!(b.expect_event("webrtc_ice_candidate").await["candidate"]["candidate"], "c0");

    assert!(eventually(|| {
        server.state.calls.session(&call_id).map(|s| s.state.as_str()) == Some("connected")
    })
    .await);

    b.emit("end_call", json!({"callId": call_id, "participantId": "a1"})).await;
    assert_eq!(a.expect_event("call_ended").await["callId"], call_id.as_str());

    // Signals after the end are dropped
    a.emit("webrtc_offer", json!({"offer": {"sdp": "late"}, "receiverId": "b1", "callId": call_id}))
        .await;
    assert!(b.collect("webrtc_offer", Duration::from_millis(300)).await.is_empty());
    assert!(server.state.calls.session(&call_id).is_none());
}

#[tokio::test]
async fn test_call_to_offline_user_fails() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;

    a.emit(
        "initiate_call",
        json!({"callerId": "a1", "receiverId": "b1", "callType": "audio"}),
    )
    .await;
    let failed = a.expect_event("call_failed").await;
    assert_eq!(failed["reason"], "user is offline");
}

#[tokio::test]
async fn test_disconnect_during_ringing_ends_call_for_peer() {
    let server = start_test_server().await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;

    a.emit(
        "initiate_call",
        json!({"callerId": "a1", "receiverId": "b1", "callType": "video"}),
    )
    .await;
    let call_id = b.expect_event("incoming_call").await["callId"]
        .as_str()
        .unwrap()
        .to_string();

    a.close().await;

    let ended = b.expect_event("call_ended").await;
    assert_eq!(ended["callId"], call_id.as_str());
    b.expect_status("a1", false).await;
    assert!(server.state.calls.session(&call_id).is_none());
}

#[tokio::test]
async fn test_unanswered_call_times_out_for_both_parties() {
    let server = start_server(Config {
        ring_timeout_secs: 1,
        ..Config::default()
    })
    .await;
    let mut a = WsClient::register(&server, "a1").await;
    let mut b = WsClient::register(&server, "b1").await;
    a.drain().await;

    let ack = a
        .emit_with_ack(
            "initiate_call",
            json!({"callerId": "a1", "receiverId": "b1", "callType": "audio"}),
            3,
        )
        .await;
    let call_id = ack["callId"].as_str().unwrap().to_string();
    assert_eq!(b.expect_event("incoming_call").await["callId"], call_id.as_str());

    let failed = a.expect_event("call_failed").await;
    assert_eq!(failed["reason"], "no answer");
    assert_eq!(failed["callId"], call_id.as_str());
    assert_eq!(b.expect_event("call_ended").await["callId"], call_id.as_str());
    assert!(server.state.calls.session(&call_id).is_none());

    // A late pick-up reaches nobody.
    b.emit(
        "accept_call",
        json!({"callerId": "a1", "callId": call_id, "receiverInfo": {"username": "bob"}}),
    )
    .await;
    assert!(a.collect("call_accepted", Duration::from_millis(300)).await.is_empty());
}

#[tokio::test]
async fn test_valid_token_binds_only_its_user() {
    let server = start_secured_server().await;
    let url = format!("{}?token={}", server.ws_url(), token_for("a1", 300));
    let mut client = WsClient::connect(&url).await;

    client.emit("user_connected", json!("b1")).await;
    assert!(client.collect("user_status", Duration::from_millis(300)).await.is_empty());
    assert!(!server.state.connections.is_online("b1"));

    client.emit("user_connected", json!("a1")).await;
    client.expect_status("a1", true).await;
}

#[tokio::test]
async fn test_bearer_header_is_accepted() {
    let server = start_secured_server().await;
    let mut client = WsClient::connect_with_bearer(&server.ws_url(), &token_for("a1", 300)).await;

    client.emit("user_connected", json!("a1")).await;
    client.expect_status("a1", true).await;
}

#[tokio::test]
async fn test_invalid_token_closes_with_4002() {
    let server = start_secured_server().await;
    let url = format!("{}?token=not-a-jwt", server.ws_url());
    let mut client = WsClient::connect(&url).await;

    let frame = client.expect_close().await.expect("Expected close frame");
    assert_eq!(frame.code, CloseCode::from(4002));
}

#[tokio::test]
async fn test_missing_token_closes_with_4002() {
    let server = start_secured_server().await;
    let mut client = WsClient::connect(&server.ws_url()).await;

    let frame = client.expect_close().await.expect("Expected close frame");
    assert_eq!(frame.code, CloseCode::from(4002));
}

#[tokio::test]
async fn test_expired_token_closes_with_4001() {
    let server = start_secured_server().await;
    let url = format!("{}?token={}", server.ws_url(), token_for("a1", -120));
    let mut client = WsClient::connect(&url).await;

    let frame = client.expect_close().await.expect("Expected close frame");
    assert_eq!(frame.code, CloseCode::from(4001));
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let server = start_test_server().await;
    let mut client = WsClient::register(&server, "a1").await;

    client.send_raw(Message::Ping(vec![42, 43, 44].into())).await;

    // The client library answers pings itself; here we only need the
    // connection to stay up and keep routing events.
    let reply = client.emit_with_ack("get_user_status", json!("a1"), 1).await;
    assert_eq!(reply["isOnline"], true);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let server = start_test_server().await;
    let mut client = WsClient::register(&server, "a1").await;

    client.send_raw(Message::Text("{not json".into())).await;
    client.send_raw(Message::Binary(vec![1, 2, 3].into())).await;
    client.send_frame(json!({"event": "nope", "data": 1})).await;

    let reply = client.emit_with_ack("get_user_status", json!("a1"), 3).await;
    assert_eq!(reply["isOnline"], true);
}
