//! Integration tests for live session events over SSE and WebSocket.
//!
//! These tests validate event delivery order, stream termination, the
//! WebSocket command channel and the disconnect policy.

mod common;

use std::time::Duration;

use common::{answer, get_session, memory_state, spawn_test_server, start_session, FAILING_ANSWER};
use futures::{SinkExt, StreamExt};
use parley_orchestrator::{Config, DisconnectPolicy};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// SSE Helpers
// ============================================================================

/// Reads SSE frames until the stream ends, returning `(event, data)` pairs.
async fn collect_sse(response: reqwest::Response) -> Vec<(String, Value)> {
    let mut body = response.bytes_stream();
    let mut buffer = String::new();
    let mut events = Vec::new();

    loop {
        let chunk = timeout(Duration::from_secs(5), body.next())
            .await
            .expect("Timeout waiting for SSE data");
        let Some(chunk) = chunk else {
            break;
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk.expect("SSE read failed")));

        while let Some(end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..end + 2).collect();
            let mut name = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(value.trim()).expect("Invalid event JSON"));
                }
            }
            // Keep-alive comments carry neither field.
            if let (Some(name), Some(data)) = (name, data) {
                events.push((name, data));
            }
        }
    }
    events
}

async fn open_sse(client: &reqwest::Client, addr: &str, session_id: &str) -> reqwest::Response {
    let response = client
        .get(format!("http://{addr}/sessions/{session_id}/stream?token=alice"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    response
}

// ============================================================================
// SSE Tests
// ============================================================================

/// Tests that SSE delivers events in commit order and ends with `complete`.
#[tokio::test]
async fn test_sse_streams_events_until_complete() {
    let config = Config {
        max_questions: 2,
        ..Config::default()
    };
    let (addr, _handle) = spawn_test_server(memory_state(config)).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let response = open_sse(&client, &addr, &id).await;
    let reader = tokio::spawn(collect_sse(response));

    answer(&client, &addr, "alice", &id, "a great answer").await;
    answer(&client, &addr, "alice", &id, "final answer").await;

    let events = reader.await.expect("Reader panicked");
    let names: Vec<_> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["feedback", "question", "feedback", "complete"]);

    let (_, question) = &events[1];
    assert_eq!(question["type"], "question");
    assert_eq!(question["questionNumber"], 2);
    assert_eq!(question["difficulty"], "hard");

    let (_, complete) = &events[3];
    assert_eq!(complete["status"], "Completed");
    assert_eq!(complete["finalFeedback"]["strengths"], "Answered 2 questions");
}

/// Tests that a failed request ends the stream with an `error` event.
#[tokio::test]
async fn test_sse_ends_with_error_event() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let response = open_sse(&client, &addr, &id).await;
    let reader = tokio::spawn(collect_sse(response));

    let (status, _) = answer(&client, &addr, "alice", &id, FAILING_ANSWER).await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);

    let events = reader.await.expect("Reader panicked");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "error");
    assert_eq!(events[0].1["kind"], "upstream");
}

/// Tests that a terminal session yields a single `complete` event.
#[tokio::test]
async fn test_sse_on_stopped_session() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;
    client
        .post(format!("http://{addr}/sessions/{id}/stop"))
        .bearer_auth("alice")
        .send()
        .await
        .expect("Request failed");

    let events = collect_sse(open_sse(&client, &addr, &id).await).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "complete");
    assert_eq!(events[0].1["status"], "Stopped");
}

/// Tests that streams of foreign sessions are refused.
#[tokio::test]
async fn test_sse_foreign_session_is_not_found() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let response = client
        .get(format!("http://{addr}/sessions/{id}/stream"))
        .bearer_auth("mallory")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

// ============================================================================
// WebSocket Helpers
// ============================================================================

async fn connect_client(addr: &str, session_id: &str) -> WsClient {
    let (ws_stream, _) = connect_async(format!("ws://{addr}/sessions/{session_id}/ws?token=alice"))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text frame as JSON, answering pings along the way.
async fn receive_frame(client: &mut WsClient) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse frame");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

async fn send_command(client: &mut WsClient, command: Value) {
    client
        .send(Message::Text(command.to_string()))
        .await
        .expect("Failed to send command");
}

// ============================================================================
// WebSocket Tests
// ============================================================================

/// Tests answering and stopping through WebSocket commands.
#[tokio::test]
async fn test_ws_commands_drive_the_session() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;
    let mut client = connect_client(&addr, &id).await;

    send_command(
        &mut client,
        json!({ "type": "submit_answer", "answer": "a weak answer", "questionNumber": 1 }),
    )
    .await;

    let feedback = receive_frame(&mut client).await;
    assert_eq!(feedback["type"], "feedback");
    assert_eq!(feedback["questionNumber"], 1);
    assert_eq!(feedback["feedback"], "Feedback on: a weak answer");

    let question = receive_frame(&mut client).await;
    assert_eq!(question["type"], "question");
    assert_eq!(question["questionNumber"], 2);
    assert_eq!(question["difficulty"], "easy");

    // Answering the old question again is rejected for this client only.
    send_command(
        &mut client,
        json!({ "type": "submit_answer", "answer": "again", "questionNumber": 1 }),
    )
    .await;
    let rejected = receive_frame(&mut client).await;
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["kind"], "conflict");

    send_command(&mut client, json!({ "type": "stop" })).await;
    let complete = receive_frame(&mut client).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["status"], "Stopped");

    let session = get_session(&http, &addr, "alice", &id).await;
    assert_eq!(session["status"], "Stopped");
}

/// Tests that malformed commands are rejected without closing the socket.
#[tokio::test]
async fn test_ws_invalid_command_is_rejected() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;
    let mut client = connect_client(&addr, &id).await;

    send_command(&mut client, json!({ "type": "dance" })).await;
    let rejected = receive_frame(&mut client).await;
    assert_eq!(rejected["type"], "rejected");
    assert_eq!(rejected["kind"], "validation");

    // HTTP submissions still reach the WebSocket client.
    answer(&http, &addr, "alice", &id, "an answer").await;
    let feedback = receive_frame(&mut client).await;
    assert_eq!(feedback["type"], "feedback");
}

/// Tests that every attached client sees the same events.
#[tokio::test]
async fn test_ws_multiple_clients_receive_events() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;
    let mut first = connect_client(&addr, &id).await;
    let mut second = connect_client(&addr, &id).await;

    answer(&http, &addr, "alice", &id, "an answer").await;

    for client in [&mut first, &mut second] {
        assert_eq!(receive_frame(client).await["type"], "feedback");
        assert_eq!(receive_frame(client).await["type"], "question");
    }
}

/// Tests that foreign sessions cannot be streamed over WebSocket.
#[tokio::test]
async fn test_ws_foreign_session_is_refused() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "bob").await;

    let result = connect_async(format!("ws://{addr}/sessions/{id}/ws?token=alice")).await;
    assert!(result.is_err());
}

// ============================================================================
// Disconnect Policy
// ============================================================================

/// Tests that the stop policy ends a session whose last client leaves.
#[tokio::test]
async fn test_disconnect_with_stop_policy_stops_session() {
    let mut config = Config::default();
    config.stream.on_disconnect = DisconnectPolicy::Stop;
    let (addr, _handle) = spawn_test_server(memory_state(config)).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;

    let mut client = connect_client(&addr, &id).await;
    client.close(None).await.expect("Failed to close");
    drop(client);

    let mut status = Value::Null;
    for _ in 0..50 {
        status = get_session(&http, &addr, "alice", &id).await["status"].clone();
        if status == "Stopped" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "Stopped");
}

/// Tests that the stop policy also applies when an SSE client goes away.
#[tokio::test]
async fn test_sse_disconnect_with_stop_policy_stops_session() {
    let mut config = Config::default();
    config.stream.on_disconnect = DisconnectPolicy::Stop;
    config.stream.heartbeat_secs = 1;
    let (addr, _handle) = spawn_test_server(memory_state(config)).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;

    let sse_client = reqwest::Client::new();
    let response = open_sse(&sse_client, &addr, &id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = get_session(&http, &addr, "alice", &id).await;
    assert_eq!(session["status"], "InProgress");

    drop(response);
    drop(sse_client);

    let mut status = Value::Null;
    for _ in 0..100 {
        status = get_session(&http, &addr, "alice", &id).await["status"].clone();
        if status == "Stopped" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "Stopped");
}

/// Tests that the default policy keeps the session after a disconnect.
#[tokio::test]
async fn test_disconnect_with_keep_policy_keeps_session() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let http = reqwest::Client::new();
    let id = start_session(&http, &addr, "alice").await;

    let mut client = connect_client(&addr, &id).await;
    client.close(None).await.expect("Failed to close");
    drop(client);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session = get_session(&http, &addr, "alice", &id).await;
    assert_eq!(session["status"], "InProgress");

    // The session can be resumed over a new connection.
    let mut client = connect_client(&addr, &id).await;
    answer(&http, &addr, "alice", &id, "resumed").await;
    assert_eq!(receive_frame(&mut client).await["type"], "feedback");
}
