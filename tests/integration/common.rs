//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_gateway::{
    AiGateway, AnswerAnalysis, Difficulty, DifficultySignal, FinalFeedback, GatewayError,
    TranscriptEntry,
};
use parley_orchestrator::{
    create_router, AppState, Config, MemoryStore, PassthroughValidator, SessionManager,
    SessionStore,
};
use serde_json::{json, Value};

/// Answer text that makes the scripted gateway fail analysis.
pub const FAILING_ANSWER: &str = "upstream-fail";

/// Gateway with deterministic behavior keyed on the answer text.
///
/// Questions are numbered in generation order. Answers containing "great"
/// push harder, answers containing "weak" push easier, anything else keeps
/// the level.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    questions: AtomicUsize,
}

#[async_trait]
impl AiGateway for ScriptedGateway {
    async fn generate_question(
        &self,
        _resume_text: &str,
        difficulty: Difficulty,
        _asked: &[String],
    ) -> Result<String, GatewayError> {
        let n = self.questions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("Question {n} ({difficulty})?"))
    }

    async fn analyze_answer(
        &self,
        _question: &str,
        answer: &str,
    ) -> Result<AnswerAnalysis, GatewayError> {
        if answer == FAILING_ANSWER {
            return Err(GatewayError::network("connection reset by peer"));
        }
        let signal = if answer.contains("great") {
            DifficultySignal::Harder
        } else if answer.contains("weak") {
            DifficultySignal::Easier
        } else {
            DifficultySignal::Same
        };
        Ok(AnswerAnalysis {
            feedback: format!("Feedback on: {answer}"),
            signal,
        })
    }

    async fn generate_final_feedback(&self, transcript: &[TranscriptEntry]) -> FinalFeedback {
        FinalFeedback::new(
            format!("Answered {} questions", transcript.len()),
            "Could go deeper",
            "1. Practice system design",
        )
    }
}

/// Helper to find an available port for testing.
pub fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Builds application state over `store` with the scripted gateway.
pub fn app_state(config: Config, store: Arc<dyn SessionStore>) -> AppState {
    let manager = SessionManager::new(config, store, Arc::new(ScriptedGateway::default()));
    AppState::new(Arc::new(manager), Arc::new(PassthroughValidator))
}

/// Application state with an in-memory store.
pub fn memory_state(config: Config) -> AppState {
    app_state(config, Arc::new(MemoryStore::new()))
}

/// Spawns the test server and returns its `host:port`.
pub async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle)
}

/// Starts a session for `candidate` and returns its id.
pub async fn start_session(client: &reqwest::Client, addr: &str, candidate: &str) -> String {
    let response = client
        .post(format!("http://{addr}/sessions"))
        .bearer_auth(candidate)
        .json(&json!({ "candidateId": candidate, "resumeText": "Distributed systems engineer" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.expect("Invalid JSON");
    body["sessionId"]
        .as_str()
        .expect("Missing sessionId")
        .to_string()
}

/// Submits an answer and returns the status code and body.
pub async fn answer(
    client: &reqwest::Client,
    addr: &str,
    candidate: &str,
    session_id: &str,
    text: &str,
) -> (reqwest::StatusCode, Value) {
    let response = client
        .post(format!("http://{addr}/sessions/{session_id}/answers"))
        .bearer_auth(candidate)
        .json(&json!({ "answer": text }))
        .send()
        .await
        .expect("Request failed");
    let status = response.status();
    (status, response.json().await.expect("Invalid JSON"))
}

/// Fetches the full session.
pub async fn get_session(
    client: &reqwest::Client,
    addr: &str,
    candidate: &str,
    session_id: &str,
) -> Value {
    client
        .get(format!("http://{addr}/sessions/{session_id}"))
        .bearer_auth(candidate)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON")
}
