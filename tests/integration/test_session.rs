//! Integration tests for the interview session lifecycle over HTTP.
//!
//! Each test spawns the real router on an ephemeral port with a scripted
//! gateway and drives it with `reqwest`.

mod common;

use std::sync::Arc;

use common::{
    answer, app_state, get_session, memory_state, spawn_test_server, start_session,
    FAILING_ANSWER,
};
use parley_orchestrator::{Config, FileStore};
use reqwest::StatusCode;
use serde_json::{json, Value};

// ============================================================================
// Full Interview
// ============================================================================

/// Tests a complete interview from first question to final feedback.
#[tokio::test]
async fn test_full_interview_reaches_completed() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    for n in 1..=4 {
        let (status, body) = answer(&client, &addr, "alice", &id, &format!("answer {n}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["done"], false);
        assert_eq!(body["questionNumber"], n + 1);
        assert_eq!(body["totalQuestions"], 5);
    }

    let (status, body) = answer(&client, &addr, "alice", &id, "answer 5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["done"], true);
    assert_eq!(body["finalFeedback"]["strengths"], "Answered 5 questions");
    assert_eq!(body["finalFeedback"]["kind"], "generated");

    let session = get_session(&client, &addr, "alice", &id).await;
    assert_eq!(session["status"], "Completed");
    assert_eq!(session["turns"].as_array().unwrap().len(), 5);
    assert_eq!(session["turns"][4]["answer"], "answer 5");
    assert!(session["completedAt"].is_string());

    // No transition leaves a terminal state.
    let (status, body) = answer(&client, &addr, "alice", &id, "one more").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

/// Tests that the next difficulty follows the analysis signal.
#[tokio::test]
async fn test_difficulty_adapts_to_answers() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let (_, body) = answer(&client, &addr, "alice", &id, "a great answer").await;
    assert_eq!(body["difficulty"], "hard");
    assert_eq!(body["nextQuestion"], "Question 2 (hard)?");

    let (_, body) = answer(&client, &addr, "alice", &id, "a weak answer").await;
    assert_eq!(body["difficulty"], "easy");

    let (_, body) = answer(&client, &addr, "alice", &id, "an ordinary answer").await;
    assert_eq!(body["difficulty"], "medium");
}

// ============================================================================
// Stop
// ============================================================================

async fn stop(client: &reqwest::Client, addr: &str, session_id: &str) -> Value {
    let response = client
        .post(format!("http://{addr}/sessions/{session_id}/stop"))
        .bearer_auth("alice")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.expect("Invalid JSON")
}

/// Tests that stopping twice returns the same terminal summary.
#[tokio::test]
async fn test_stop_is_idempotent_and_final() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;
    answer(&client, &addr, "alice", &id, "first").await;

    let first = stop(&client, &addr, &id).await;
    let second = stop(&client, &addr, &id).await;
    assert_eq!(first["status"], "Stopped");
    assert_eq!(first["session"]["questionsAnswered"], 1);
    assert_eq!(first["session"]["finalFeedback"]["kind"], "early_stop");
    assert_eq!(first, second);

    let (status, _) = answer(&client, &addr, "alice", &id, "too late").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ============================================================================
// Failures
// ============================================================================

/// Tests that a failed analysis leaves the question open and unchanged.
#[tokio::test]
async fn test_upstream_failure_keeps_question_open() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let (status, body) = answer(&client, &addr, "alice", &id, FAILING_ANSWER).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "upstream");

    let session = get_session(&client, &addr, "alice", &id).await;
    assert_eq!(session["turns"].as_array().unwrap().len(), 1);
    assert_eq!(session["turns"][0]["answer"], "");

    let (status, body) = answer(&client, &addr, "alice", &id, "second try").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["feedback"], "Feedback on: second try");
}

/// Tests authentication and ownership checks.
#[tokio::test]
async fn test_credentials_and_ownership() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;

    let response = client
        .get(format!("http://{addr}/sessions/{id}"))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("http://{addr}/sessions/{id}"))
        .bearer_auth("mallory")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(format!("http://{addr}/sessions?candidateId=alice"))
        .bearer_auth("mallory")
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Tests that an allow-list rejects unknown candidates.
#[tokio::test]
async fn test_unknown_candidate_is_not_found() {
    let config = Config {
        candidates: Some(vec!["alice".to_string()]),
        ..Config::default()
    };
    let (addr, _handle) = spawn_test_server(memory_state(config)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/sessions"))
        .bearer_auth("mallory")
        .json(&json!({ "resumeText": "resume" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Listing, Persistence and Reports
// ============================================================================

/// Tests that sessions survive a restart on the file store.
#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let client = reqwest::Client::new();

    let id = {
        let store = FileStore::open(dir.path()).await.expect("Failed to open store");
        let (addr, handle) = spawn_test_server(app_state(Config::default(), Arc::new(store))).await;
        let id = start_session(&client, &addr, "alice").await;
        answer(&client, &addr, "alice", &id, "persisted answer").await;
        handle.abort();
        id
    };

    let store = FileStore::open(dir.path()).await.expect("Failed to open store");
    let (addr, _handle) = spawn_test_server(app_state(Config::default(), Arc::new(store))).await;

    let session = get_session(&client, &addr, "alice", &id).await;
    assert_eq!(session["turns"][0]["answer"], "persisted answer");
    assert_eq!(session["status"], "InProgress");

    let second = start_session(&client, &addr, "alice").await;
    let sessions: Value = client
        .get(format!("http://{addr}/sessions"))
        .bearer_auth("alice")
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["sessionId"], second.as_str());
    assert_eq!(sessions[0]["interviewNumber"], 2);
}

/// Tests the Markdown transcript of a finished interview.
#[tokio::test]
async fn test_markdown_report_for_completed_interview() {
    let config = Config {
        max_questions: 2,
        ..Config::default()
    };
    let (addr, _handle) = spawn_test_server(memory_state(config)).await;
    let client = reqwest::Client::new();
    let id = start_session(&client, &addr, "alice").await;
    answer(&client, &addr, "alice", &id, "a great answer").await;
    answer(&client, &addr, "alice", &id, "closing answer").await;

    let report = client
        .get(format!("http://{addr}/sessions/{id}/report?format=markdown"))
        .bearer_auth("alice")
        .send()
        .await
        .expect("Request failed")
        .text()
        .await
        .expect("Invalid body");

    assert!(report.contains("# Interview Report: alice (Interview #1)"));
    assert!(report.contains("Interview completed"));
    assert!(report.contains("### Question 2 (hard)"));
    assert!(report.contains("## Final Feedback"));
    assert!(report.contains("Could go deeper"));
}

/// Tests text resume extraction.
#[tokio::test]
async fn test_resume_upload_returns_text() {
    let (addr, _handle) = spawn_test_server(memory_state(Config::default())).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("http://{addr}/resumes"))
        .bearer_auth("alice")
        .header("content-type", "text/plain")
        .body("Alice   Example\n\n  Staff Engineer")
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(body["text"], "Alice Example\nStaff Engineer");
}
