//! HTTP API for the Parley interview service.
//!
//! Every route except `/health` and `/audio` requires a credential, read from
//! `Authorization: Bearer`, `x-auth-token` or a `token` query parameter.
//!
//! # Endpoints
//!
//! - `POST /sessions` - Start an interview
//! - `GET /sessions` - List the caller's sessions, newest first
//! - `GET /sessions/:id` - Full session with every turn
//! - `POST /sessions/:id/answers` - Answer the open question
//! - `POST /sessions/:id/answers/audio` - Answer with recorded audio
//! - `POST /sessions/:id/next` - Retry an owed question
//! - `POST /sessions/:id/stop` - End the interview early
//! - `GET /sessions/:id/stream` - Server-Sent Events
//! - `GET /sessions/:id/ws` - WebSocket events and commands
//! - `GET /sessions/:id/report` - Markdown or JSON transcript
//! - `POST /resumes` - Extract text from a resume document
//! - `GET /health` - Liveness probe
//!
//! # Example
//!
//! ```no_run
//! use parley_orchestrator::{
//!     create_router, AppState, Config, MemoryStore, PassthroughValidator, SessionManager,
//! };
//! use parley_gateway::{GeminiClient, ModelGateway, RetryPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let client = GeminiClient::from_env("GEMINI_API_KEY", "gemini-2.5-flash")?;
//! let gateway = ModelGateway::new(client, RetryPolicy::default());
//! let manager = SessionManager::new(config, Arc::new(MemoryStore::new()), Arc::new(gateway));
//! let state = AppState::new(Arc::new(manager), Arc::new(PassthroughValidator));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, create_router(state)).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parley_gateway::{DisabledTranscriber, Difficulty, FinalFeedback, Transcriber};
use parley_report::{json::JsonGenerator, MarkdownGenerator};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::{token_from_headers, CredentialValidator};
use crate::config::Config;
use crate::error::{ErrorKind, ParleyError};
use crate::manager::{AnswerOutcome, QuestionView, SessionManager};
use crate::resume::{DocumentExtractor, ResumeExtractor};
use crate::session::{Session, SessionStatus, SessionSummary};
use crate::stream::{sse_handler, ws_handler};

/// MIME type assumed for audio answers sent without a `Content-Type`.
const DEFAULT_AUDIO_MIME: &str = "audio/webm";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Candidate id; must match the credential when given.
    #[serde(default)]
    pub candidate_id: Option<String>,
    /// Plain-text resume.
    #[serde(default)]
    pub resume_text: String,
}

/// Response body for `POST /sessions`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    /// New session id.
    pub session_id: String,
    /// First question.
    pub question: String,
    /// Its difficulty (always medium).
    pub difficulty: Difficulty,
    /// Always 1.
    pub question_number: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// Ordinal among the candidate's sessions.
    pub interview_number: u32,
    /// Spoken question, when speech is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Request body for `POST /sessions/:id/answers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    /// Answer text.
    #[serde(default)]
    pub answer: String,
    /// Number of the question being answered.
    #[serde(default)]
    pub question_number: Option<u32>,
}

/// Query string for `POST /sessions/:id/answers/audio`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnswerQuery {
    /// Number of the question being answered.
    #[serde(default)]
    pub question_number: Option<u32>,
}

/// Response body for answer submissions.
///
/// `questionNumber` names the next question when there is one, otherwise
/// the question just answered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    /// Feedback on the answer.
    pub feedback: String,
    /// `true` when the interview is complete.
    pub done: bool,
    /// Next question text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_question: Option<String>,
    /// Next question difficulty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    /// See the type docs.
    pub question_number: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// Spoken next question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Final feedback once done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<FinalFeedback>,
    /// Recognized text, for audio answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl From<AnswerOutcome> for AnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        let (next_question, difficulty, audio_url, question_number) = match outcome.next {
            Some(next) => (
                Some(next.question),
                Some(next.difficulty),
                next.audio_url,
                next.question_number,
            ),
            None => (None, None, None, outcome.question_number),
        };
        Self {
            feedback: outcome.feedback,
            done: outcome.done,
            next_question,
            difficulty,
            question_number,
            total_questions: outcome.total_questions,
            audio_url,
            final_feedback: outcome.final_feedback,
            transcript: None,
        }
    }
}

/// Response body for `POST /sessions/:id/stop`.
#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    /// `Stopped`, or `Completed` if the interview had already finished.
    pub status: SessionStatus,
    /// The terminal session.
    pub session: SessionSummary,
}

/// Query string for `GET /sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    /// Must match the credential when given.
    #[serde(default)]
    pub candidate_id: Option<String>,
}

/// Query string for `GET /sessions/:id/report`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    /// `markdown` (default) or `json`.
    #[serde(default)]
    pub format: Option<String>,
}

/// Response body for `POST /resumes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeResponse {
    /// Extracted plain text.
    pub text: String,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error category.
    pub kind: ErrorKind,
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service.
    pub config: Config,
    /// Runs every session.
    pub manager: Arc<SessionManager>,
    /// Resolves credentials to candidate ids.
    pub validator: Arc<dyn CredentialValidator>,
    /// Turns resume uploads into text.
    pub extractor: Arc<dyn ResumeExtractor>,
    /// Turns audio answers into text.
    pub transcriber: Arc<dyn Transcriber>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates state using the manager's configuration, the document
    /// extractor and no transcription.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, validator: Arc<dyn CredentialValidator>) -> Self {
        let config = manager.config().clone();
        Self {
            extractor: Arc::new(DocumentExtractor::new(config.max_resume_bytes)),
            transcriber: Arc::new(DisabledTranscriber),
            config,
            manager,
            validator,
        }
    }

    /// Uses `transcriber` for audio answers.
    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    /// Uses `extractor` for resume uploads.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ResumeExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

// ============================================================================
// Caller
// ============================================================================

/// The authenticated candidate making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Candidate id resolved from the credential.
    pub candidate_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // EventSource clients cannot set headers, so they pass ?token=.
        let token = token_from_headers(&parts.headers).or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.token)
                .filter(|token| !token.trim().is_empty())
        });

        let token = token.ok_or_else(|| ParleyError::unauthorized("missing credentials"))?;
        let candidate_id = state.validator.validate(&token)?;
        Ok(Self { candidate_id })
    }
}

impl Caller {
    /// Rejects a request naming a candidate other than the caller.
    fn check_candidate(&self, claimed: Option<&str>) -> Result<(), ParleyError> {
        match claimed.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if id != self.candidate_id => Err(ParleyError::unauthorized(
                "candidateId does not match the credentials",
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error returned by API handlers, rendered as `{kind, error}`.
#[derive(Debug)]
pub struct ApiError(pub ParleyError);

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ParleyError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Upstream | ErrorKind::Transcription => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(kind = %kind, error = %self.0, "Request failed");
        }

        let body = Json(ErrorResponse {
            kind,
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Audio files are served under `/audio` when speech is enabled.
pub fn create_router(state: AppState) -> Router {
    // Configure CORS for browser clients (allow all origins)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let audio_limit = DefaultBodyLimit::max(state.config.max_audio_bytes);
    let resume_limit = DefaultBodyLimit::max(state.config.max_resume_bytes);

    let mut router = Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_start_session).get(handle_list_sessions))
        .route("/sessions/:id", get(handle_get_session))
        .route("/sessions/:id/answers", post(handle_submit_answer))
        .route(
            "/sessions/:id/answers/audio",
            post(handle_submit_audio_answer).layer(audio_limit),
        )
        .route("/sessions/:id/next", post(handle_next_question))
        .route("/sessions/:id/stop", post(handle_stop_session))
        .route("/sessions/:id/stream", get(sse_handler))
        .route("/sessions/:id/ws", get(ws_handler))
        .route("/sessions/:id/report", get(handle_report))
        .route("/resumes", post(handle_extract_resume).layer(resume_limit));

    if state.config.speech.enabled {
        router = router.nest_service("/audio", ServeDir::new(&state.config.speech.audio_dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Handler for `POST /sessions`.
async fn handle_start_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartSessionResponse>), ApiError> {
    let Json(request) = payload?;
    caller.check_candidate(request.candidate_id.as_deref())?;

    let outcome = state
        .manager
        .start_session(&caller.candidate_id, &request.resume_text)
        .await?;

    let question = outcome.question;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: outcome.session_id,
            question: question.question,
            difficulty: question.difficulty,
            question_number: question.question_number,
            total_questions: question.total_questions,
            interview_number: outcome.interview_number,
            audio_url: question.audio_url,
        }),
    ))
}

/// Handler for `GET /sessions`.
async fn handle_list_sessions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    caller.check_candidate(query.candidate_id.as_deref())?;
    Ok(Json(state.manager.get_sessions(&caller.candidate_id).await?))
}

/// Handler for `GET /sessions/:id`.
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(
        state
            .manager
            .get_session(&session_id, &caller.candidate_id)
            .await?,
    ))
}

/// Handler for `POST /sessions/:id/answers`.
async fn handle_submit_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .manager
        .submit_answer(
            &session_id,
            &caller.candidate_id,
            &request.answer,
            request.question_number,
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// Handler for `POST /sessions/:id/answers/audio`.
///
/// The body is the raw recording; its MIME type comes from `Content-Type`.
async fn handle_submit_audio_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
    Query(query): Query<AudioAnswerQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AnswerResponse>, ApiError> {
    if body.is_empty() {
        return Err(ParleyError::validation("audio body is empty").into());
    }

    // Ownership is checked before paying for transcription.
    state
        .manager
        .get_session(&session_id, &caller.candidate_id)
        .await?;

    let mime_type = content_type(&headers).unwrap_or(DEFAULT_AUDIO_MIME);
    let transcript = state
        .transcriber
        .transcribe(&body, mime_type)
        .await
        .map_err(|e| {
            warn!(session_id = %session_id, error = %e, "Transcription failed");
            ParleyError::from(e)
        })?;
    info!(session_id = %session_id, transcript_len = transcript.len(), "Audio answer transcribed");

    let outcome = state
        .manager
        .submit_answer(
            &session_id,
            &caller.candidate_id,
            &transcript,
            query.question_number,
        )
        .await?;

    let mut response = AnswerResponse::from(outcome);
    response.transcript = Some(transcript);
    Ok(Json(response))
}

/// Handler for `POST /sessions/:id/next`.
async fn handle_next_question(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
) -> Result<Json<QuestionView>, ApiError> {
    Ok(Json(
        state
            .manager
            .advance_session(&session_id, &caller.candidate_id)
            .await?,
    ))
}

/// Handler for `POST /sessions/:id/stop`.
async fn handle_stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
) -> Result<Json<StopResponse>, ApiError> {
    let outcome = state
        .manager
        .stop_session(&session_id, &caller.candidate_id)
        .await?;
    Ok(Json(StopResponse {
        status: outcome.status,
        session: outcome.session,
    }))
}

/// Handler for `GET /sessions/:id/report`.
async fn handle_report(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format = query
        .format
        .as_deref()
        .map_or_else(|| "markdown".to_string(), str::to_lowercase);
    if format != "markdown" && format != "json" {
        return Err(ParleyError::validation(format!(
            "unknown report format '{format}': expected 'markdown' or 'json'"
        ))
        .into());
    }

    let report = state
        .manager
        .report(&session_id, &caller.candidate_id)
        .await?;

    let response = if format == "json" {
        let body = JsonGenerator::new(&report)
            .generate_pretty()
            .map_err(|e| ParleyError::persistence(format!("failed to render report: {e}")))?;
        ([(header::CONTENT_TYPE, "application/json")], body).into_response()
    } else {
        let body = MarkdownGenerator::new(&report).generate();
        ([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], body).into_response()
    };
    Ok(response)
}

/// Handler for `POST /resumes`.
async fn handle_extract_resume(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResumeResponse>, ApiError> {
    let text = state
        .extractor
        .extract(body.to_vec(), content_type(&headers))
        .await?;
    info!(candidate_id = %caller.candidate_id, text_len = text.len(), "Resume extracted");
    Ok(Json(ResumeResponse { text }))
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
