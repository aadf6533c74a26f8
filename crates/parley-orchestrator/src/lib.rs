//! Parley Interview Orchestrator
//!
//! Runs adaptive mock-interview sessions and serves them over HTTP, SSE and
//! WebSocket.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod manager;
pub mod resume;
pub mod session;
pub mod store;
pub mod stream;

pub use api::{
    create_router, AnswerRequest, AnswerResponse, ApiError, AppState, Caller, ErrorResponse,
    StartSessionRequest, StartSessionResponse, StopResponse,
};
pub use auth::{
    validator_from_config, CandidateDirectory, CredentialValidator, JwtValidator,
    PassthroughValidator, StaticDirectory,
};
pub use config::{
    AuthConfig, AuthMode, Config, DisconnectPolicy, GatewayConfig, SpeechConfig, StoreBackend,
    StoreConfig, StreamConfig,
};
pub use error::{ErrorKind, ParleyError, Result};
pub use manager::{AnswerOutcome, QuestionView, SessionManager, StartOutcome, StopOutcome};
pub use resume::{DocumentExtractor, ResumeExtractor};
pub use session::{Session, SessionStatus, SessionSummary, Turn};
pub use store::{FileStore, MemoryStore, SessionStore};
pub use stream::{SessionEvent, StreamHub};
