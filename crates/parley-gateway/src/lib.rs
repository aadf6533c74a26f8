//! Parley AI Gateway
//!
//! Uniform access to the generative-AI services behind an interview:
//! question generation, answer analysis, final feedback synthesis, and the
//! optional speech services (text-to-speech, speech-to-text).
//!
//! The gateway owns two policies the rest of the system relies on:
//!
//! - **Retry/timeout**: every upstream call is bounded by a timeout and retried
//!   with exponential backoff (see [`RetryPolicy`]).
//! - **Normalization**: loosely structured model output is turned into
//!   well-formed values. Formatting slips never fail an interview turn
//!   (see [`normalize`]).

pub mod gateway;
pub mod gemini;
pub mod normalize;
pub mod retry;
pub mod speech;

pub use gateway::ModelGateway;
pub use gemini::GeminiClient;
pub use retry::RetryPolicy;
pub use speech::{
    AudioStore, DisabledSpeech, DisabledTranscriber, ModelSpeech, ModelTranscriber, SpeechAudio,
    SpeechModel, SpeechSynthesizer, Transcriber, TranscriptionError,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by upstream AI calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The provider answered with an error status or could not be reached.
    #[error("upstream {kind} error{}: {message}\n\nSuggestion: {}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default(), .kind.suggestion())]
    Upstream {
        /// Classification of the failure.
        kind: UpstreamErrorKind,
        /// HTTP status returned by the provider, if any.
        status: Option<u16>,
        /// Provider message.
        message: String,
    },

    /// A single attempt exceeded its time budget.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Name of the gateway operation.
        operation: String,
        /// Timeout applied to the attempt.
        timeout_secs: u64,
    },

    /// The provider returned no usable text.
    #[error("{operation} returned an empty response")]
    EmptyResponse {
        /// Name of the gateway operation.
        operation: String,
    },

    /// The provider returned a body that does not match its documented shape.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// All attempts failed.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Name of the gateway operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },

    /// The gateway is not configured to reach the provider.
    #[error("gateway misconfigured: {0}\n\nSuggestion: Set the API key environment variable named in parley.json")]
    Configuration(String),

    /// Local I/O failure (for example writing synthesized audio).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Creates an upstream error classified from an HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            kind: UpstreamErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates a network-level upstream error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Upstream {
            kind: UpstreamErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    /// Creates an empty-response error for the given operation.
    #[must_use]
    pub fn empty_response(operation: impl Into<String>) -> Self {
        Self::EmptyResponse {
            operation: operation.into(),
        }
    }

    /// Returns whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { kind, .. } => kind.is_transient(),
            Self::Timeout { .. } | Self::EmptyResponse { .. } | Self::MalformedResponse(_) => true,
            Self::Exhausted { .. } | Self::Configuration(_) | Self::Io(_) => false,
        }
    }
}

/// Categories of upstream provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Invalid or missing credentials.
    Authentication,
    /// Quota or rate limit exceeded.
    RateLimit,
    /// Provider-side failure (5xx).
    Server,
    /// Connection or transport failure.
    Network,
    /// Anything else.
    Other,
}

impl UpstreamErrorKind {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }

    /// Returns whether failures of this kind are worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Network)
    }

    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the AI provider API key",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the AI provider may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the AI provider's status page",
        }
    }
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ============================================================================
// Difficulty
// ============================================================================

/// Difficulty level of an interview question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Introductory question.
    Easy,
    /// Default level; every interview opens here.
    #[default]
    Medium,
    /// Advanced question.
    Hard,
}

impl Difficulty {
    /// Returns the lowercase name used in prompts and payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Parses a level name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    /// One step up, saturating at `Hard`.
    #[must_use]
    pub const fn harder(self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            Self::Medium | Self::Hard => Self::Hard,
        }
    }

    /// One step down, saturating at `Easy`.
    #[must_use]
    pub const fn easier(self) -> Self {
        match self {
            Self::Hard => Self::Medium,
            Self::Medium | Self::Easy => Self::Easy,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse directional signal extracted from an answer analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultySignal {
    /// Ask a harder question next.
    Harder,
    /// Keep the level.
    Same,
    /// Ask an easier question next.
    Easier,
    /// The analysis named a level explicitly.
    Level(Difficulty),
}

/// How a [`DifficultySignal`] is turned into the next question's level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DifficultyPolicy {
    /// HARDER maps to hard, SAME to medium, EASIER to easy, regardless of the
    /// current level.
    #[default]
    Absolute,
    /// HARDER and EASIER move one step from the current level; SAME keeps it.
    Ladder,
}

impl DifficultyPolicy {
    /// Parses a policy name, ignoring case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "absolute" => Some(Self::Absolute),
            "ladder" => Some(Self::Ladder),
            _ => None,
        }
    }

    /// Computes the difficulty of the next question.
    ///
    /// Total over every `(current, signal)` pair.
    #[must_use]
    pub const fn next_difficulty(self, current: Difficulty, signal: DifficultySignal) -> Difficulty {
        match (self, signal) {
            (_, DifficultySignal::Level(level)) => level,
            (Self::Absolute, DifficultySignal::Harder) => Difficulty::Hard,
            (Self::Absolute, DifficultySignal::Same) => Difficulty::Medium,
            (Self::Absolute, DifficultySignal::Easier) => Difficulty::Easy,
            (Self::Ladder, DifficultySignal::Harder) => current.harder(),
            (Self::Ladder, DifficultySignal::Same) => current,
            (Self::Ladder, DifficultySignal::Easier) => current.easier(),
        }
    }
}

impl<'de> Deserialize<'de> for DifficultyPolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid difficulty policy '{s}': expected one of 'absolute', 'ladder'"
            ))
        })
    }
}

impl Serialize for DifficultyPolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Absolute => "absolute",
            Self::Ladder => "ladder",
        };
        serializer.serialize_str(s)
    }
}

// ============================================================================
// Gateway values
// ============================================================================

/// Result of analyzing one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerAnalysis {
    /// Feedback shown to the candidate.
    pub feedback: String,
    /// Direction for the next question.
    pub signal: DifficultySignal,
}

/// Where a [`FinalFeedback`] value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Parsed from the model's summary.
    #[default]
    Generated,
    /// The model's summary was unusable; fixed text was substituted.
    Fallback,
    /// The interview was stopped before completion.
    EarlyStop,
}

/// Overall interview feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalFeedback {
    /// What the candidate did well.
    pub strengths: String,
    /// Where the candidate struggled.
    pub weaknesses: String,
    /// How to improve.
    pub suggestions: String,
    /// Provenance of this feedback.
    #[serde(default)]
    pub kind: FeedbackKind,
}

impl FinalFeedback {
    /// Creates generated feedback.
    #[must_use]
    pub fn new(
        strengths: impl Into<String>,
        weaknesses: impl Into<String>,
        suggestions: impl Into<String>,
    ) -> Self {
        Self {
            strengths: strengths.into(),
            weaknesses: weaknesses.into(),
            suggestions: suggestions.into(),
            kind: FeedbackKind::Generated,
        }
    }

    /// Fixed feedback used when the model's summary cannot be used.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            strengths: "Automatic summary unavailable. You completed every question of the interview."
                .to_string(),
            weaknesses: "Automatic summary unavailable. Review the feedback recorded for each answer."
                .to_string(),
            suggestions: "1. Revisit the questions where feedback asked for more depth\n2. Practice explaining your solutions out loud"
                .to_string(),
            kind: FeedbackKind::Fallback,
        }
    }

    /// Placeholder recorded when an interview is stopped early.
    #[must_use]
    pub fn early_stop() -> Self {
        Self {
            strengths: "Not assessed.".to_string(),
            weaknesses: "Interview was stopped before completion.".to_string(),
            suggestions: "Complete the full interview to receive feedback.".to_string(),
            kind: FeedbackKind::EarlyStop,
        }
    }
}

/// One answered question, as sent to the final feedback prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    /// Question text.
    pub question: String,
    /// Difficulty the question was asked at.
    pub difficulty: Difficulty,
    /// Candidate answer.
    pub answer: String,
    /// Per-answer feedback.
    pub feedback: String,
}

// ============================================================================
// Traits
// ============================================================================

/// A text-completion model.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Completes a single prompt, returning the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;
}

/// The interview-facing AI operations.
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Generates one question at `difficulty`, avoiding `asked`.
    async fn generate_question(
        &self,
        resume_text: &str,
        difficulty: Difficulty,
        asked: &[String],
    ) -> Result<String, GatewayError>;

    /// Produces feedback for an answer and a direction for the next question.
    async fn analyze_answer(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<AnswerAnalysis, GatewayError>;

    /// Summarizes a full interview. Never fails; falls back to fixed text.
    async fn generate_final_feedback(&self, transcript: &[TranscriptEntry]) -> FinalFeedback;
}
