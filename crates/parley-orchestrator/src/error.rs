//! Error types for the Parley orchestrator.
//!
//! Every failure maps to one [`ErrorKind`], which is what clients see: the
//! HTTP layer turns the kind into a status code and the stream coordinator
//! mirrors it in `error` events.

use std::path::PathBuf;

use parley_gateway::{GatewayError, TranscriptionError};
use serde::Serialize;

/// A specialized `Result` type for Parley orchestrator operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Errors that can occur while running interview sessions.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your parley.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A request was missing a required value or carried an invalid one.
    #[error("{message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// The caller could not be authenticated or is not allowed to act.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Why the caller was rejected.
        message: String,
    },

    /// The candidate is not known.
    #[error("candidate not found: '{candidate_id}'")]
    CandidateNotFound {
        /// The unknown candidate id.
        candidate_id: String,
    },

    /// The session does not exist or is not owned by the caller.
    #[error("session not found: '{session_id}'")]
    SessionNotFound {
        /// The requested session id.
        session_id: String,
    },

    /// The request conflicts with the session's current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Which precondition failed.
        message: String,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// An AI call failed after exhausting its retries.
    #[error("upstream failure during {operation}: {message}")]
    Upstream {
        /// The gateway operation that failed.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// A resume document could not be turned into text.
    #[error("could not extract resume text: {message}\n\nSuggestion: Upload a text-based PDF or a plain-text resume")]
    Extraction {
        /// Description of the failure.
        message: String,
    },

    /// Audio could not be transcribed.
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// The session store failed to read or write.
    #[error("session store failure: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

/// Client-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input (400).
    Validation,
    /// Missing or invalid credentials (401).
    Unauthorized,
    /// Unknown candidate or session (404).
    NotFound,
    /// Request conflicts with session state (409).
    Conflict,
    /// Document could not be processed (422).
    Extraction,
    /// AI provider failure (502).
    Upstream,
    /// Speech-to-text failure (502).
    Transcription,
    /// Server-side failure (500).
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Extraction => write!(f, "extraction"),
            Self::Upstream => write!(f, "upstream"),
            Self::Transcription => write!(f, "transcription"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl ParleyError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `CandidateNotFound` error.
    #[must_use]
    pub fn candidate_not_found(candidate_id: impl Into<String>) -> Self {
        Self::CandidateNotFound {
            candidate_id: candidate_id.into(),
        }
    }

    /// Creates a new `SessionNotFound` error.
    #[must_use]
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Upstream` error for a failed gateway operation.
    #[must_use]
    pub fn upstream(operation: impl Into<String>, err: &GatewayError) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Creates a new `Extraction` error.
    #[must_use]
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Creates a new `Persistence` error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns the client-visible category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::CandidateNotFound { .. } | Self::SessionNotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::InvalidStateTransition { .. } => ErrorKind::Conflict,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Transcription(_) => ErrorKind::Transcription,
            Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. }
            | Self::Persistence { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// Returns whether the caller may retry the same request later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Upstream | ErrorKind::Transcription)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ParleyError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(ParleyError::unauthorized("x").kind(), ErrorKind::Unauthorized);
        assert_eq!(ParleyError::candidate_not_found("c").kind(), ErrorKind::NotFound);
        assert_eq!(ParleyError::session_not_found("s").kind(), ErrorKind::NotFound);
        assert_eq!(ParleyError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(
            ParleyError::invalid_transition("Completed", "InProgress").kind(),
            ErrorKind::Conflict
        );
        assert_eq!(ParleyError::extraction("x").kind(), ErrorKind::Extraction);
        assert_eq!(ParleyError::persistence("x").kind(), ErrorKind::Internal);
        assert_eq!(
            ParleyError::from(TranscriptionError::EmptyTranscript).kind(),
            ErrorKind::Transcription
        );
    }

    #[test]
    fn test_upstream_wraps_gateway_error() {
        let gateway = GatewayError::Exhausted {
            operation: "generate_question".into(),
            attempts: 5,
            last_error: "HTTP 503".into(),
        };
        let err = ParleyError::upstream("generate_question", &gateway);
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.is_transient());
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[test]
    fn test_kind_display_is_snake_case() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Upstream).unwrap(),
            r#""upstream""#
        );
    }

    #[test]
    fn test_config_errors_carry_suggestion() {
        let err = ParleyError::config_validation("maxQuestions must be greater than 0", "Set it");
        assert!(err.to_string().contains("Suggestion: Set it"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
