//! Parley Report Generation
//!
//! Transcript reports for interview sessions. Reports can be serialized to
//! JSON for programmatic access or rendered to Markdown for the candidate.
//!
//! # Types
//!
//! - [`Report`] - A full session transcript with summary and final feedback
//! - [`ReportSummary`] - Status, progress, timing and difficulty path
//! - [`QuestionRecord`] - One question with its answer and feedback
//! - [`FeedbackSection`] - End-of-interview feedback
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use parley_report::{MarkdownGenerator, QuestionRecord, Report, ReportStatus, ReportSummary};
//!
//! let report = Report::builder()
//!     .session("3f1c", "alice", 1)
//!     .summary(ReportSummary::new(ReportStatus::InProgress, 5, Utc::now()))
//!     .question(QuestionRecord::new(1, "What is a mutex?", "medium"))
//!     .build()
//!     .unwrap();
//!
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("What is a mutex?"));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Report Status (local copy to avoid cross-crate dependency)
// ============================================================================

/// Status of the interview session when the report was generated.
///
/// This mirrors the orchestrator's session status so this crate stays free of
/// orchestrator dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Interview is still running.
    #[default]
    InProgress,
    /// Every question was answered.
    Completed,
    /// Interview was stopped early.
    Stopped,
}

impl ReportStatus {
    /// Returns `true` if the interview has ended.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }

    /// Returns a human-readable description of the status.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InProgress => "Interview in progress",
            Self::Completed => "Interview completed",
            Self::Stopped => "Interview stopped early",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Complete interview transcript report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    /// Session identifier.
    pub session_id: String,

    /// Candidate the session belongs to.
    pub candidate_id: String,

    /// Ordinal of this interview among the candidate's sessions.
    pub interview_number: u32,

    /// High-level summary.
    pub summary: ReportSummary,

    /// Questions in the order they were asked.
    pub questions: Vec<QuestionRecord>,

    /// End-of-interview feedback, once the interview has ended.
    pub final_feedback: Option<FeedbackSection>,
}

impl Report {
    /// Creates a new report builder.
    #[must_use]
    pub fn builder() -> ReportBuilder {
        ReportBuilder::default()
    }

    /// Serializes the report to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Returns how many questions were asked at each difficulty.
    #[must_use]
    pub fn difficulty_counts(&self) -> DifficultyCounts {
        let mut counts = DifficultyCounts::default();
        for question in &self.questions {
            match question.difficulty.as_str() {
                "easy" => counts.easy += 1,
                "hard" => counts.hard += 1,
                _ => counts.medium += 1,
            }
        }
        counts
    }

    /// Returns the difficulty of each question in order.
    #[must_use]
    pub fn difficulty_path(&self) -> Vec<&str> {
        self.questions
            .iter()
            .map(|q| q.difficulty.as_str())
            .collect()
    }
}

/// Question counts by difficulty level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DifficultyCounts {
    /// Number of easy questions.
    pub easy: usize,
    /// Number of medium questions.
    pub medium: usize,
    /// Number of hard questions.
    pub hard: usize,
}

impl DifficultyCounts {
    /// Returns the total number of questions.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.easy + self.medium + self.hard
    }
}

// ============================================================================
// ReportBuilder
// ============================================================================

/// Builder for constructing [`Report`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    session_id: Option<String>,
    candidate_id: String,
    interview_number: u32,
    summary: Option<ReportSummary>,
    questions: Vec<QuestionRecord>,
    final_feedback: Option<FeedbackSection>,
}

impl ReportBuilder {
    /// Sets the session identity.
    #[must_use]
    pub fn session(
        mut self,
        session_id: impl Into<String>,
        candidate_id: impl Into<String>,
        interview_number: u32,
    ) -> Self {
        self.session_id = Some(session_id.into());
        self.candidate_id = candidate_id.into();
        self.interview_number = interview_number;
        self
    }

    /// Sets the report summary.
    #[must_use]
    pub fn summary(mut self, summary: ReportSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Adds a question record.
    #[must_use]
    pub fn question(mut self, question: QuestionRecord) -> Self {
        self.questions.push(question);
        self
    }

    /// Sets all question records at once.
    #[must_use]
    pub fn questions(mut self, questions: Vec<QuestionRecord>) -> Self {
        self.questions = questions;
        self
    }

    /// Sets the final feedback.
    #[must_use]
    pub fn final_feedback(mut self, feedback: FeedbackSection) -> Self {
        self.final_feedback = Some(feedback);
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the session id or summary is
    /// missing, or if question numbers are not `1..=n` in order.
    pub fn build(self) -> Result<Report> {
        let session_id = self
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ReportError::InvalidData("session id is required".to_string()))?;
        let summary = self
            .summary
            .ok_or_else(|| ReportError::InvalidData("summary is required".to_string()))?;

        for (index, question) in self.questions.iter().enumerate() {
            if question.number as usize != index + 1 {
                return Err(ReportError::InvalidData(format!(
                    "question {} is out of order (expected {})",
                    question.number,
                    index + 1
                )));
            }
        }

        Ok(Report {
            session_id,
            candidate_id: self.candidate_id,
            interview_number: self.interview_number,
            summary,
            questions: self.questions,
            final_feedback: self.final_feedback,
        })
    }
}

// ============================================================================
// ReportSummary
// ============================================================================

/// High-level summary of an interview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Session status.
    pub status: ReportStatus,

    /// Number of questions in a complete interview.
    pub max_questions: u32,

    /// When the interview started.
    pub started_at: DateTime<Utc>,

    /// When the interview ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReportSummary {
    /// Creates a summary for an interview started at `started_at`.
    #[must_use]
    pub const fn new(status: ReportStatus, max_questions: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            status,
            max_questions,
            started_at,
            ended_at: None,
        }
    }

    /// Sets the end time.
    #[must_use]
    pub const fn ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    /// Elapsed seconds between start and end (or `now` for running interviews).
    #[must_use]
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> u64 {
        let end = self.ended_at.unwrap_or(now);
        u64::try_from((end - self.started_at).num_seconds()).unwrap_or(0)
    }
}

// ============================================================================
// QuestionRecord
// ============================================================================

/// One asked question with the candidate's answer and its feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// 1-based position in the interview.
    pub number: u32,
    /// Question text.
    pub question: String,
    /// Difficulty name (`easy`, `medium`, `hard`).
    pub difficulty: String,
    /// Candidate answer, if given.
    pub answer: Option<String>,
    /// Feedback on the answer, if analyzed.
    pub feedback: Option<String>,
}

impl QuestionRecord {
    /// Creates an unanswered question record.
    #[must_use]
    pub fn new(number: u32, question: impl Into<String>, difficulty: impl Into<String>) -> Self {
        Self {
            number,
            question: question.into(),
            difficulty: difficulty.into(),
            answer: None,
            feedback: None,
        }
    }

    /// Records the answer and its feedback.
    #[must_use]
    pub fn answered(mut self, answer: impl Into<String>, feedback: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self.feedback = Some(feedback.into());
        self
    }

    /// Returns `true` if the candidate answered this question.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.answer.as_deref().is_some_and(|a| !a.is_empty())
    }
}

// ============================================================================
// FeedbackSection
// ============================================================================

/// End-of-interview feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSection {
    /// What went well.
    pub strengths: String,
    /// What needs work.
    pub weaknesses: String,
    /// How to improve.
    pub suggestions: String,
    /// Where the feedback came from (`generated`, `fallback`, `early_stop`).
    pub source: String,
}

impl FeedbackSection {
    /// Creates a feedback section.
    #[must_use]
    pub fn new(
        strengths: impl Into<String>,
        weaknesses: impl Into<String>,
        suggestions: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            strengths: strengths.into(),
            weaknesses: weaknesses.into(),
            suggestions: suggestions.into(),
            source: source.into(),
        }
    }

    /// Returns `true` if the feedback was produced by the assessment model.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.source == "generated"
    }
}
