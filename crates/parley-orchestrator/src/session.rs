//! Interview session state.
//!
//! A [`Session`] is one interview attempt: an ordered list of [`Turn`]s plus
//! the lifecycle status. Only the session manager mutates sessions; the
//! methods here enforce the per-session invariants (one open turn at most,
//! always last; one answer per turn; nothing changes once terminal).

use chrono::{DateTime, Utc};
use parley_gateway::{Difficulty, FinalFeedback, TranscriptEntry};
use parley_report::{FeedbackSection, QuestionRecord, Report, ReportStatus, ReportSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParleyError, Result};

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of a session.
///
/// `NotStarted -> InProgress` is the only entry transition. `Completed` and
/// `Stopped` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Created but no question asked yet.
    #[default]
    NotStarted,
    /// Questions are being asked and answered.
    InProgress,
    /// Every question was answered.
    Completed,
    /// Stopped by the candidate before completion.
    Stopped,
}

impl SessionStatus {
    /// Returns `true` for `Completed` and `Stopped`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }

    /// Returns the status name as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Turn
// ============================================================================

/// One question with its answer and feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Question text.
    pub question: String,

    /// Level the question was asked at.
    pub difficulty: Difficulty,

    /// Candidate answer; empty while the turn is open.
    #[serde(default)]
    pub answer: String,

    /// Feedback on the answer.
    #[serde(default)]
    pub feedback: String,

    /// URL of the spoken question, when speech is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    /// When the question was asked.
    pub asked_at: DateTime<Utc>,

    /// When the answer was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

impl Turn {
    /// Creates an open turn asked now.
    #[must_use]
    pub fn new(question: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            question: question.into(),
            difficulty,
            answer: String::new(),
            feedback: String::new(),
            audio_url: None,
            asked_at: Utc::now(),
            answered_at: None,
        }
    }

    /// Attaches the URL of the spoken question.
    #[must_use]
    pub fn with_audio(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = audio_url;
        self
    }

    /// Returns `true` while the turn awaits an answer.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.answer.is_empty()
    }
}

// ============================================================================
// Session
// ============================================================================

/// One interview attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session id (UUID v4).
    pub id: String,

    /// Owning candidate.
    pub candidate_id: String,

    /// 1-based ordinal among the candidate's sessions.
    pub interview_number: u32,

    /// Resume snapshot used for every question.
    pub resume_text: String,

    /// Lifecycle status.
    pub status: SessionStatus,

    /// Turns in question order.
    pub turns: Vec<Turn>,

    /// Difficulty owed to the next question after a failed generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_difficulty: Option<Difficulty>,

    /// Present once the session is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<FinalFeedback>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Last mutation time.
    pub updated_at: DateTime<Utc>,

    /// Set once on transition to `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set once on transition to `Stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a `NotStarted` session with a fresh id.
    #[must_use]
    pub fn new(
        candidate_id: impl Into<String>,
        interview_number: u32,
        resume_text: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            candidate_id: candidate_id.into(),
            interview_number,
            resume_text: resume_text.into(),
            status: SessionStatus::NotStarted,
            turns: Vec::new(),
            pending_difficulty: None,
            final_feedback: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            stopped_at: None,
        }
    }

    /// Returns `true` if the session is `Completed` or `Stopped`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Updates `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Moves `NotStarted -> InProgress` with the first question.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the session is `NotStarted`.
    pub fn start(&mut self, first: Turn) -> Result<()> {
        if self.status != SessionStatus::NotStarted {
            return Err(ParleyError::invalid_transition(
                self.status.as_str(),
                SessionStatus::InProgress.as_str(),
            ));
        }
        self.status = SessionStatus::InProgress;
        self.turns.push(first);
        self.touch();
        Ok(())
    }

    /// The open turn, if any. Only the last turn can be open.
    #[must_use]
    pub fn open_turn(&self) -> Option<&Turn> {
        self.turns.last().filter(|turn| turn.is_open())
    }

    /// 1-based number of the latest question (0 before the first).
    #[must_use]
    pub fn question_number(&self) -> u32 {
        u32::try_from(self.turns.len()).unwrap_or(u32::MAX)
    }

    /// Every question asked so far, in order.
    #[must_use]
    pub fn asked_questions(&self) -> Vec<String> {
        self.turns.iter().map(|turn| turn.question.clone()).collect()
    }

    /// Difficulty of the latest question (medium before the first).
    #[must_use]
    pub fn current_difficulty(&self) -> Difficulty {
        self.turns
            .last()
            .map_or(Difficulty::Medium, |turn| turn.difficulty)
    }

    /// Number of answered turns.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.turns.iter().filter(|turn| !turn.is_open()).count()
    }

    /// Writes the answer and its feedback into the open turn.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the session is not in progress or no turn is
    /// open, and `Validation` for an empty answer.
    pub fn record_answer(
        &mut self,
        answer: impl Into<String>,
        feedback: impl Into<String>,
    ) -> Result<()> {
        let answer = answer.into();
        if answer.trim().is_empty() {
            return Err(ParleyError::validation("answer must not be empty"));
        }
        self.ensure_in_progress()?;
        let turn = self
            .turns
            .last_mut()
            .filter(|turn| turn.is_open())
            .ok_or_else(|| ParleyError::conflict("no open question to answer"))?;
        turn.answer = answer;
        turn.feedback = feedback.into();
        turn.answered_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Appends a new open turn.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the session is not in progress, a turn is still
    /// open, or `max_questions` turns already exist.
    pub fn push_turn(&mut self, turn: Turn, max_questions: u32) -> Result<()> {
        self.ensure_in_progress()?;
        if self.open_turn().is_some() {
            return Err(ParleyError::conflict("a question is already open"));
        }
        if self.turns.len() >= max_questions as usize {
            return Err(ParleyError::conflict(format!(
                "session already has {max_questions} questions"
            )));
        }
        self.turns.push(turn);
        self.pending_difficulty = None;
        self.touch();
        Ok(())
    }

    /// Moves `InProgress -> Completed` with the final feedback.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the session is `InProgress`.
    pub fn complete(&mut self, feedback: FinalFeedback) -> Result<()> {
        self.transition(SessionStatus::Completed)?;
        self.final_feedback = Some(feedback);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Moves `InProgress -> Stopped` with the early-stop placeholder feedback.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the session is `InProgress`.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(SessionStatus::Stopped)?;
        self.final_feedback = Some(FinalFeedback::early_stop());
        self.pending_difficulty = None;
        self.stopped_at = Some(self.updated_at);
        Ok(())
    }

    fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status != SessionStatus::InProgress {
            return Err(ParleyError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn ensure_in_progress(&self) -> Result<()> {
        if self.status == SessionStatus::InProgress {
            Ok(())
        } else {
            Err(ParleyError::conflict(format!(
                "session is {}",
                self.status
            )))
        }
    }

    /// Answered turns in the shape the final feedback prompt expects.
    #[must_use]
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.turns
            .iter()
            .filter(|turn| !turn.is_open())
            .map(|turn| TranscriptEntry {
                question: turn.question.clone(),
                difficulty: turn.difficulty,
                answer: turn.answer.clone(),
                feedback: turn.feedback.clone(),
            })
            .collect()
    }

    /// Condensed view for listings.
    #[must_use]
    pub fn summary(&self, max_questions: u32) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            candidate_id: self.candidate_id.clone(),
            interview_number: self.interview_number,
            status: self.status,
            questions_asked: self.question_number(),
            questions_answered: u32::try_from(self.answered_count()).unwrap_or(u32::MAX),
            total_questions: max_questions,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at: self.completed_at.or(self.stopped_at),
            final_feedback: self.final_feedback.clone(),
        }
    }

    /// Builds a transcript report.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be assembled.
    pub fn to_report(&self, max_questions: u32) -> Result<Report> {
        let status = match self.status {
            SessionStatus::Completed => ReportStatus::Completed,
            SessionStatus::Stopped => ReportStatus::Stopped,
            SessionStatus::NotStarted | SessionStatus::InProgress => ReportStatus::InProgress,
        };
        let mut summary = ReportSummary::new(status, max_questions, self.created_at);
        if let Some(ended_at) = self.completed_at.or(self.stopped_at) {
            summary = summary.ended_at(ended_at);
        }

        let questions = self
            .turns
            .iter()
            .zip(1..)
            .map(|(turn, number)| {
                let record = QuestionRecord::new(number, &turn.question, turn.difficulty.as_str());
                if turn.is_open() {
                    record
                } else {
                    record.answered(&turn.answer, &turn.feedback)
                }
            })
            .collect();

        let mut builder = Report::builder()
            .session(&self.id, &self.candidate_id, self.interview_number)
            .summary(summary)
            .questions(questions);
        if let Some(feedback) = &self.final_feedback {
            let source = serde_json::to_value(feedback.kind)?
                .as_str()
                .unwrap_or("generated")
                .to_string();
            builder = builder.final_feedback(FeedbackSection::new(
                &feedback.strengths,
                &feedback.weaknesses,
                &feedback.suggestions,
                source,
            ));
        }

        builder
            .build()
            .map_err(|err| ParleyError::persistence(format!("failed to build report: {err}")))
    }
}

// ============================================================================
// SessionSummary
// ============================================================================

/// Listing entry for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Owning candidate.
    pub candidate_id: String,
    /// 1-based ordinal among the candidate's sessions.
    pub interview_number: u32,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Questions asked so far.
    pub questions_asked: u32,
    /// Questions answered so far.
    pub questions_answered: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Completion or stop time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Final feedback once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<FinalFeedback>,
}
