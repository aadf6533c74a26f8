//! The session manager: the only component that mutates sessions.
//!
//! Mutations of one session (`submit_answer`, `advance_session`,
//! `stop_session`) are serialized by a per-session async mutex held across
//! the whole read-modify-write-persist sequence. Events are published while
//! that lock is held, so the event order of a session equals its commit
//! order. Reads (`get_session`, `get_sessions`) go straight to the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use parley_gateway::{AiGateway, DisabledSpeech, Difficulty, FinalFeedback, SpeechSynthesizer};
use parley_report::Report;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::auth::{CandidateDirectory, StaticDirectory};
use crate::config::{Config, DisconnectPolicy};
use crate::error::{ParleyError, Result};
use crate::session::{Session, SessionStatus, SessionSummary, Turn};
use crate::store::SessionStore;
use crate::stream::{
    CompletePayload, FeedbackPayload, QuestionPayload, SessionEvent, StreamHub,
};

// ============================================================================
// Outcomes
// ============================================================================

/// A question as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question text.
    pub question: String,
    /// Question level.
    pub difficulty: Difficulty,
    /// 1-based question number.
    pub question_number: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// Spoken question, when speech is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Result of starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    /// New session id.
    pub session_id: String,
    /// Ordinal among the candidate's sessions.
    pub interview_number: u32,
    /// The first question.
    pub question: QuestionView,
}

/// Result of answering a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    /// Feedback on the answer.
    pub feedback: String,
    /// `true` when the answer completed the interview.
    pub done: bool,
    /// Number of the question that was answered.
    pub question_number: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// The next question, unless done.
    pub next: Option<QuestionView>,
    /// Final feedback, when done.
    pub final_feedback: Option<FinalFeedback>,
}

/// Result of stopping a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    /// Terminal status (`Stopped`, or `Completed` if it had already finished).
    pub status: SessionStatus,
    /// Summary of the terminal session.
    pub session: SessionSummary,
}

// ============================================================================
// SessionManager
// ============================================================================

/// Runs interview sessions.
pub struct SessionManager {
    config: Config,
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn AiGateway>,
    speech: Arc<dyn SpeechSynthesizer>,
    candidates: Arc<dyn CandidateDirectory>,
    hub: StreamHub,
    locks: LockMap,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A held keyed lock. Dropping it prunes the map entry when no other task
/// holds or waits for the same key.
struct KeyedGuard<'a> {
    locks: &'a LockMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_questions", &self.config.max_questions)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager with speech disabled and the candidate allow-list
    /// from `config`.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn SessionStore>, gateway: Arc<dyn AiGateway>) -> Self {
        let candidates = Arc::new(StaticDirectory::new(config.candidates.as_deref()));
        let hub = StreamHub::new(config.stream.channel_capacity);
        Self {
            config,
            store,
            gateway,
            speech: Arc::new(DisabledSpeech),
            candidates,
            hub,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `speech` to voice every question.
    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = speech;
        self
    }

    /// Replaces the candidate directory.
    #[must_use]
    pub fn with_candidates(mut self, candidates: Arc<dyn CandidateDirectory>) -> Self {
        self.candidates = candidates;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// What happens to a session when its last stream client disconnects.
    #[must_use]
    pub const fn disconnect_policy(&self) -> DisconnectPolicy {
        self.config.stream.on_disconnect
    }

    /// The event hub.
    #[must_use]
    pub const fn hub(&self) -> &StreamHub {
        &self.hub
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Creates a session and asks its first question at medium difficulty.
    ///
    /// Nothing is stored if question generation fails.
    ///
    /// # Errors
    ///
    /// `Validation` for missing inputs, `CandidateNotFound` for unknown
    /// candidates, `Upstream` when question generation fails.
    #[instrument(skip(self, resume_text), fields(resume_len = resume_text.len()))]
    pub async fn start_session(&self, candidate_id: &str, resume_text: &str) -> Result<StartOutcome> {
        let candidate_id = candidate_id.trim();
        let resume_text = resume_text.trim();
        if candidate_id.is_empty() {
            return Err(ParleyError::validation("candidateId is required"));
        }
        if resume_text.is_empty() {
            return Err(ParleyError::validation("resumeText is required"));
        }
        if !self.candidates.contains(candidate_id) {
            return Err(ParleyError::candidate_not_found(candidate_id));
        }

        let difficulty = Difficulty::Medium;
        let question = self
            .gateway
            .generate_question(resume_text, difficulty, &[])
            .await
            .map_err(|e| ParleyError::upstream("generate_question", &e))?;
        let audio_url = self.speech.synthesize(&question).await;

        // Serialize numbering per candidate so concurrent starts get distinct ordinals.
        let _numbering = self.acquire(&format!("candidate:{candidate_id}")).await;
        let prior = self.store.list_for_candidate(candidate_id).await?.len();
        let interview_number = u32::try_from(prior).unwrap_or(u32::MAX - 1) + 1;

        let mut session = Session::new(candidate_id, interview_number, resume_text);
        session.start(Turn::new(question, difficulty).with_audio(audio_url))?;
        self.store.insert(&session).await?;

        info!(
            session_id = %session.id,
            candidate_id = %candidate_id,
            interview_number,
            "Session started"
        );

        Ok(StartOutcome {
            session_id: session.id.clone(),
            interview_number,
            question: self.current_question(&session)?,
        })
    }

    /// Records an answer, analyzes it, and either asks the next question or
    /// completes the interview.
    ///
    /// `question_number`, when given, must name the open question.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty answer, `SessionNotFound` for missing or
    /// foreign sessions, `Conflict` when no matching question is open,
    /// `Upstream` when analysis (nothing persisted) or next-question
    /// generation (answer and feedback persisted) fails.
    #[instrument(skip(self, answer), fields(answer_len = answer.len()))]
    pub async fn submit_answer(
        &self,
        session_id: &str,
        candidate_id: &str,
        answer: &str,
        question_number: Option<u32>,
    ) -> Result<AnswerOutcome> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ParleyError::validation("answer must not be empty"));
        }

        let _guard = self.acquire(session_id).await;

        let mut session = self.load_owned(session_id, candidate_id).await?;
        let open_number = Self::require_open_turn(&session)?;
        if let Some(expected) = question_number {
            if expected != open_number {
                return Err(ParleyError::conflict(format!(
                    "question {expected} is not open (current question is {open_number})"
                )));
            }
        }
        let question = session
            .open_turn()
            .map(|turn| turn.question.clone())
            .unwrap_or_default();

        let analysis = match self.gateway.analyze_answer(&question, answer).await {
            Ok(analysis) => analysis,
            Err(e) => {
                let err = ParleyError::upstream("analyze_answer", &e);
                self.publish(&session.id, SessionEvent::error(&session.id, &err));
                return Err(err);
            }
        };

        session.record_answer(answer, &analysis.feedback)?;
        self.store.save(&session).await?;
        self.publish(
            &session.id,
            SessionEvent::Feedback(FeedbackPayload {
                session_id: session.id.clone(),
                question_number: open_number,
                feedback: analysis.feedback.clone(),
            }),
        );
        debug!(session_id = %session.id, question_number = open_number, signal = ?analysis.signal, "Answer recorded");

        let total_questions = self.config.max_questions;
        if session.turns.len() >= total_questions as usize {
            let final_feedback = self
                .gateway
                .generate_final_feedback(&session.transcript())
                .await;
            session.complete(final_feedback.clone())?;
            self.commit_terminal(&session).await?;
            info!(session_id = %session.id, feedback_kind = ?final_feedback.kind, "Session completed");

            return Ok(AnswerOutcome {
                feedback: analysis.feedback,
                done: true,
                question_number: open_number,
                total_questions,
                next: None,
                final_feedback: Some(final_feedback),
            });
        }

        let next_difficulty = self
            .config
            .difficulty_policy
            .next_difficulty(session.current_difficulty(), analysis.signal);

        match self.ask_next(&mut session, next_difficulty).await {
            Ok(next) => Ok(AnswerOutcome {
                feedback: analysis.feedback,
                done: false,
                question_number: open_number,
                total_questions,
                next: Some(next),
                final_feedback: None,
            }),
            Err(err) => {
                session.pending_difficulty = Some(next_difficulty);
                session.touch();
                self.store.save(&session).await?;
                self.publish(&session.id, SessionEvent::error(&session.id, &err));
                warn!(
                    session_id = %session.id,
                    difficulty = %next_difficulty,
                    error = %err,
                    "Next question owed after generation failure"
                );
                Err(err)
            }
        }
    }

    /// Generates the question owed after a failed generation.
    ///
    /// # Errors
    ///
    /// `Conflict` if the session is terminal or a question is already open,
    /// `Upstream` if generation fails again.
    #[instrument(skip(self))]
    pub async fn advance_session(&self, session_id: &str, candidate_id: &str) -> Result<QuestionView> {
        let _guard = self.acquire(session_id).await;

        let mut session = self.load_owned(session_id, candidate_id).await?;
        if session.status != SessionStatus::InProgress {
            return Err(ParleyError::conflict(format!("session is {}", session.status)));
        }
        if session.open_turn().is_some() {
            return Err(ParleyError::conflict(format!(
                "question {} is already open",
                session.question_number()
            )));
        }

        let difficulty = session
            .pending_difficulty
            .unwrap_or_else(|| session.current_difficulty());
        match self.ask_next(&mut session, difficulty).await {
            Ok(view) => Ok(view),
            Err(err) => {
                self.publish(&session.id, SessionEvent::error(&session.id, &err));
                Err(err)
            }
        }
    }

    /// Stops an in-progress session. Stopping a terminal session returns its
    /// existing summary unchanged.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for missing or foreign sessions.
    #[instrument(skip(self))]
    pub async fn stop_session(&self, session_id: &str, candidate_id: &str) -> Result<StopOutcome> {
        let _guard = self.acquire(session_id).await;

        let mut session = self.load_owned(session_id, candidate_id).await?;
        if !session.is_terminal() {
            session.stop()?;
            self.commit_terminal(&session).await?;
            info!(session_id = %session.id, answered = session.answered_count(), "Session stopped");
        }

        Ok(StopOutcome {
            status: session.status,
            session: session.summary(self.config.max_questions),
        })
    }

    /// The candidate's sessions, newest first.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty candidate id, `Persistence` on store failure.
    pub async fn get_sessions(&self, candidate_id: &str) -> Result<Vec<SessionSummary>> {
        if candidate_id.trim().is_empty() {
            return Err(ParleyError::validation("candidateId is required"));
        }
        let mut sessions = self.store.list_for_candidate(candidate_id).await?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions
            .iter()
            .map(|s| s.summary(self.config.max_questions))
            .collect())
    }

    /// The full session, including every turn.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for missing or foreign sessions.
    pub async fn get_session(&self, session_id: &str, candidate_id: &str) -> Result<Session> {
        self.load_owned(session_id, candidate_id).await
    }

    /// Transcript report of a session.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for missing or foreign sessions.
    pub async fn report(&self, session_id: &str, candidate_id: &str) -> Result<Report> {
        self.load_owned(session_id, candidate_id)
            .await?
            .to_report(self.config.max_questions)
    }

    /// Events for a session from now on, ending after `complete` or `error`.
    ///
    /// A terminal session yields a single `complete` event.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for missing or foreign sessions.
    pub async fn open_stream(
        &self,
        session_id: &str,
        candidate_id: &str,
    ) -> Result<BoxStream<'static, SessionEvent>> {
        // Subscribe before loading so no commit falls between the two.
        let mut receiver = self.hub.subscribe(session_id);
        let session = match self.load_owned(session_id, candidate_id).await {
            Ok(session) => session,
            Err(err) => {
                drop(receiver);
                self.hub.release(session_id);
                return Err(err);
            }
        };

        if session.is_terminal() {
            drop(receiver);
            self.hub.release(session_id);
            return Ok(stream::iter([Self::complete_event(&session)]).boxed());
        }

        let session_id = session.id;
        let events = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let is_final = event.is_final();
                        yield event;
                        if is_final {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(session_id = %session_id, missed = n, "Stream subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(events.boxed())
    }

    /// Applies the disconnect policy once a session has no stream clients.
    pub async fn handle_disconnect(&self, session_id: &str, candidate_id: &str) {
        if self.disconnect_policy() != DisconnectPolicy::Stop {
            return;
        }
        if self.hub.receiver_count(session_id) > 0 {
            debug!(session_id = %session_id, "Other clients still attached");
            return;
        }
        match self.stop_session(session_id, candidate_id).await {
            Ok(outcome) => info!(
                session_id = %session_id,
                status = %outcome.status,
                "Stopped session after client disconnect"
            ),
            Err(err) => warn!(session_id = %session_id, error = %err, "Disconnect stop failed"),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn acquire(&self, key: &str) -> KeyedGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn publish(&self, session_id: &str, event: SessionEvent) {
        let delivered = self.hub.publish(session_id, event);
        debug!(session_id = %session_id, delivered, "Event published");
    }

    async fn load_owned(&self, session_id: &str, candidate_id: &str) -> Result<Session> {
        match self.store.get(session_id).await? {
            Some(session) if session.candidate_id == candidate_id => Ok(session),
            _ => Err(ParleyError::session_not_found(session_id)),
        }
    }

    fn require_open_turn(session: &Session) -> Result<u32> {
        if session.status != SessionStatus::InProgress {
            return Err(ParleyError::conflict(format!("session is {}", session.status)));
        }
        if session.open_turn().is_none() {
            let message = if session.pending_difficulty.is_some() {
                "the next question has not been generated yet; request it with /next"
            } else {
                "question already answered"
            };
            return Err(ParleyError::conflict(message));
        }
        Ok(session.question_number())
    }

    /// Generates, voices, stores and announces the next question.
    async fn ask_next(&self, session: &mut Session, difficulty: Difficulty) -> Result<QuestionView> {
        let question = self
            .generate_distinct(&session.resume_text, difficulty, &session.asked_questions())
            .await?;
        let audio_url = self.speech.synthesize(&question).await;

        session.push_turn(
            Turn::new(question, difficulty).with_audio(audio_url),
            self.config.max_questions,
        )?;
        self.store.save(session).await?;

        let view = self.current_question(session)?;
        self.publish(
            &session.id,
            SessionEvent::Question(QuestionPayload {
                session_id: session.id.clone(),
                question_number: view.question_number,
                total_questions: view.total_questions,
                question: view.question.clone(),
                difficulty: view.difficulty,
                audio_url: view.audio_url.clone(),
            }),
        );
        Ok(view)
    }

    /// Asks for a question, regenerating exact repeats of earlier questions
    /// up to the configured number of times.
    async fn generate_distinct(
        &self,
        resume_text: &str,
        difficulty: Difficulty,
        asked: &[String],
    ) -> Result<String> {
        let mut question = self.request_question(resume_text, difficulty, asked).await?;
        let mut regenerations = 0;
        while asked.contains(&question) && regenerations < self.config.duplicate_retries {
            regenerations += 1;
            debug!(regenerations, "Regenerating duplicate question");
            question = self.request_question(resume_text, difficulty, asked).await?;
        }
        if asked.contains(&question) {
            warn!(regenerations, "Accepting duplicate question after retries");
        }
        Ok(question)
    }

    async fn request_question(
        &self,
        resume_text: &str,
        difficulty: Difficulty,
        asked: &[String],
    ) -> Result<String> {
        self.gateway
            .generate_question(resume_text, difficulty, asked)
            .await
            .map_err(|e| ParleyError::upstream("generate_question", &e))
    }

    fn current_question(&self, session: &Session) -> Result<QuestionView> {
        let turn = session
            .turns
            .last()
            .ok_or_else(|| ParleyError::invalid_transition(session.status.as_str(), "question"))?;
        Ok(QuestionView {
            question: turn.question.clone(),
            difficulty: turn.difficulty,
            question_number: session.question_number(),
            total_questions: self.config.max_questions,
            audio_url: turn.audio_url.clone(),
        })
    }

    fn complete_event(session: &Session) -> SessionEvent {
        SessionEvent::Complete(CompletePayload {
            session_id: session.id.clone(),
            status: session.status,
            final_feedback: session.final_feedback.clone(),
        })
    }

    /// Persists a terminal session, announces it and retires its channel.
    async fn commit_terminal(&self, session: &Session) -> Result<()> {
        self.store.save(session).await?;
        self.publish(&session.id, Self::complete_event(session));
        self.hub.close(&session.id);
        Ok(())
    }
}
