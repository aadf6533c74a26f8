//! Prompting gateway over a [`TextModel`].
//!
//! [`ModelGateway`] turns the interview operations into prompts, runs them
//! through the retry policy, and normalizes the responses.
//!
//! # Example
//!
//! ```no_run
//! use parley_gateway::{AiGateway, Difficulty, GeminiClient, ModelGateway, RetryPolicy};
//!
//! # async fn example() -> Result<(), parley_gateway::GatewayError> {
//! let client = GeminiClient::new("api-key", "gemini-2.5-flash");
//! let gateway = ModelGateway::new(client, RetryPolicy::default());
//! let question = gateway
//!     .generate_question("Rust developer, 5 years", Difficulty::Medium, &[])
//!     .await?;
//! println!("{question}");
//! # Ok(())
//! # }
//! ```

use std::fmt::Write as _;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::normalize::{clean_question, parse_analysis, parse_final_feedback};
use crate::{
    AiGateway, AnswerAnalysis, Difficulty, FinalFeedback, GatewayError, RetryPolicy, TextModel,
    TranscriptEntry,
};

/// An [`AiGateway`] backed by a text-completion model.
#[derive(Debug, Clone)]
pub struct ModelGateway<M> {
    model: M,
    retry: RetryPolicy,
}

impl<M: TextModel> ModelGateway<M> {
    /// Creates a gateway using the given model and retry policy.
    #[must_use]
    pub const fn new(model: M, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[async_trait]
impl<M: TextModel> AiGateway for ModelGateway<M> {
    #[instrument(skip(self, resume_text, asked), fields(asked = asked.len()))]
    async fn generate_question(
        &self,
        resume_text: &str,
        difficulty: Difficulty,
        asked: &[String],
    ) -> Result<String, GatewayError> {
        let prompt = question_prompt(resume_text, difficulty, asked);
        let question = self
            .retry
            .run("generate_question", || async {
                let raw = self.model.complete(&prompt).await?;
                clean_question(&raw).ok_or_else(|| GatewayError::empty_response("generate_question"))
            })
            .await?;
        debug!(chars = question.len(), "Generated question");
        Ok(question)
    }

    #[instrument(skip_all)]
    async fn analyze_answer(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<AnswerAnalysis, GatewayError> {
        let prompt = analysis_prompt(question, answer);
        let raw = self
            .retry
            .run("analyze_answer", || async {
                let raw = self.model.complete(&prompt).await?;
                if raw.trim().is_empty() {
                    Err(GatewayError::empty_response("analyze_answer"))
                } else {
                    Ok(raw)
                }
            })
            .await?;
        let analysis = parse_analysis(&raw);
        debug!(signal = ?analysis.signal, "Analyzed answer");
        Ok(analysis)
    }

    #[instrument(skip_all, fields(turns = transcript.len()))]
    async fn generate_final_feedback(&self, transcript: &[TranscriptEntry]) -> FinalFeedback {
        let prompt = final_feedback_prompt(transcript);
        match self
            .retry
            .run("generate_final_feedback", || self.model.complete(&prompt))
            .await
        {
            Ok(raw) => parse_final_feedback(&raw),
            Err(err) => {
                warn!(error = %err, "Final feedback unavailable, using fallback");
                FinalFeedback::fallback()
            }
        }
    }
}

// ============================================================================
// Prompts
// ============================================================================

/// Builds the question generation prompt.
#[must_use]
pub fn question_prompt(resume_text: &str, difficulty: Difficulty, asked: &[String]) -> String {
    let mut prompt = format!(
        "You are a technical interviewer. Based on the candidate's resume below, \
         generate ONE {difficulty}-level technical interview question.\n\
         Return ONLY the question text, with no preamble, numbering, or explanation.\n\n\
         Resume:\n{}\n",
        resume_text.trim()
    );
    if !asked.is_empty() {
        prompt.push_str("\nDo not reuse or rephrase any of these previously asked questions:\n");
        for question in asked {
            let _ = writeln!(prompt, "- {question}");
        }
    }
    prompt
}

/// Builds the answer analysis prompt.
#[must_use]
pub fn analysis_prompt(question: &str, answer: &str) -> String {
    format!(
        "You are a technical interviewer evaluating a candidate's answer.\n\n\
         Question: {question}\n\
         Answer: {answer}\n\n\
         Respond with a JSON object of the form \
         {{\"feedback\": \"<2-3 sentences of constructive feedback>\", \
         \"nextDifficulty\": \"HARDER\" | \"SAME\" | \"EASIER\"}}.\n\
         Choose HARDER for a strong answer, EASIER for a weak one, SAME otherwise."
    )
}

/// Builds the final feedback prompt.
#[must_use]
pub fn final_feedback_prompt(transcript: &[TranscriptEntry]) -> String {
    let mut prompt = String::from(
        "You are a technical interviewer writing an end-of-interview assessment.\n\
         Review the interview below and respond with a JSON object with exactly the keys \
         \"strengths\", \"weaknesses\" and \"suggestions\". Each value is a list of short points.\n\n",
    );
    for (i, entry) in transcript.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "Q{} ({}): {}\nA: {}\nFeedback: {}\n",
            i + 1,
            entry.difficulty,
            entry.question,
            entry.answer,
            entry.feedback
        );
    }
    prompt
}
