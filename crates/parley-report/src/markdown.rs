//! Markdown report generation for interview transcripts.
//!
//! [`MarkdownGenerator`] turns a [`Report`] into a document with:
//!
//! - A summary table with status, progress and timing
//! - The difficulty path the interview took
//! - Each question with the candidate's answer and feedback
//! - The end-of-interview feedback

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{FeedbackSection, QuestionRecord, Report};

/// Generates Markdown transcripts from interview reports.
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        self.generate_at(Utc::now())
    }

    /// Generates the report as of `now`, which drives the running duration and
    /// the footer timestamp.
    #[must_use]
    pub fn generate_at(&self, now: DateTime<Utc>) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output, now);
        self.write_difficulty_path(&mut output);
        self.write_questions(&mut output);
        self.write_final_feedback(&mut output);
        Self::write_footer(&mut output, now);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Interview Report: {} (Interview #{})\n",
            escape_markdown(&self.report.candidate_id),
            self.report.interview_number
        );
    }

    fn write_summary(&self, output: &mut String, now: DateTime<Utc>) {
        let summary = &self.report.summary;
        let answered = self
            .report
            .questions
            .iter()
            .filter(|q| q.is_answered())
            .count();

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Session | `{}` |", self.report.session_id);
        let _ = writeln!(output, "| Status | {} |", summary.status.description());
        let _ = writeln!(
            output,
            "| Questions | {} asked, {answered} answered (of {}) |",
            self.report.questions.len(),
            summary.max_questions
        );
        let _ = writeln!(
            output,
            "| Started | {} |",
            format_timestamp(&summary.started_at)
        );
        if let Some(ended_at) = &summary.ended_at {
            let _ = writeln!(output, "| Ended | {} |", format_timestamp(ended_at));
        }
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds(now))
        );
        let _ = writeln!(output);
    }

    fn write_difficulty_path(&self, output: &mut String) {
        if self.report.questions.is_empty() {
            return;
        }

        let counts = self.report.difficulty_counts();
        let _ = writeln!(output, "## Difficulty\n");
        let _ = writeln!(output, "{}\n", self.report.difficulty_path().join(" → "));
        let _ = writeln!(
            output,
            "{} easy, {} medium, {} hard\n",
            counts.easy, counts.medium, counts.hard
        );
    }

    fn write_questions(&self, output: &mut String) {
        let _ = writeln!(output, "## Questions\n");

        if self.report.questions.is_empty() {
            let _ = writeln!(output, "*No questions were asked.*\n");
            return;
        }

        for question in &self.report.questions {
            Self::write_question(output, question);
        }
    }

    fn write_question(output: &mut String, question: &QuestionRecord) {
        let _ = writeln!(
            output,
            "### Question {} ({})\n",
            question.number, question.difficulty
        );
        let _ = writeln!(output, "{}\n", escape_markdown(&question.question));

        match question.answer.as_deref() {
            Some(answer) if !answer.is_empty() => {
                let _ = writeln!(output, "**Answer**:\n");
                let _ = writeln!(output, "{}\n", quote_block(answer));
            }
            _ => {
                let _ = writeln!(output, "*Not answered.*\n");
            }
        }

        if let Some(feedback) = &question.feedback {
            let _ = writeln!(output, "**Feedback**: {}\n", escape_markdown(feedback));
        }
    }

    fn write_final_feedback(&self, output: &mut String) {
        let _ = writeln!(output, "## Final Feedback\n");

        let Some(feedback) = &self.report.final_feedback else {
            let _ = writeln!(output, "*Available once the interview ends.*\n");
            return;
        };

        if let Some(note) = source_note(feedback) {
            let _ = writeln!(output, "> {note}\n");
        }

        let _ = writeln!(output, "### Strengths\n");
        let _ = writeln!(output, "{}\n", escape_markdown(&feedback.strengths));
        let _ = writeln!(output, "### Weaknesses\n");
        let _ = writeln!(output, "{}\n", escape_markdown(&feedback.weaknesses));
        let _ = writeln!(output, "### Suggestions\n");
        let _ = writeln!(output, "{}\n", escape_markdown(&feedback.suggestions));
    }

    fn write_footer(output: &mut String, now: DateTime<Utc>) {
        let _ = writeln!(output, "---\n");
        let _ = writeln!(output, "*Generated by Parley at {}*", format_timestamp(&now));
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a duration in seconds as a human-readable string.
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn source_note(feedback: &FeedbackSection) -> Option<&'static str> {
    match feedback.source.as_str() {
        "fallback" => Some("Detailed feedback could not be generated for this interview."),
        "early_stop" => Some("The interview was stopped before all questions were answered."),
        _ => None,
    }
}

/// Escapes special Markdown characters in text.
///
/// Newlines become `<br>` so the text can sit inside a table cell.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Renders free text as a Markdown block quote, one `>` per line.
fn quote_block(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {}", escape_markdown(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{ReportStatus, ReportSummary};
    use chrono::{Duration, TimeZone};

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    fn completed_report() -> Report {
        Report::builder()
            .session("abc-123", "alice", 2)
            .summary(
                ReportSummary::new(ReportStatus::Completed, 2, started())
                    .ended_at(started() + Duration::seconds(754)),
            )
            .question(
                QuestionRecord::new(1, "What is a *mutex*?", "medium")
                    .answered("A lock.\nIt guards data.", "Correct but brief."),
            )
            .question(
                QuestionRecord::new(2, "How does RwLock differ?", "hard")
                    .answered("Many readers", "Good."),
            )
            .final_feedback(FeedbackSection::new(
                "1. Concise",
                "1. Shallow",
                "1. Go deeper",
                "generated",
            ))
            .build()
            .unwrap()
    }

    // ------------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------------

    #[test]
    fn test_title_and_summary() {
        let report = completed_report();
        let md = MarkdownGenerator::new(&report).generate_at(started());

        assert!(md.starts_with("# Interview Report: alice (Interview #2)"));
        assert!(md.contains("| Status | Interview completed |"));
        assert!(md.contains("| Questions | 2 asked, 2 answered (of 2) |"));
        assert!(md.contains("| Started | 2026-03-01 09:30:00 UTC |"));
        assert!(md.contains("| Duration | 12m 34s |"));
    }

    #[test]
    fn test_difficulty_path() {
        let report = completed_report();
        let md = MarkdownGenerator::new(&report).generate();

        assert!(md.contains("medium → hard"));
        assert!(md.contains("0 easy, 1 medium, 1 hard"));
    }

    #[test]
    fn test_questions_escape_and_quote() {
        let report = completed_report();
        let md = MarkdownGenerator::new(&report).generate();

        assert!(md.contains("### Question 1 (medium)"));
        assert!(md.contains(r"What is a \*mutex\*?"));
        assert!(md.contains("> A lock.\n> It guards data."));
        assert!(md.contains("**Feedback**: Correct but brief."));
    }

    #[test]
    fn test_generated_feedback_has_no_note() {
        let report = completed_report();
        let md = MarkdownGenerator::new(&report).generate();

        assert!(md.contains("### Strengths\n\n1. Concise"));
        assert!(!md.contains("could not be generated"));
    }

    #[test]
    fn test_in_progress_report() {
        let report = Report::builder()
            .session("s", "bob", 1)
            .summary(ReportSummary::new(ReportStatus::InProgress, 5, started()))
            .question(QuestionRecord::new(1, "First?", "medium"))
            .build()
            .unwrap();
        let md = MarkdownGenerator::new(&report).generate_at(started() + Duration::seconds(5));

        assert!(md.contains("*Not answered.*"));
        assert!(md.contains("*Available once the interview ends.*"));
        assert!(md.contains("| Duration | 5s |"));
        assert!(!md.contains("| Ended |"));
    }

    #[test]
    fn test_stopped_report_notes_early_stop() {
        let report = Report::builder()
            .session("s", "bob", 1)
            .summary(ReportSummary::new(ReportStatus::Stopped, 5, started()))
            .final_feedback(FeedbackSection::new("a", "b", "c", "early_stop"))
            .build()
            .unwrap();
        let md = MarkdownGenerator::new(&report).generate();

        assert!(md.contains("*No questions were asked.*"));
        assert!(md.contains("> The interview was stopped before all questions were answered."));
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(3661), "1h 1m 1s");
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a|b"), r"a\|b");
        assert_eq!(escape_markdown("x\ny"), "x<br>y");
        assert_eq!(escape_markdown("plain text."), "plain text.");
    }
}
