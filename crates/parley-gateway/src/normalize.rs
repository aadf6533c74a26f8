//! Normalization of loosely structured model output.
//!
//! Models wrap answers in code fences, add chatty preambles, number their
//! questions, and only sometimes honor a requested JSON shape. Everything in
//! this module is total: malformed input degrades to a sensible default
//! instead of an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::{AnswerAnalysis, Difficulty, DifficultySignal, FinalFeedback};

/// Feedback used when an analysis contains no usable text.
pub const NO_FEEDBACK: &str = "Could not generate feedback for this answer.";

/// `Next: HARDER`, `next difficulty = easy`, `"nextDifficulty": "SAME"`.
static DIRECTIVE_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?i)next[\s_-]*(?:difficulty|level|question)?["']?\s*[:=]\s*["']?\s*(harder|easier|same|hard|easy|medium)\b"#,
    )
    .ok()
});

static BARE_DIRECTIVE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(harder|easier)\b").ok());

/// Labels such as `Question 2:`, `**Q:**`, `1.` in front of a question.
static QUESTION_LABEL_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[#>\-\s]*(?:\*\*)?\s*(?:(?:interview\s+)?question(?:\s*\d+)?|q\d*)\s*(?:\*\*)?\s*[:.)\-]\s*(?:\*\*)?\s*",
    )
    .ok()
});

static NUMBERING_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\d+[.)]\s+").ok());

static INTERJECTION_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:sure|certainly|okay|ok|of course|absolutely|great)[!.,]\s*").ok()
});

const PREAMBLE_PREFIXES: &[&str] = &[
    "here is",
    "here's",
    "here are",
    "sure",
    "certainly",
    "okay",
    "of course",
    "absolutely",
    "below is",
];

// ============================================================================
// Shared helpers
// ============================================================================

/// Removes Markdown code fences, keeping the fenced content when present.
#[must_use]
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains("```") {
        return trimmed.to_string();
    }

    let mut inside = Vec::new();
    let mut in_fence = false;
    for line in trimmed.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            inside.push(line);
        }
    }

    if inside.iter().all(|line| line.trim().is_empty()) {
        return trimmed
            .lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
    }
    inside.join("\n").trim().to_string()
}

/// Parses the first JSON object found in `text`.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn field_case_insensitive<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

fn regex_replace(re: &Lazy<Option<Regex>>, text: &str) -> String {
    re.as_ref()
        .map_or_else(|| text.to_string(), |re| re.replace(text, "").into_owned())
}

// ============================================================================
// Questions
// ============================================================================

/// Reduces a generated question to the question text alone.
///
/// Returns `None` when nothing usable remains, which callers treat as an
/// empty response.
#[must_use]
pub fn clean_question(raw: &str) -> Option<String> {
    let text = strip_code_fences(raw);
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_preamble(line))
        .map(strip_question_label)
        .filter(|line| !line.is_empty())
        .collect();

    let chosen = lines
        .iter()
        .find(|line| line.contains('?'))
        .cloned()
        .or_else(|| (!lines.is_empty()).then(|| lines.join(" ")))?;

    let cleaned = chosen
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '*' | '`' | '“' | '”'))
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn is_preamble(line: &str) -> bool {
    if line.contains('?') {
        return false;
    }
    let lower = line.to_lowercase();
    line.ends_with(':') || PREAMBLE_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn strip_question_label(line: &str) -> String {
    let line = regex_replace(&INTERJECTION_RE, line);
    let line = regex_replace(&QUESTION_LABEL_RE, &line);
    regex_replace(&NUMBERING_RE, &line).trim().to_string()
}

// ============================================================================
// Answer analysis
// ============================================================================

/// Extracts feedback and a difficulty signal from an analysis response.
///
/// The signal is looked up as an explicit directive first, then as a field of
/// a JSON object, then as a bare `harder`/`easier` word. Anything else is
/// [`DifficultySignal::Same`].
#[must_use]
pub fn parse_analysis(raw: &str) -> AnswerAnalysis {
    let text = strip_code_fences(raw);
    let json = extract_json_object(&text);

    let signal = directive_signal(&text)
        .or_else(|| json.as_ref().and_then(json_signal))
        .or_else(|| bare_signal(&text))
        .unwrap_or(DifficultySignal::Same);

    let feedback = json
        .as_ref()
        .and_then(json_feedback)
        .unwrap_or_else(|| plain_feedback(&text));

    AnswerAnalysis {
        feedback: if feedback.is_empty() {
            NO_FEEDBACK.to_string()
        } else {
            feedback
        },
        signal,
    }
}

/// Maps a directive token (`HARDER`, `easy`, `Same`, ...) to a signal.
#[must_use]
pub fn signal_from_token(token: &str) -> Option<DifficultySignal> {
    let lower = token.trim().to_lowercase();
    match lower.as_str() {
        "harder" => return Some(DifficultySignal::Harder),
        "easier" => return Some(DifficultySignal::Easier),
        "same" => return Some(DifficultySignal::Same),
        _ => {}
    }
    if let Some(level) = Difficulty::from_str_case_insensitive(&lower) {
        return Some(DifficultySignal::Level(level));
    }
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .collect();
    let has = |word: &str| words.iter().any(|w| *w == word);
    if has("harder") {
        Some(DifficultySignal::Harder)
    } else if has("easier") {
        Some(DifficultySignal::Easier)
    } else if has("same") {
        Some(DifficultySignal::Same)
    } else if has("hard") {
        Some(DifficultySignal::Level(Difficulty::Hard))
    } else if has("easy") {
        Some(DifficultySignal::Level(Difficulty::Easy))
    } else if has("medium") {
        Some(DifficultySignal::Level(Difficulty::Medium))
    } else {
        None
    }
}

fn directive_signal(text: &str) -> Option<DifficultySignal> {
    let re = DIRECTIVE_RE.as_ref()?;
    let caps = re.captures(text)?;
    signal_from_token(caps.get(1)?.as_str())
}

fn json_signal(map: &Map<String, Value>) -> Option<DifficultySignal> {
    let value = field_case_insensitive(
        map,
        &["nextDifficulty", "next_difficulty", "next", "difficulty", "nextLevel"],
    )?;
    signal_from_token(value.as_str()?)
}

fn bare_signal(text: &str) -> Option<DifficultySignal> {
    let re = BARE_DIRECTIVE_RE.as_ref()?;
    let caps = re.captures(text)?;
    signal_from_token(caps.get(1)?.as_str())
}

fn json_feedback(map: &Map<String, Value>) -> Option<String> {
    let text = field_case_insensitive(map, &["feedback", "analysis", "comment"])?
        .as_str()?
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

fn plain_feedback(text: &str) -> String {
    let directive = DIRECTIVE_RE.as_ref();
    text.lines()
        .map(str::trim)
        .filter(|line| !directive.is_some_and(|re| re.is_match(line)))
        .map(|line| {
            line.strip_prefix("Feedback:")
                .or_else(|| line.strip_prefix("feedback:"))
                .or_else(|| line.strip_prefix("**Feedback:**"))
                .unwrap_or(line)
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Final feedback
// ============================================================================

/// Parses a final feedback response, falling back to fixed text.
///
/// All three sections must be present. Array values are joined into a single
/// numbered, newline-separated string.
#[must_use]
pub fn parse_final_feedback(raw: &str) -> FinalFeedback {
    let text = strip_code_fences(raw);
    let Some(map) = extract_json_object(&text) else {
        return FinalFeedback::fallback();
    };

    let section = |name: &str| field_case_insensitive(&map, &[name]).and_then(coerce_section);
    match (
        section("strengths"),
        section("weaknesses"),
        section("suggestions"),
    ) {
        (Some(strengths), Some(weaknesses), Some(suggestions)) => {
            FinalFeedback::new(strengths, weaknesses, suggestions)
        }
        _ => FinalFeedback::fallback(),
    }
}

fn coerce_section(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, item)| {
                if NUMBERING_RE.as_ref().is_some_and(|re| re.is_match(&item)) {
                    item
                } else {
                    format!("{}. {item}", i + 1)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
