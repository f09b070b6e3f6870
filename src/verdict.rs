//! Structured verdicts and their extraction from free-form model output.
//!
//! Models are asked for a JSON object `{value, why, evidence}`. They do not
//! always comply: answers arrive wrapped in prose, fenced in markdown, or
//! preceded by an earlier malformed attempt. Extraction tries an ordered list
//! of candidate texts and returns the first one that parses into a [`Verdict`].

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Types
// =============================================================================

/// A single evaluation outcome for one document × metric.
///
/// `value` is not checked against the codebook's allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(deserialize_with = "scalar_text")]
    pub value: String,
    #[serde(deserialize_with = "text_or_lines")]
    pub why: String,
    #[serde(deserialize_with = "text_or_lines")]
    pub evidence: String,
}

impl Verdict {
    pub fn new(
        value: impl Into<String>,
        why: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            why: why.into(),
            evidence: evidence.into(),
        }
    }

    /// Whether two verdicts chose the same value. Justifications are ignored.
    pub fn agrees_with(&self, other: &Verdict) -> bool {
        self.value == other.value
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(
        "no JSON verdict found in response ({candidates} candidates tried{})",
        detail_suffix(.last_error)
    )]
    Malformed {
        candidates: usize,
        last_error: Option<String>,
    },
}

fn detail_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!("; last error: {e}"),
        None => String::new(),
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Where a candidate JSON text was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    /// The whole response is the JSON object.
    WholeText,
    /// A fenced code block; index counts from the start of the response.
    FencedBlock(usize),
}

/// Parse raw model output into a [`Verdict`].
pub fn extract_verdict(raw: &str) -> Result<Verdict, ExtractError> {
    extract_verdict_with_strategy(raw).map(|(verdict, _)| verdict)
}

/// Like [`extract_verdict`], also reporting which candidate succeeded.
pub fn extract_verdict_with_strategy(
    raw: &str,
) -> Result<(Verdict, ExtractStrategy), ExtractError> {
    let mut tried = 0usize;
    let mut last_error = None;

    for (strategy, candidate) in candidates(raw) {
        tried += 1;
        match serde_json::from_str::<Verdict>(candidate) {
            Ok(verdict) => return Ok((verdict, strategy)),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(ExtractError::Malformed {
        candidates: tried,
        last_error,
    })
}

/// Candidate texts in preference order: the whole response, then fenced
/// blocks holding an object, last block first.
fn candidates(raw: &str) -> impl Iterator<Item = (ExtractStrategy, &str)> {
    let whole = raw.trim();
    let whole = (!whole.is_empty()).then_some((ExtractStrategy::WholeText, whole));

    let blocks: Vec<(ExtractStrategy, &str)> = fenced_blocks(raw)
        .into_iter()
        .enumerate()
        .filter(|(_, body)| body.starts_with('{'))
        .map(|(idx, body)| (ExtractStrategy::FencedBlock(idx), body))
        .collect();

    whole.into_iter().chain(blocks.into_iter().rev())
}

/// Bodies of all closed ``` fences, trimmed, in document order.
///
/// The info string after the opening fence (`json`, `JSON`, nothing) is
/// skipped. An unterminated trailing fence is ignored.
fn fenced_blocks(raw: &str) -> Vec<&str> {
    const FENCE: &str = "```";
    let mut blocks = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find(FENCE) {
        let after_open = &rest[open + FENCE.len()..];
        let body_start = match after_open.find('\n') {
            Some(nl) if is_info_string(&after_open[..nl]) => nl + 1,
            _ => info_string_len(after_open),
        };
        let body = &after_open[body_start..];
        let Some(close) = body.find(FENCE) else {
            break;
        };
        blocks.push(body[..close].trim());
        rest = &body[close + FENCE.len()..];
    }

    blocks
}

fn is_info_string(s: &str) -> bool {
    s.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Length of an inline info string (e.g. "```json {...}```").
fn info_string_len(s: &str) -> usize {
    s.char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

// =============================================================================
// Field deserializers
// =============================================================================

/// Accept a string, number, or bool as the chosen value.
fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a scalar value, found {other}"
        ))),
    }
}

/// Accept a string or a list of strings (joined by newlines).
fn text_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(match TextOrLines::deserialize(deserializer)? {
        TextOrLines::Text(s) => s,
        TextOrLines::Lines(lines) => lines.join("\n"),
    })
}
