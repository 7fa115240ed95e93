//! Extraction of the analysis JSON from a free-text completion.
//!
//! Models are told to answer with raw JSON but routinely wrap it in
//! markdown fences. Extraction runs in two separate steps:
//!
//! 1. [`repair_completion`] flattens the payload and strips fences.
//! 2. [`parse_analysis`] parses strictly and never fails: a completion that
//!    is still not JSON becomes [`AnalysisOutcome::Unparseable`] carrying the
//!    cleaned text, which the HTTP layer returns with a 200.
//!
//! A parsed value is passed through verbatim. [`AnalysisOutcome::as_result`]
//! offers a typed best-effort view for callers that want one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::AnalysisResult;

/// Error marker placed in the soft-failure object.
pub const PARSE_FAILURE_MARKER: &str = "Failed to parse analysis";

const FENCE_WITH_TAG: &str = "```json";
const FENCE: &str = "```";

/// Content of a completion: a single text or an ordered list of fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionPayload {
    Text(String),
    Fragments(Vec<Value>),
}

impl CompletionPayload {
    /// Interpret the `content` field of a chat-completion message.
    pub fn from_content(content: Value) -> Self {
        match content {
            Value::String(s) => CompletionPayload::Text(s),
            Value::Array(items) => CompletionPayload::Fragments(items),
            Value::Null => CompletionPayload::Text(String::new()),
            other => CompletionPayload::Text(other.to_string()),
        }
    }

    /// Flatten into one string; fragments are concatenated with no separator.
    pub fn into_text(self) -> String {
        match self {
            CompletionPayload::Text(s) => s,
            CompletionPayload::Fragments(items) => concat_fragments(&items),
        }
    }
}

/// String form of one fragment. A JSON string is used as-is, an object with
/// a string `text` field contributes that field, anything else its JSON
/// serialization.
pub fn fragment_text(fragment: &Value) -> String {
    match fragment {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => fragment.to_string(),
        },
        other => other.to_string(),
    }
}

pub fn concat_fragments(fragments: &[Value]) -> String {
    fragments.iter().map(fragment_text).collect()
}

/// Remove every ```` ```json ```` fence, then every bare ```` ``` ```` fence,
/// anywhere in the text, and trim surrounding whitespace.
pub fn repair_completion(raw: &str) -> String {
    raw.replace(FENCE_WITH_TAG, "")
        .replace(FENCE, "")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub error: String,
    pub raw_content: String,
}

/// Result of extracting an analysis from a completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    /// The completion parsed as JSON; returned verbatim.
    Parsed(Value),
    /// The completion was not JSON even after repair.
    Unparseable(ParseFailure),
}

impl AnalysisOutcome {
    pub fn is_parsed(&self) -> bool {
        matches!(self, AnalysisOutcome::Parsed(_))
    }

    /// Typed view of a parsed analysis, if it has the expected shape.
    pub fn as_result(&self) -> Option<AnalysisResult> {
        match self {
            AnalysisOutcome::Parsed(value) => serde_json::from_value(value.clone()).ok(),
            AnalysisOutcome::Unparseable(_) => None,
        }
    }

    /// Attach the extracted document text under `full_text`. Only parsed
    /// JSON objects are extended; everything else is returned unchanged.
    pub fn with_full_text(self, full_text: &str) -> Self {
        match self {
            AnalysisOutcome::Parsed(Value::Object(mut map)) => {
                map.insert("full_text".to_string(), Value::String(full_text.to_string()));
                AnalysisOutcome::Parsed(Value::Object(map))
            }
            other => other,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            AnalysisOutcome::Parsed(value) => value,
            AnalysisOutcome::Unparseable(failure) => serde_json::json!({
                "error": failure.error,
                "raw_content": failure.raw_content,
            }),
        }
    }
}

/// Strictly parse already-repaired text.
pub fn parse_analysis(cleaned: &str) -> AnalysisOutcome {
    match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => AnalysisOutcome::Parsed(value),
        Err(e) => {
            tracing::warn!(error = %e, len = cleaned.len(), "completion is not valid JSON");
            AnalysisOutcome::Unparseable(ParseFailure {
                error: PARSE_FAILURE_MARKER.to_string(),
                raw_content: cleaned.to_string(),
            })
        }
    }
}

/// Flatten, repair and parse a completion payload.
pub fn extract_analysis(payload: CompletionPayload) -> AnalysisOutcome {
    parse_analysis(&repair_completion(&payload.into_text()))
}
