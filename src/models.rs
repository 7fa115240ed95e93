//! Core data models used throughout Vakil.
//!
//! These types represent the corpus documents and chunks produced by
//! ingestion, the retrieval results and chat messages used while serving,
//! and the structured analysis a completion is expected to carry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw corpus file produced by the loader before chunking.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    /// Path relative to the corpus root (or the file name for a single file).
    pub source: String,
    pub title: Option<String>,
    pub body: String,
}

/// A chunk of a corpus document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A corpus chunk returned by the retriever, ranked by similarity.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

/// Role of a message sent to the completion client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl Role {
    /// Role name on the OpenAI-compatible chat wire format.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One prior turn of a conversation as sent by the caller.
///
/// The role label is kept as free text; see [`HistoryRole`] for how it is
/// interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Interpreted caller-side role label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryRole {
    User,
    Assistant,
    /// Any label other than `user` or `assistant`. Mapped to
    /// [`Role::Assistant`].
    Other(String),
}

impl HistoryRole {
    pub fn parse(label: &str) -> Self {
        match label {
            "user" => HistoryRole::User,
            "assistant" => HistoryRole::Assistant,
            other => HistoryRole::Other(other.to_string()),
        }
    }

    pub fn to_role(&self) -> Role {
        match self {
            HistoryRole::User => Role::Human,
            HistoryRole::Assistant | HistoryRole::Other(_) => Role::Assistant,
        }
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub document_context: String,
}

/// Typed view of a successful analysis completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<RiskItem>,
    pub score: Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskItem {
    pub clause: String,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

impl TryFrom<String> for RiskLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RiskLevel> for String {
    fn from(level: RiskLevel) -> Self {
        level.to_string()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Low => "Low",
        };
        f.write_str(s)
    }
}

/// Overall document rating out of 100. Models return either a number or a
/// string such as `"35/100"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Number(f64),
    Text(String),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Number(n) => write!(f, "{}", n),
            Score::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_role_mapping() {
        assert_eq!(HistoryRole::parse("user").to_role(), Role::Human);
        assert_eq!(HistoryRole::parse("assistant").to_role(), Role::Assistant);
        assert_eq!(
            HistoryRole::parse("moderator"),
            HistoryRole::Other("moderator".to_string())
        );
        assert_eq!(HistoryRole::parse("moderator").to_role(), Role::Assistant);
        // Labels are matched exactly.
        assert_eq!(HistoryRole::parse("User").to_role(), Role::Assistant);
    }

    #[test]
    fn test_chat_request_history_defaults_to_empty() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"question": "Is this valid?", "document_context": ""}"#)
                .unwrap();
        assert!(req.history.is_empty());
    }

    #[test]
    fn test_analysis_result_accepts_numeric_and_text_score() {
        let numeric: AnalysisResult = serde_json::from_str(
            r#"{"summary": "s", "risks": [], "score": 40}"#,
        )
        .unwrap();
        assert_eq!(numeric.score, Score::Number(40.0));

        let text: AnalysisResult = serde_json::from_str(
            r#"{"summary": "s", "risks": [], "score": "40/100"}"#,
        )
        .unwrap();
        assert_eq!(text.score, Score::Text("40/100".to_string()));
    }

    #[test]
    fn test_risk_level_case_insensitive() {
        let item: RiskItem = serde_json::from_str(
            r#"{"clause": "c", "risk_level": "high", "reason": "r", "suggestion": "s"}"#,
        )
        .unwrap();
        assert_eq!(item.risk_level, RiskLevel::High);
        assert_eq!(
            serde_json::to_value(item.risk_level).unwrap(),
            serde_json::json!("High")
        );
    }
}
