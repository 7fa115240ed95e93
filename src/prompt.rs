//! Prompt assembly for analysis and chat.
//!
//! Both flows are pure string construction: no I/O, no validation. The
//! analysis prompt is a fixed template with two slots, rendered into a
//! single human message. The chat conversation is a fixed preamble of
//! three system messages followed by the caller's history and question.

use crate::models::{ChatMessage, HistoryEntry, HistoryRole};

/// Instruction template for NDA risk analysis. `{context}` receives the
/// retrieved law passages and `{document}` the full document text.
pub const ANALYSIS_TEMPLATE: &str = r#"
You are an expert Indian Legal Advisor.
Analyze the following Non-Disclosure Agreement (NDA) clause based ONLY on the provided Indian Law Context.

Context (Indian Laws):
{context}

NDA Document Text:
{document}

Task:
Identify risky or illegal clauses.
If a clause violates Section 27 of the Indian Contract Act (Restraint of Trade), flag it immediately.
Return the output in purely JSON format with this structure:
{
  "summary": "Brief summary of the document",
  "risks": [
    {
      "clause": "The text of the risky clause",
      "risk_level": "High/Medium/Low",
      "reason": "Why it violates the context",
      "suggestion": "How to fix it"
    }
  ],
  "score": "This the overall rating of the document out of 100, higher means good lower means bad"
}
IMPORTANT: Return ONLY the raw JSON. Do not use Markdown formatting (no ```json or ```). Do not add any conversational text before or after the JSON.
"#;

/// Persona opening every chat conversation.
pub const PERSONA: &str = "You are VakilAI, a highly experienced and professional Indian legal counsel. Your tone should be authoritative, precise, and formal, yet clear. Explain legal concepts thoroughly but concisely.";

/// Plain-text directive sent after the persona.
pub const NO_MARKDOWN: &str = "IMPORTANT: Do NOT use markdown formatting like bold (**text**) or italics (*text*) in your response. Output plain text only.";

const CONTEXT_SLOT: &str = "{context}";
const DOCUMENT_SLOT: &str = "{document}";

/// Render the analysis instruction.
///
/// Slots are filled in a single pass, so placeholder-like text inside the
/// context or the document is never expanded. Neither input is truncated.
pub fn render_analysis_prompt(context: &str, document: &str) -> String {
    let mut out = String::with_capacity(ANALYSIS_TEMPLATE.len() + context.len() + document.len());
    let mut rest = ANALYSIS_TEMPLATE;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(CONTEXT_SLOT) {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(DOCUMENT_SLOT) {
            out.push_str(document);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// The analysis request as sent to the chat model: one human message.
pub fn analysis_messages(context: &str, document: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::human(render_analysis_prompt(context, document))]
}

/// Build the chat conversation in wire order:
/// persona, no-markdown directive, document context, history, question.
pub fn build_chat_messages(
    document_context: &str,
    history: &[HistoryEntry],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 4);
    messages.push(ChatMessage::system(PERSONA));
    messages.push(ChatMessage::system(NO_MARKDOWN));
    messages.push(ChatMessage::system(format!(
        "Document Context:\n{}",
        document_context
    )));

    for entry in history {
        let role = HistoryRole::parse(&entry.role);
        if let HistoryRole::Other(ref label) = role {
            tracing::warn!(role = %label, "unrecognised history role, treating as assistant");
        }
        messages.push(ChatMessage {
            role: role.to_role(),
            content: entry.content.clone(),
        });
    }

    messages.push(ChatMessage::human(question));
    messages
}
