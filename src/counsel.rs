//! The two serving flows: NDA risk analysis and legal chat.
//!
//! [`Counsel`] owns the retriever and chat model handles built by the
//! composition root and is shared by every request.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::llm::ChatModel;
use crate::models::ChatRequest;
use crate::prompt;
use crate::response::{self, AnalysisOutcome};
use crate::retrieval::{self, Retriever};

pub struct Counsel {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    query_prefix_chars: usize,
}

impl Counsel {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
        query_prefix_chars: usize,
    ) -> Self {
        Self {
            retriever,
            model,
            query_prefix_chars,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Analyse a document's text for risky clauses.
    ///
    /// Retrieval uses only the leading characters of the document; the
    /// prompt carries the whole text. An unparseable completion is a soft
    /// failure, not an error. A parsed object gains a `full_text` key.
    pub async fn analyze(&self, full_text: &str) -> Result<AnalysisOutcome> {
        let query = retrieval::retrieval_query(full_text, self.query_prefix_chars);
        let chunks = self
            .retriever
            .retrieve(query)
            .await
            .context("Retrieval failed")?;
        let context = retrieval::join_context(&chunks);

        tracing::debug!(
            document_chars = full_text.chars().count(),
            query_chars = query.chars().count(),
            chunks = chunks.len(),
            "analysis context assembled"
        );

        let messages = prompt::analysis_messages(&context, full_text);
        let payload = self
            .model
            .complete(&messages)
            .await
            .context("Completion failed")?;

        let outcome = response::extract_analysis(payload).with_full_text(full_text);
        match outcome.as_result() {
            Some(result) => tracing::info!(
                risks = result.risks.len(),
                score = %result.score,
                "analysis complete"
            ),
            None => tracing::info!(parsed = outcome.is_parsed(), "analysis complete"),
        }
        Ok(outcome)
    }

    /// Answer a question about a document, given the prior conversation.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let messages = prompt::build_chat_messages(
            &request.document_context,
            &request.history,
            &request.question,
        );

        tracing::debug!(
            history = request.history.len(),
            context_chars = request.document_context.chars().count(),
            "chat request"
        );

        let payload = self
            .model
            .complete(&messages)
            .await
            .context("Completion failed")?;
        Ok(payload.into_text())
    }
}
