//! Similarity retrieval over the SQLite index.
//!
//! The [`Retriever`] trait is the seam between request handling and the
//! index: handlers ask for the top-k chunks for a query and never touch
//! SQL or embeddings directly. [`SqliteRetriever`] embeds the query with the
//! configured provider and runs a brute-force cosine scan over the stored
//! vectors of that provider's model.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::embedding::{self, EmbeddingProvider};
use crate::models::RetrievedChunk;

/// Separator placed between retrieved chunk texts in the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to k chunks ranked by descending similarity to `query`.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

pub struct SqliteRetriever {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl SqliteRetriever {
    pub fn new(pool: SqlitePool, provider: Arc<dyn EmbeddingProvider>, top_k: usize) -> Self {
        Self {
            pool,
            provider,
            top_k,
        }
    }
}

#[async_trait]
impl Retriever for SqliteRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let query_vec = embedding::embed_query(self.provider.as_ref(), query).await?;

        // Fetch all vectors for the active model and compute cosine similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding,
                   c.chunk_index, c.text, d.source
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            WHERE cv.model = ?
            "#,
        )
        .bind(self.provider.model_name())
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<RetrievedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    source: row.get("source"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                }
            })
            .collect();

        rank(&mut results, self.top_k);

        tracing::debug!(
            candidates = rows.len(),
            returned = results.len(),
            "retrieval complete"
        );
        Ok(results)
    }
}

/// Sort by score desc, chunk id asc (deterministic), and keep the top k.
pub fn rank(results: &mut Vec<RetrievedChunk>, k: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k);
}

/// The leading `max_chars` characters of a document, used as its retrieval
/// query. Never splits a character.
pub fn retrieval_query(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Join retrieved chunk texts in rank order with a blank line between them.
pub fn join_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
