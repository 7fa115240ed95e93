//! Ingestion pipeline orchestration.
//!
//! Corpus loader → chunker → embedder → SQLite index. Each corpus file is
//! one document row keyed by its source path. Re-ingesting a source
//! replaces its chunks and vectors in a single transaction, and a source
//! whose text, chunking parameters and embedding model are unchanged is
//! skipped. Sources that have left the corpus are dropped from the index.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::corpus;
use crate::db;
use crate::embedding::{self, vec_to_blob, EmbeddingProvider};
use crate::migrate;
use crate::models::{Chunk, CorpusDocument};

/// Counters reported at the end of an ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub documents: u64,
    pub skipped: u64,
    /// Sources indexed earlier that are no longer in the corpus.
    pub removed: u64,
    pub chunks: u64,
    pub embeddings: u64,
}

/// `vakil ingest`: load the corpus and (re)build the index.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let docs = corpus::load_corpus(&config.corpus)?;

    if dry_run {
        let total_chunks: usize = docs
            .iter()
            .map(|d| {
                chunk_text(
                    "tmp",
                    &d.body,
                    config.chunking.chunk_size,
                    config.chunking.chunk_overlap,
                )
                .len()
            })
            .sum();
        println!("ingest {} (dry-run)", config.corpus.path.display());
        println!("  documents found: {}", docs.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let provider = if config.embedding.is_enabled() {
        Some(embedding::create_provider(&config.embedding)?)
    } else {
        tracing::warn!("embedding provider is disabled; chunks will not be searchable");
        None
    };

    let pool = db::connect(&config.db).await?;
    migrate::apply_schema(&pool).await?;

    let stats = ingest_documents(
        &pool,
        &config.chunking,
        config.embedding.batch_size,
        provider.as_deref(),
        &docs,
    )
    .await?;

    println!("ingest {}", config.corpus.path.display());
    println!("  documents: {}", stats.documents);
    println!("  unchanged: {}", stats.skipped);
    println!("  removed: {}", stats.removed);
    println!("  chunks written: {}", stats.chunks);
    if provider.is_some() {
        println!("  embeddings written: {}", stats.embeddings);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Chunk, embed and store a set of corpus documents.
///
/// Embeddings are computed before the write transaction opens, so a
/// provider failure leaves the previous index for that source intact.
pub async fn ingest_documents(
    pool: &SqlitePool,
    chunking: &ChunkingConfig,
    batch_size: usize,
    provider: Option<&dyn EmbeddingProvider>,
    docs: &[CorpusDocument],
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    let model = provider.map(|p| p.model_name().to_string());

    for doc in docs {
        let dedup_hash = dedup_hash(doc, chunking, model.as_deref());

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT id, dedup_hash FROM documents WHERE source = ?")
                .bind(&doc.source)
                .fetch_optional(pool)
                .await?;

        if let Some((_, ref hash)) = existing {
            if *hash == dedup_hash {
                tracing::debug!(source = %doc.source, "unchanged, skipping");
                stats.skipped += 1;
                continue;
            }
        }

        let doc_id = existing
            .map(|(id, _)| id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let chunks = chunk_text(
            &doc_id,
            &doc.body,
            chunking.chunk_size,
            chunking.chunk_overlap,
        );

        let vectors = match provider {
            Some(p) => embed_chunks(p, &chunks, batch_size)
                .await
                .with_context(|| format!("Failed to embed {}", doc.source))?,
            None => Vec::new(),
        };

        store_document(pool, &doc_id, doc, &dedup_hash, &chunks, provider, &vectors).await?;

        tracing::info!(
            source = %doc.source,
            chunks = chunks.len(),
            embeddings = vectors.len(),
            "document indexed"
        );

        stats.documents += 1;
        stats.chunks += chunks.len() as u64;
        stats.embeddings += vectors.len() as u64;
    }

    stats.removed = remove_stale_documents(pool, docs).await?;

    Ok(stats)
}

/// Delete every indexed source that is not in `docs`, with its chunks and
/// vectors. Returns the number of documents removed.
async fn remove_stale_documents(pool: &SqlitePool, docs: &[CorpusDocument]) -> Result<u64> {
    let current: HashSet<&str> = docs.iter().map(|d| d.source.as_str()).collect();
    let indexed: Vec<(String, String)> = sqlx::query_as("SELECT id, source FROM documents")
        .fetch_all(pool)
        .await?;

    let mut removed = 0u64;
    for (doc_id, source) in indexed {
        if current.contains(source.as_str()) {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(&doc_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(source = %source, "source left the corpus, removed from index");
        removed += 1;
    }

    Ok(removed)
}

async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = provider.embed(&texts).await?;
        if embedded.len() != texts.len() {
            anyhow::bail!(
                "Embedding provider returned {} vectors for {} texts",
                embedded.len(),
                texts.len()
            );
        }
        vectors.extend(embedded);
    }

    Ok(vectors)
}

async fn store_document(
    pool: &SqlitePool,
    doc_id: &str,
    doc: &CorpusDocument,
    dedup_hash: &str,
    chunks: &[Chunk],
    provider: Option<&dyn EmbeddingProvider>,
    vectors: &[Vec<f32>],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, title, body, dedup_hash, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            dedup_hash = excluded.dedup_hash,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(doc_id)
    .bind(&doc.source)
    .bind(&doc.title)
    .bind(&doc.body)
    .bind(dedup_hash)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(p) = provider {
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(p.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

fn dedup_hash(doc: &CorpusDocument, chunking: &ChunkingConfig, model: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.body.as_bytes());
    hasher.update(chunking.chunk_size.to_le_bytes());
    hasher.update(chunking.chunk_overlap.to_le_bytes());
    hasher.update(model.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}
