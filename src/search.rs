use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::retrieval::{Retriever, SqliteRetriever};

/// `vakil search`: print the corpus chunks most similar to a query.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(&config.db).await?;
    let provider = embedding::create_provider(&config.embedding)?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let retriever = SqliteRetriever::new(pool.clone(), provider, top_k);

    let results = retriever.retrieve(query).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            result.score,
            result.source,
            result.chunk_index
        );
        let excerpt: String = result.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", result.chunk_id);
        println!();
    }

    pool.close().await;
    Ok(())
}
