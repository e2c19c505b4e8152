//! Semantic retrieval over the notification store.
//!
//! Embeds the query, scores it against every stored chunk vector with
//! cosine similarity, and returns the top-k chunks joined with their
//! notification metadata. The corpus is regulatory notifications, small
//! enough that a full in-process scan beats maintaining an ANN index.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::Config;
use crate::embedding::{self, blob_to_vec, cosine_similarity};
use crate::models::RetrievedChunk;

pub async fn semantic_search(
    config: &Config,
    pool: &SqlitePool,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if !config.embedding.is_enabled() {
        bail!("Semantic search requires embeddings; set embedding.provider in config");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;
    search_by_vector(pool, &query_vec, k).await
}

/// Score a precomputed query vector against every stored chunk vector.
pub async fn search_by_vector(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let rows: Vec<(String, i64, String, Vec<u8>, String, Option<String>, Option<String>, Option<String>)> =
        sqlx::query_as(
            r#"
            SELECT c.notification_id, c.chunk_index, c.text, v.embedding,
                   n.source_key, n.url, n.publish_date, n.notification_number
            FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            JOIN notifications n ON n.id = c.notification_id
            "#,
        )
        .fetch_all(pool)
        .await?;

    debug!(candidates = rows.len(), "scoring chunk vectors");

    let mut scored: Vec<RetrievedChunk> = rows
        .into_iter()
        .map(
            |(notification_id, chunk_index, text, blob, source_key, url, publish_date, notification_number)| {
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                RetrievedChunk {
                    notification_id,
                    source_key,
                    chunk_index,
                    text,
                    score,
                    url,
                    publish_date,
                    notification_number,
                }
            },
        )
        .collect();

    rank(&mut scored, k);
    Ok(scored)
}

/// Score already-embedded chunk texts against a query vector and keep the
/// top-m. Used for per-session uploaded documents, which never touch the
/// persistent store.
pub fn score_embedded_chunks(
    query_vec: &[f32],
    chunks: &[(String, Vec<f32>)],
    m: usize,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = chunks
        .iter()
        .map(|(text, vec)| (text.clone(), cosine_similarity(query_vec, vec)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(m);
    scored
}

fn rank(scored: &mut Vec<RetrievedChunk>, k: usize) {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
}
