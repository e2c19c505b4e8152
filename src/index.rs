//! Indexing pipeline.
//!
//! Reads the combined scraper output, validates each record into a
//! [`SourceRecord`], and stores it: upsert notification → replace chunks →
//! inline embedding. Records whose content is unchanged since the last run
//! are skipped via a dedup hash, and embedding failures are non-fatal so a
//! flaky backend never loses scraped text.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{self, vec_to_blob};
use crate::models::{Chunk, SourceRecord};

pub async fn run_index(config: &Config, pool: &SqlitePool, dry_run: bool) -> Result<()> {
    let path = config.scrapers.dir.join(&config.scrapers.combined_output);
    let records = load_records(&path)?;

    if dry_run {
        let total_chunks: usize = records
            .iter()
            .map(|r| {
                chunk_text(
                    "tmp",
                    &r.content,
                    config.chunking.chunk_chars,
                    config.chunking.overlap_chars,
                )
                .len()
            })
            .sum();
        println!("index {} (dry-run)", path.display());
        println!("  valid records: {}", records.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let mut indexed = 0u64;
    let mut unchanged = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;

    for record in &records {
        match upsert_notification(pool, record).await? {
            Upsert::Unchanged => {
                unchanged += 1;
                continue;
            }
            Upsert::Stored(notification_id) => {
                let chunks = chunk_text(
                    &notification_id,
                    &record.content,
                    config.chunking.chunk_chars,
                    config.chunking.overlap_chars,
                );
                replace_chunks(pool, &notification_id, &chunks).await?;
                chunks_written += chunks.len() as u64;

                let (ok, pending) = embed_chunks_inline(config, pool, &chunks).await;
                embeddings_written += ok;
                embeddings_pending += pending;

                indexed += 1;
            }
        }
    }

    println!("index {}", path.display());
    println!("  records: {}", records.len());
    println!("  indexed: {}", indexed);
    println!("  unchanged: {}", unchanged);
    println!("  chunks written: {}", chunks_written);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    println!("ok");

    Ok(())
}

/// Parse the combined file into validated records. Malformed entries are
/// logged and dropped; the file itself failing to parse is fatal.
pub fn load_records(path: &Path) -> Result<Vec<SourceRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read combined output: {}", path.display()))?;
    let top: Value = serde_json::from_str(&text)
        .with_context(|| format!("Combined output is not valid JSON: {}", path.display()))?;

    let items = match top {
        Value::Array(items) => items,
        _ => anyhow::bail!("Combined output must be a JSON array: {}", path.display()),
    };

    let mut records = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match validate_record(item) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => debug!(position = i, "record has empty content; skipping"),
            Err(reason) => warn!(position = i, %reason, "invalid record; skipping"),
        }
    }
    Ok(records)
}

/// A record is an object with exactly one key; the key is the notification
/// title and the value holds content plus optional metadata. Records
/// without usable content are silently dropped (`Ok(None)`).
fn validate_record(item: Value) -> std::result::Result<Option<SourceRecord>, String> {
    let obj = match item {
        Value::Object(obj) => obj,
        other => return Err(format!("expected object, got {}", type_name(&other))),
    };

    if obj.len() != 1 {
        return Err(format!("expected exactly one key, got {}", obj.len()));
    }

    let (source_key, body) = obj.into_iter().next().unwrap();
    if source_key.trim().is_empty() {
        return Err("empty record key".to_string());
    }

    let body = match body {
        Value::Object(b) => b,
        other => return Err(format!("record value must be an object, got {}", type_name(&other))),
    };

    let content = body
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if content.is_empty() {
        return Ok(None);
    }

    let get = |k: &str| body.get(k).and_then(|v| v.as_str()).map(str::to_string);
    // The RBI scraper writes `pdf_url`/`date` where the income-tax one
    // writes `url`/`publish_date`; accept either spelling.
    let url = get("url").or_else(|| get("pdf_url"));
    let publish_date = get("publish_date").or_else(|| get("date"));

    Ok(Some(SourceRecord {
        source_key,
        url,
        publish_date,
        notification_number: get("notification_number"),
        content,
    }))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

enum Upsert {
    Stored(String),
    Unchanged,
}

async fn upsert_notification(pool: &SqlitePool, record: &SourceRecord) -> Result<Upsert> {
    let mut hasher = Sha256::new();
    hasher.update(record.source_key.as_bytes());
    hasher.update(record.content.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing: Option<(String, String)> =
        sqlx::query_as("SELECT id, dedup_hash FROM notifications WHERE source_key = ?")
            .bind(&record.source_key)
            .fetch_optional(pool)
            .await?;

    if let Some((id, old_hash)) = &existing {
        if *old_hash == dedup_hash {
            debug!(source_key = %record.source_key, id = %id, "content unchanged");
            return Ok(Upsert::Unchanged);
        }
    }

    let id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO notifications (id, source_key, url, publish_date, notification_number, content, dedup_hash, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_key) DO UPDATE SET
            url = excluded.url,
            publish_date = excluded.publish_date,
            notification_number = excluded.notification_number,
            content = excluded.content,
            dedup_hash = excluded.dedup_hash,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&id)
    .bind(&record.source_key)
    .bind(&record.url)
    .bind(&record.publish_date)
    .bind(&record.notification_number)
    .bind(&record.content)
    .bind(&dedup_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Upsert::Stored(id))
}

async fn replace_chunks(pool: &SqlitePool, notification_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE notification_id = ?)",
    )
    .bind(notification_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunks WHERE notification_id = ?")
        .bind(notification_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, notification_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.notification_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Embed freshly-written chunks and store their vectors. Failures are
/// logged and reported as pending so the next `embed` pass can catch up.
pub async fn embed_chunks_inline(config: &Config, pool: &SqlitePool, chunks: &[Chunk]) -> (u64, u64) {
    if !config.embedding.is_enabled() || chunks.is_empty() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "embedding provider unavailable; chunks left pending");
            return (0, chunks.len() as u64);
        }
    };

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "embedding failed; chunks left pending");
            return (0, chunks.len() as u64);
        }
    };

    let now = chrono::Utc::now().timestamp();
    let mut written = 0u64;
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        let res = sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, notification_id, model, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.notification_id)
        .bind(provider.model_name())
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(pool)
        .await;

        match res {
            Ok(_) => written += 1,
            Err(e) => warn!(chunk_id = %chunk.id, error = %e, "failed to store embedding"),
        }
    }

    (written, chunks.len() as u64 - written)
}
