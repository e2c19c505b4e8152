//! Core data models used throughout RagFin.
//!
//! These types represent the scraped notifications, their chunks, and the
//! chat artifacts that flow through the pipeline and the API.

use serde::{Deserialize, Serialize};

/// One scraped notification after combination, keyed by its source file
/// name (or title). The canonical on-disk form is a single-key JSON object
/// mapping `source_key` to the payload fields.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Unique key from the combined file (PDF filename or title).
    pub source_key: String,
    /// Notification PDF URL (`url` or `pdf_url` in source files).
    pub url: Option<String>,
    /// Publish date as scraped (`publish_date` or `date`); free-form text.
    pub publish_date: Option<String>,
    pub notification_number: Option<String>,
    /// Extracted PDF text.
    pub content: String,
}

/// A chunk of a notification's content text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub notification_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by the retriever, with enough notification metadata to
/// cite the source in the prompt and the answer.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub notification_id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
    pub url: Option<String>,
    pub publish_date: Option<String>,
    pub notification_number: Option<String>,
}

/// One message in a chat session.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

/// A message as submitted by the client on an explicit chat save.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

/// Summary row for the chat list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub session_id: String,
    pub title: String,
    pub last_updated: String,
}
