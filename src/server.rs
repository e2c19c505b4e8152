//! RagFin HTTP API.
//!
//! Serves the chat frontend: RAG-backed querying, per-session document
//! uploads, and chat history. All errors come back as JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Health and readiness (503 when the database is down) |
//! | `POST` | `/api/query` | Answer a question with RAG context |
//! | `POST` | `/api/upload` | Attach a document to a session |
//! | `GET`  | `/api/chats` | List recent chats |
//! | `GET`  | `/api/chat/{session_id}` | Full history of one chat |
//! | `POST` | `/api/chats` | Save a chat explicitly |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::extract::{self, ALLOWED_EXTENSIONS};
use crate::history;
use crate::llm;
use crate::retriever;
use crate::sessions::{SessionDoc, SessionStore};

/// Shared state for all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: sqlx::SqlitePool,
    sessions: Arc<SessionStore>,
}

/// Start the API server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    crate::migrate::run_migrations(&pool).await?;

    let max_body = config.server.max_upload_mb * 1024 * 1024;
    let cors = build_cors(&config.server.allowed_origins);

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        sessions: Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs))),
    };

    let app = Router::new()
        .route("/", get(handle_health))
        .route("/api/query", post(handle_query))
        .route("/api/upload", post(handle_upload))
        .route("/api/chats", get(handle_list_chats).post(handle_save_chat))
        .route("/api/chat/{session_id}", get(handle_get_chat))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .with_state(state);

    info!(addr = %bind_addr, "API server listening");
    println!("RagFin API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn unsupported_media(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
        code: "unsupported_media_type".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map pipeline errors onto the API contract: configuration problems are
/// the client's to fix (400), upstream model failures are 502.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("disabled") || msg.contains("embedding.provider") {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled".to_string(),
            message: msg,
        };
    }
    if msg.contains("API error") || msg.contains("environment variable") {
        return AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_error".to_string(),
            message: msg,
        };
    }
    internal(msg)
}

// ============ GET / ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    db_connected: bool,
    embeddings_enabled: bool,
    llm_configured: bool,
}

/// Readiness probe. The database is the only hard dependency; embeddings
/// and the LLM key are reported so operators can see a degraded setup
/// without the probe failing.
async fn handle_health(State(state): State<AppState>) -> Response {
    let db_connected = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let embeddings_enabled = state.config.embedding.is_enabled();
    let llm_configured = std::env::var(&state.config.llm.api_key_env).is_ok();

    let status = if db_connected { "ok" } else { "unavailable" };
    let body = HealthResponse {
        status: status.to_string(),
        service: "ragfin".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_connected,
        embeddings_enabled,
        llm_configured,
    };

    let code = if db_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    chat_id: Option<String>,
}

#[derive(Serialize)]
struct SourceRef {
    title: String,
    url: Option<String>,
    publish_date: Option<String>,
    notification_number: Option<String>,
    score: f64,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    session_id: String,
    sources: Vec<SourceRef>,
}

/// A non-empty client-supplied chat id is used verbatim; anything else
/// gets a fresh UUID. Every response carries the id actually used.
fn resolve_session_id(chat_id: Option<&str>) -> String {
    match chat_id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Embed the query once and score both the notification corpus and any
/// document attached to the session. With embeddings disabled the query
/// still goes through, just with no context to ground it.
async fn gather_contexts(
    state: &AppState,
    session_id: &str,
    query: &str,
) -> anyhow::Result<(Vec<crate::models::RetrievedChunk>, Vec<String>)> {
    let config = &state.config;

    if !config.embedding.is_enabled() {
        warn!("embeddings disabled; answering without retrieved context");
        return Ok((Vec::new(), Vec::new()));
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let retrieved =
        retriever::search_by_vector(&state.pool, &query_vec, config.retrieval.top_k).await?;

    let doc_context: Vec<String> = match state.sessions.get(session_id) {
        Some(doc) => {
            retriever::score_embedded_chunks(&query_vec, &doc.chunks, config.retrieval.top_m_doc)
                .into_iter()
                .map(|(text, _)| text)
                .collect()
        }
        None => Vec::new(),
    };

    Ok((retrieved, doc_context))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let session_id = resolve_session_id(req.chat_id.as_deref());
    let config = &state.config;

    let (retrieved, doc_context) = gather_contexts(&state, &session_id, query)
        .await
        .map_err(classify_error)?;

    let rag_context: Vec<String> = retrieved
        .iter()
        .map(|c| {
            let mut entry = c.source_key.clone();
            if let Some(num) = &c.notification_number {
                entry.push_str(&format!(" ({})", num));
            }
            if let Some(date) = &c.publish_date {
                entry.push_str(&format!(", {}", date));
            }
            entry.push_str(":\n");
            entry.push_str(&c.text);
            entry
        })
        .collect();

    let prompt = llm::build_prompt(query, &rag_context, &doc_context, config.llm.max_context_chars);
    let answer = llm::get_llm_response(&config.llm, &prompt)
        .await
        .map_err(classify_error)?;

    if let Err(e) = history::record_exchange(&state.pool, &session_id, query, &answer).await {
        // Answer still goes out; history is best-effort.
        warn!(session_id = %session_id, error = %e, "failed to record chat history");
    }

    let mut sources = Vec::new();
    for c in &retrieved {
        if sources.iter().any(|s: &SourceRef| s.title == c.source_key) {
            continue;
        }
        sources.push(SourceRef {
            title: c.source_key.clone(),
            url: c.url.clone(),
            publish_date: c.publish_date.clone(),
            notification_number: c.notification_number.clone(),
            score: c.score,
        });
    }

    Ok(Json(QueryResponse {
        response: answer,
        session_id,
        sources,
    }))
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    session_id: String,
    filename: String,
    chunks: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut session_id: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("session_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid session_id field: {}", e)))?;
                session_id = Some(value);
            }
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file field: {}", e)))?;
                bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| bad_request("session_id is required"))?;
    let filename = filename.ok_or_else(|| bad_request("file is required"))?;
    let bytes = bytes.ok_or_else(|| bad_request("file is required"))?;

    let ext = extract::file_extension(&filename).unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(unsupported_media(format!(
            "unsupported file type: .{} (allowed: {})",
            ext,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let text = extract::extract_text(&bytes, &filename)
        .map_err(|e| bad_request(format!("could not extract text: {}", e)))?;
    if text.trim().is_empty() {
        return Err(bad_request("document contains no extractable text"));
    }

    let config = &state.config;
    let chunks = chunk_text(
        "upload",
        &text,
        config.chunking.chunk_chars,
        config.chunking.overlap_chars,
    );

    // Embed now so queries only pay for the query vector. Without an
    // embedding backend the chunks score 0.0 and top-m falls back to
    // document order.
    let vectors = if config.embedding.is_enabled() {
        let provider = embedding::create_provider(&config.embedding).map_err(classify_error)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        embedding::embed_texts(provider.as_ref(), &config.embedding, &texts)
            .await
            .map_err(classify_error)?
    } else {
        vec![Vec::new(); chunks.len()]
    };

    let doc = SessionDoc {
        filename: filename.clone(),
        chunks: chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| (c.text.clone(), v))
            .collect(),
    };
    let chunk_count = doc.chunks.len();
    state.sessions.insert(&session_id, doc);

    info!(session_id = %session_id, filename = %filename, chunks = chunk_count, "document attached");

    Ok(Json(UploadResponse {
        message: "File processed and ready for this session".to_string(),
        session_id,
        filename,
        chunks: chunk_count,
    }))
}

// ============ Chat history endpoints ============

#[derive(Serialize)]
struct ChatListResponse {
    chats: Vec<crate::models::ChatSummary>,
}

async fn handle_list_chats(State(state): State<AppState>) -> Result<Json<ChatListResponse>, AppError> {
    let chats = history::list_chats(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(ChatListResponse { chats }))
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    messages: Vec<crate::models::ChatMessage>,
}

async fn handle_get_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    let messages = history::get_chat(&state.pool, &session_id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no chat with id: {}", session_id)))?;
    Ok(Json(ChatResponse {
        session_id,
        messages,
    }))
}

#[derive(Deserialize)]
struct SaveChatRequest {
    messages: Vec<crate::models::IncomingMessage>,
    chat_id: Option<String>,
    title: Option<String>,
}

#[derive(Serialize)]
struct SaveChatResponse {
    session_id: String,
}

async fn handle_save_chat(
    State(state): State<AppState>,
    Json(req): Json<SaveChatRequest>,
) -> Result<Json<SaveChatResponse>, AppError> {
    let session_id = history::save_chat(
        &state.pool,
        req.chat_id,
        req.title.as_deref(),
        &req.messages,
    )
    .await
    .map_err(|e| internal(e.to_string()))?;
    Ok(Json(SaveChatResponse { session_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state_without_embeddings() -> AppState {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = ":memory:"
            [scrapers]
            dir = "."
            [chunking]
            chunk_chars = 1000
            [server]
            bind = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        assert!(!config.embedding.is_enabled());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        AppState {
            config: Arc::new(config),
            pool,
            sessions: Arc::new(SessionStore::new(Duration::from_secs(60))),
        }
    }

    #[tokio::test]
    async fn disabled_embeddings_yield_empty_contexts_not_an_error() {
        let state = state_without_embeddings().await;
        let (retrieved, doc_context) = gather_contexts(&state, "s1", "What is the repo rate?")
            .await
            .unwrap();
        assert!(retrieved.is_empty());
        assert!(doc_context.is_empty());
    }

    #[test]
    fn supplied_chat_id_is_used_verbatim() {
        assert_eq!(resolve_session_id(Some("abc-123")), "abc-123");
    }

    #[test]
    fn blank_or_missing_chat_id_gets_a_uuid() {
        let a = resolve_session_id(None);
        let b = resolve_session_id(Some("  "));
        assert!(Uuid::parse_str(&a).is_ok());
        assert!(Uuid::parse_str(&b).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn upstream_errors_map_to_bad_gateway() {
        let err = classify_error(anyhow::anyhow!("LLM API error 500: boom"));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "upstream_error");
    }

    #[test]
    fn disabled_embeddings_map_to_bad_request() {
        let err = classify_error(anyhow::anyhow!("Embedding provider is disabled"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "embeddings_disabled");
    }
}
