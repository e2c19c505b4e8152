//! Chat history persistence.
//!
//! Every answered query appends a user/assistant message pair to the
//! session's history. The chat row is created on first contact; its title
//! is derived from the first query and never overwritten by later ones.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{ChatMessage, ChatSummary, IncomingMessage};

/// Chats returned by the list endpoint, newest activity first.
const CHAT_LIST_LIMIT: i64 = 100;
/// Derived titles are clipped to this many characters.
const TITLE_MAX_CHARS: usize = 75;

/// Append a query/answer pair to a session, creating the chat row with a
/// derived title if this is the session's first exchange.
pub async fn record_exchange(
    pool: &SqlitePool,
    session_id: &str,
    query: &str,
    answer: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let title = derive_title(query);

    let mut tx = pool.begin().await?;

    // Title only sticks on insert; existing chats keep theirs.
    sqlx::query(
        r#"
        INSERT INTO chats (session_id, title, created_at, last_updated)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET last_updated = excluded.last_updated
        "#,
    )
    .bind(session_id)
    .bind(&title)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (role, content) in [("user", query), ("assistant", answer)] {
        sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Explicit save: upsert the chat row and replace its stored messages with
/// the supplied list. When no title is given the first message provides
/// one. Returns the session id, generating one when the caller did not
/// supply it.
pub async fn save_chat(
    pool: &SqlitePool,
    session_id: Option<String>,
    title: Option<&str>,
    messages: &[IncomingMessage],
) -> Result<String> {
    let session_id = session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();
    let title = match title {
        Some(t) if !t.trim().is_empty() => derive_title(t),
        _ => derive_title(messages.first().map(|m| m.content.as_str()).unwrap_or("")),
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO chats (session_id, title, created_at, last_updated)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            title = excluded.title,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(&session_id)
    .bind(&title)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // The client's list is the source of truth for an explicit save.
    sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;

    for message in messages {
        sqlx::query(
            "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(session_id)
}

pub async fn list_chats(pool: &SqlitePool) -> Result<Vec<ChatSummary>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT session_id, title, last_updated FROM chats ORDER BY last_updated DESC LIMIT ?",
    )
    .bind(CHAT_LIST_LIMIT)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(session_id, title, last_updated)| ChatSummary {
            session_id,
            title,
            last_updated: to_iso(last_updated),
        })
        .collect())
}

/// Full message history for one chat, oldest first. `None` when the chat
/// does not exist.
pub async fn get_chat(pool: &SqlitePool, session_id: &str) -> Result<Option<Vec<ChatMessage>>> {
    let exists: Option<String> = sqlx::query_scalar("SELECT session_id FROM chats WHERE session_id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;

    if exists.is_none() {
        return Ok(None);
    }

    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT role, content, created_at FROM chat_messages WHERE session_id = ? ORDER BY id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(
        rows.into_iter()
            .map(|(role, content, created_at)| ChatMessage {
                role,
                content,
                timestamp: to_iso(created_at),
            })
            .collect(),
    ))
}

fn to_iso(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}

/// First `TITLE_MAX_CHARS` characters of the query, cut on a char
/// boundary. A blank query gets a placeholder title.
fn derive_title(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    match trimmed.char_indices().nth(TITLE_MAX_CHARS) {
        Some((byte_idx, _)) => trimmed[..byte_idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[test]
    fn title_is_clipped_on_char_boundary() {
        let long = "क्या ".repeat(40);
        let title = derive_title(&long);
        assert!(title.chars().count() <= 75);
        assert!(!title.contains('\u{fffd}'));
    }

    #[test]
    fn blank_query_gets_placeholder_title() {
        assert_eq!(derive_title("   "), "New chat");
    }

    #[tokio::test]
    async fn exchange_creates_chat_and_two_messages() {
        let pool = test_pool().await;
        record_exchange(&pool, "s1", "What is the repo rate?", "6.5%").await.unwrap();

        let chats = list_chats(&pool).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title, "What is the repo rate?");

        let messages = get_chat(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "6.5%");
    }

    #[tokio::test]
    async fn later_exchanges_keep_the_first_title() {
        let pool = test_pool().await;
        record_exchange(&pool, "s1", "First question", "a1").await.unwrap();
        record_exchange(&pool, "s1", "Second question", "a2").await.unwrap();

        let chats = list_chats(&pool).await.unwrap();
        assert_eq!(chats[0].title, "First question");

        let messages = get_chat(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn unknown_chat_is_none() {
        let pool = test_pool().await;
        assert!(get_chat(&pool, "ghost").await.unwrap().is_none());
    }

    fn message(role: &str, content: &str) -> IncomingMessage {
        IncomingMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn save_chat_generates_an_id_when_missing() {
        let pool = test_pool().await;
        let id = save_chat(&pool, None, Some("Saved conversation"), &[]).await.unwrap();
        assert!(!id.is_empty());

        let messages = get_chat(&pool, &id).await.unwrap().unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn save_chat_keeps_a_supplied_id() {
        let pool = test_pool().await;
        let id = save_chat(&pool, Some("keep-me".to_string()), Some("t"), &[]).await.unwrap();
        assert_eq!(id, "keep-me");
    }

    #[tokio::test]
    async fn save_chat_persists_the_message_list() {
        let pool = test_pool().await;
        let msgs = [
            message("user", "What is the CRR?"),
            message("assistant", "4.5% of NDTL."),
        ];
        let id = save_chat(&pool, None, None, &msgs).await.unwrap();

        let stored = get_chat(&pool, &id).await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, "user");
        assert_eq!(stored[1].content, "4.5% of NDTL.");

        // No title supplied, so the first message provides it.
        let chats = list_chats(&pool).await.unwrap();
        assert_eq!(chats[0].title, "What is the CRR?");
    }

    #[tokio::test]
    async fn resaving_replaces_messages_instead_of_appending() {
        let pool = test_pool().await;
        let id = save_chat(&pool, Some("s1".to_string()), None, &[message("user", "one")])
            .await
            .unwrap();
        save_chat(
            &pool,
            Some(id.clone()),
            None,
            &[message("user", "one"), message("assistant", "two")],
        )
        .await
        .unwrap();

        let stored = get_chat(&pool, &id).await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
    }
}
