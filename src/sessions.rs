//! Per-session uploaded-document store.
//!
//! Uploaded documents are conversation-scoped working context, not corpus:
//! they live in memory, keyed by session id, and expire after a
//! configured TTL so abandoned sessions cannot grow the map without
//! bound. Expired
//! entries are purged lazily on every access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One uploaded document, chunked and (when embeddings are enabled)
/// embedded at upload time.
#[derive(Debug, Clone)]
pub struct SessionDoc {
    pub filename: String,
    /// Chunk text paired with its embedding vector.
    pub chunks: Vec<(String, Vec<f32>)>,
}

struct Entry {
    doc: SessionDoc,
    expires_at: Instant,
}

pub struct SessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Store (or replace) the document for a session and reset its TTL.
    pub fn insert(&self, session_id: &str, doc: SessionDoc) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut map);
        map.insert(
            session_id.to_string(),
            Entry {
                doc,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// The live document for a session, if one exists and has not expired.
    pub fn get(&self, session_id: &str) -> Option<SessionDoc> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut map);
        map.get(session_id).map(|e| e.doc.clone())
    }

    pub fn len(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::purge(&mut map);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge(map: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> SessionDoc {
        SessionDoc {
            filename: name.to_string(),
            chunks: vec![("chunk".to_string(), vec![1.0, 0.0])],
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.insert("s1", doc("a.pdf"));
        let got = store.get("s1").unwrap();
        assert_eq!(got.filename, "a.pdf");
        assert_eq!(got.chunks.len(), 1);
    }

    #[test]
    fn missing_session_is_none() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn reupload_replaces_the_document() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.insert("s1", doc("old.pdf"));
        store.insert("s1", doc("new.pdf"));
        assert_eq!(store.get("s1").unwrap().filename, "new.pdf");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn expired_entries_are_purged_on_access() {
        let store = SessionStore::new(Duration::ZERO);
        store.insert("s1", doc("a.pdf"));
        assert!(store.get("s1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.insert("s1", doc("one.pdf"));
        store.insert("s2", doc("two.pdf"));
        assert_eq!(store.get("s1").unwrap().filename, "one.pdf");
        assert_eq!(store.get("s2").unwrap().filename, "two.pdf");
    }
}
