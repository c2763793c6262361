//! FIFO prefetch queue of reviewed documents, one JSON file per record.
//!
//! Filenames are `<nanoseconds>-<8 hex>.json` so lexicographic order is
//! enqueue order even for enqueues within the same second. All writes are
//! temp-then-rename atomic.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use driftpage_common::{epoch_seconds, signature_for_doc, Config, Doc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::SignatureStore;
use crate::token::{TokenSigner, TOKEN_TTL_SECS};

#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Signed take-token identifying the record.
    pub id: String,
    pub title: String,
    pub category: Option<String>,
    pub vibe: Option<String>,
    pub created_at: Option<i64>,
}

pub struct PrefetchQueue {
    dir: PathBuf,
    store: Arc<SignatureStore>,
    signer: TokenSigner,
    /// Serializes removals so each record has exactly one consumer.
    head_lock: tokio::sync::Mutex<()>,
}

impl PrefetchQueue {
    pub fn new(dir: impl Into<PathBuf>, store: Arc<SignatureStore>, signer: TokenSigner) -> Self {
        Self {
            dir: dir.into(),
            store,
            signer,
            head_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config, store: Arc<SignatureStore>) -> Self {
        Self::new(
            &config.prefetch_dir,
            store,
            TokenSigner::new(config.prefetch_token_secret.as_deref(), TOKEN_TTL_SECS),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn list_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }

    pub fn size(&self) -> usize {
        self.list_files().len()
    }

    /// Enqueue a document, refusing structural duplicates — unless the queue
    /// is empty, where a duplicate is accepted as a recovery path. Returns
    /// the record id.
    pub fn enqueue(&self, doc: &Doc) -> Option<String> {
        let sig = signature_for_doc(doc);
        if sig.is_empty() {
            return None;
        }
        if self.store.has(&sig) {
            if self.size() > 0 {
                debug!("refusing duplicate enqueue");
                return None;
            }
            info!("queue empty, accepting duplicate document");
        }
        self.store.add(&sig);

        let mut record = doc.clone();
        if record.created_at.is_none() {
            record.created_at = Some(epoch_seconds());
        }

        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!(error = %e, "Failed to create prefetch dir");
            return None;
        }
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().saturating_mul(1_000_000));
        let ident = format!("{}-{}", nanos, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        match self.write_record(&ident, &record) {
            Ok(()) => Some(ident),
            Err(e) => {
                warn!(error = %e, "Failed to persist prefetch record");
                None
            }
        }
    }

    fn record_path(&self, ident: &str) -> PathBuf {
        self.dir.join(format!("{ident}.json"))
    }

    fn write_record(&self, ident: &str, doc: &Doc) -> std::io::Result<()> {
        let path = self.record_path(ident);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(doc).unwrap_or_default())?;
        fs::rename(&tmp, &path)
    }

    /// Remove and return the head of the queue. Corrupt heads are deleted
    /// and the next record is tried.
    pub async fn dequeue(&self) -> Option<Doc> {
        let _guard = self.head_lock.lock().await;
        loop {
            let files = self.list_files();
            let path = files.first()?;
            let parsed = fs::read_to_string(path)
                .ok()
                .and_then(|text| serde_json::from_str::<Doc>(&text).ok());
            let _ = fs::remove_file(path);
            match parsed {
                Some(doc) => return Some(doc),
                None => {
                    warn!(path = %path.display(), "Dropping corrupt prefetch record");
                    continue;
                }
            }
        }
    }

    /// Previews of up to `n` queued documents, oldest first, each paired
    /// with a signed take-token.
    pub fn peek(&self, n: usize) -> Vec<Preview> {
        let mut previews = Vec::new();
        for path in self.list_files().into_iter().take(n) {
            let Some(doc) = fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<Doc>(&text).ok())
            else {
                continue;
            };
            let Some(ident) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(token) = self.signer.sign(ident) else {
                continue;
            };
            previews.push(Preview {
                id: token,
                title: doc.display_title(),
                category: doc.category.clone(),
                vibe: doc.vibe.clone(),
                created_at: doc.created_at,
            });
        }
        previews
    }

    /// Consume the record a previously issued token points at. Invalid,
    /// expired or stale tokens yield `None`.
    pub async fn take(&self, token: &str) -> Option<Doc> {
        let ident = match self.signer.verify(token) {
            Ok(ident) => ident,
            Err(e) => {
                debug!(error = %e, "Rejected take token");
                return None;
            }
        };
        let _guard = self.head_lock.lock().await;
        let path = self.record_path(&ident);
        let parsed = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Doc>(&text).ok())?;
        let _ = fs::remove_file(&path);
        Some(parsed)
    }

    // --- Record-level access used by the review worker ---

    pub fn load_record(&self, ident: &str) -> Option<Doc> {
        fs::read_to_string(self.record_path(ident))
            .ok()
            .and_then(|text| serde_json::from_str::<Doc>(&text).ok())
    }

    pub fn record_exists(&self, ident: &str) -> bool {
        self.record_path(ident).exists()
    }

    pub fn remove_record(&self, ident: &str) {
        let _ = fs::remove_file(self.record_path(ident));
    }

    pub fn overwrite_record(&self, ident: &str, doc: &Doc) -> bool {
        match self.write_record(ident, doc) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, ident, "Failed to overwrite prefetch record");
                false
            }
        }
    }
}

/// Clamp a requested fill count to the configured batch bounds.
pub fn clamp_batch(n: usize, min: usize, max: usize) -> usize {
    n.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftpage_common::doc::DocBody;
    use tempfile::tempdir;

    fn make_queue(dir: &Path) -> PrefetchQueue {
        let store = Arc::new(SignatureStore::new(dir.join("seen.json"), 100, true));
        PrefetchQueue::new(
            dir.join("pfq"),
            store,
            TokenSigner::new(Some("test-secret"), TOKEN_TTL_SECS),
        )
    }

    fn page(class: &str) -> Doc {
        Doc::full_page(format!(
            "<!doctype html><html><body><div class=\"{class}\"><p>text</p></div></body></html>"
        ))
    }

    #[tokio::test]
    async fn enqueue_dequeue_is_fifo() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        assert_eq!(queue.size(), 0);

        assert!(queue.enqueue(&page("a")).is_some());
        assert!(queue.enqueue(&page("b")).is_some());
        assert!(queue.enqueue(&page("c")).is_some());
        assert_eq!(queue.size(), 3);

        let order: Vec<String> = [
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
        ]
        .iter()
        .map(|d| d.primary_html().unwrap().to_string())
        .collect();
        assert!(order[0].contains("\"a\""));
        assert!(order[1].contains("\"b\""));
        assert!(order[2].contains("\"c\""));
        assert!(queue.dequeue().await.is_none());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn dequeued_doc_round_trips() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        let doc = page("roundtrip");
        queue.enqueue(&doc).unwrap();
        let out = queue.dequeue().await.unwrap();
        assert_eq!(out.body, doc.body);
        assert!(out.created_at.is_some());
    }

    #[tokio::test]
    async fn duplicates_refused_unless_queue_is_empty() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());

        assert!(queue.enqueue(&page("same")).is_some());
        // Queue non-empty: structural duplicate refused.
        assert!(queue.enqueue(&page("same")).is_none());

        queue.dequeue().await.unwrap();
        assert_eq!(queue.size(), 0);
        // Queue drained: the recovery path accepts the duplicate.
        assert!(queue.enqueue(&page("same")).is_some());
    }

    #[tokio::test]
    async fn corrupt_head_is_skipped() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        fs::create_dir_all(queue.dir()).unwrap();
        fs::write(queue.dir().join("0000000000-deadbeef.json"), "{corrupt").unwrap();
        queue.enqueue(&page("good")).unwrap();

        let doc = queue.dequeue().await.unwrap();
        assert!(doc.primary_html().unwrap().contains("good"));
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn peek_returns_previews_with_tokens() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        let mut doc = Doc::full_page(
            "<!doctype html><html><head><title>Neon Maze</title></head><body></body></html>",
        );
        doc.category = Some("playable-game".into());
        doc.vibe = Some("neon".into());
        queue.enqueue(&doc).unwrap();
        queue.enqueue(&page("other")).unwrap();

        let previews = queue.peek(10);
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].title, "Neon Maze");
        assert_eq!(previews[0].category.as_deref(), Some("playable-game"));
        assert_eq!(previews[0].vibe.as_deref(), Some("neon"));
        assert!(previews[0].created_at.is_some());
        assert_eq!(previews[1].title, "Untitled");

        // Queue untouched by peeking.
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn take_consumes_exactly_the_tokened_record() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        queue.enqueue(&page("first")).unwrap();
        queue.enqueue(&page("second")).unwrap();

        let previews = queue.peek(2);
        let doc = queue.take(&previews[1].id).await.unwrap();
        assert!(doc.primary_html().unwrap().contains("second"));
        assert_eq!(queue.size(), 1);

        // Re-using the token finds nothing.
        assert!(queue.take(&previews[1].id).await.is_none());
        // Garbage tokens are rejected.
        assert!(queue.take("bogus").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_dequeues_each_win_at_most_once() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(make_queue(dir.path()));
        for i in 0..4 {
            queue.enqueue(&page(&format!("c{i}"))).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.dequeue().await }));
        }
        let mut got = Vec::new();
        for handle in handles {
            if let Some(doc) = handle.await.unwrap() {
                got.push(doc.primary_html().unwrap().to_string());
            }
        }
        assert_eq!(got.len(), 4);
        let unique: std::collections::HashSet<_> = got.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn record_level_access_for_review() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        let id = queue.enqueue(&page("reviewable")).unwrap();

        assert!(queue.record_exists(&id));
        let loaded = queue.load_record(&id).unwrap();
        assert!(loaded.primary_html().unwrap().contains("reviewable"));

        let mut corrected = page("corrected");
        corrected.created_at = loaded.created_at;
        assert!(queue.overwrite_record(&id, &corrected));
        assert!(queue
            .load_record(&id)
            .unwrap()
            .primary_html()
            .unwrap()
            .contains("corrected"));

        queue.remove_record(&id);
        assert!(!queue.record_exists(&id));
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn clamp_batch_bounds() {
        assert_eq!(clamp_batch(1, 5, 20), 5);
        assert_eq!(clamp_batch(7, 5, 20), 7);
        assert_eq!(clamp_batch(50, 5, 20), 20);
    }

    #[tokio::test]
    async fn snippet_and_component_docs_round_trip_the_queue() {
        let dir = tempdir().unwrap();
        let queue = make_queue(dir.path());
        let snippet = driftpage_common::doc::normalize_doc(&serde_json::json!({
            "kind": "ndw_snippet_v1",
            "title": "Pulse",
            "html": "<button class=\"pulse\">Go</button>",
            "js": "document.querySelector('.pulse').onclick = () => {};",
        }))
        .unwrap();
        let components = driftpage_common::doc::normalize_doc(&serde_json::json!({
            "components": [{"id": "c1", "props": {"html": "<div class=\"w\">x</div>", "height": 420}}]
        }))
        .unwrap();

        queue.enqueue(&snippet).unwrap();
        queue.enqueue(&components).unwrap();

        let first = queue.dequeue().await.unwrap();
        assert!(matches!(first.body, DocBody::Snippet(_)));
        let second = queue.dequeue().await.unwrap();
        assert!(matches!(second.body, DocBody::Components { .. }));
    }
}
