//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Transactions use optimistic concurrency: reads record the version they
//! observed, writes are buffered, and commit validates every observed
//! version before applying the writes atomically.

use crate::document::{ensure_object, matches_filter, merge_patch, Document};
use crate::repository::DocumentSession;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;
use unitwork_exec::{Session, SessionId, SessionProvider, StoreError};
use uuid::Uuid;

/// (collection, id)
type Key = (String, String);

/// Committed document state; `body == None` is a tombstone.
struct Versioned {
    body: Option<Value>,
    version: u64,
}

#[derive(Default)]
struct Shared {
    collections: RwLock<HashMap<String, BTreeMap<String, Versioned>>>,
    commit_seq: AtomicU64,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
    commit_failures: Mutex<VecDeque<StoreError>>,
    session_failures: Mutex<VecDeque<StoreError>>,
}

impl Shared {
    /// Committed body and version (version 0 = never written).
    fn committed(&self, collection: &str, id: &str) -> (Option<Value>, u64) {
        let collections = self.collections.read().unwrap();
        match collections.get(collection).and_then(|docs| docs.get(id)) {
            Some(doc) => (doc.body.clone(), doc.version),
            None => (None, 0),
        }
    }
}

/// In-memory document store for testing
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document outside any transaction (test setup / seeding)
    pub fn seed(&self, collection: &str, id: &str, body: Value) -> Result<(), StoreError> {
        ensure_object(&body)?;
        let version = self.shared.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut collections = self.shared.collections.write().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Versioned { body: Some(body), version });
        Ok(())
    }

    /// Read the committed state of a document outside any transaction
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        let (body, version) = self.shared.committed(collection, id);
        body.map(|body| Document { id: id.to_string(), body, version })
    }

    /// Get the number of live documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        let collections = self.shared.collections.read().unwrap();
        collections
            .get(collection)
            .map(|docs| docs.values().filter(|d| d.body.is_some()).count())
            .unwrap_or(0)
    }

    /// Queue an error for the next commit (the transaction is discarded)
    pub fn inject_commit_failure(&self, err: StoreError) {
        self.shared.commit_failures.lock().unwrap().push_back(err);
    }

    /// Queue an error for the next `start_session`
    pub fn fail_next_session(&self, err: StoreError) {
        self.shared.session_failures.lock().unwrap().push_back(err);
    }

    /// Sessions started so far
    pub fn sessions_started(&self) -> u64 {
        self.shared.sessions_started.load(Ordering::SeqCst)
    }

    /// Sessions ended so far
    pub fn sessions_ended(&self) -> u64 {
        self.shared.sessions_ended.load(Ordering::SeqCst)
    }

    /// Sessions started but not yet ended
    pub fn live_sessions(&self) -> u64 {
        self.sessions_started().saturating_sub(self.sessions_ended())
    }

    /// Successful commits
    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Explicit aborts plus transactions discarded by `end_session`
    pub fn aborts(&self) -> u64 {
        self.shared.aborts.load(Ordering::SeqCst)
    }

    /// Commits rejected because of a write conflict
    pub fn conflicts(&self) -> u64 {
        self.shared.conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MemoryStore {
    type Session = MemorySession;

    async fn start_session(&self) -> Result<MemorySession, StoreError> {
        if let Some(err) = self.shared.session_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            id: Uuid::now_v7(),
            shared: Arc::clone(&self.shared),
            txn: None,
            ended: false,
        })
    }
}

// =============================================================================
// Session
// =============================================================================

/// Open transaction state
#[derive(Default)]
struct Txn {
    /// Version and body observed on first read of each key
    reads: HashMap<Key, (u64, Option<Value>)>,
    /// Buffered writes; `None` deletes
    writes: HashMap<Key, Option<Value>>,
}

/// Session on a [`MemoryStore`]
pub struct MemorySession {
    id: SessionId,
    shared: Arc<Shared>,
    txn: Option<Txn>,
    ended: bool,
}

impl MemorySession {
    fn txn(&mut self) -> Result<&mut Txn, StoreError> {
        if self.ended {
            return Err(StoreError::InvalidState("session ended".to_string()));
        }
        self.txn
            .as_mut()
            .ok_or_else(|| StoreError::InvalidState("no transaction in progress".to_string()))
    }

    /// Value of a key as seen by this transaction.
    ///
    /// The first read pins a snapshot of the committed state; later reads
    /// return the buffered write or that snapshot, never a newer commit.
    fn read(&mut self, collection: &str, id: &str) -> Result<(Option<Value>, u64), StoreError> {
        let key = (collection.to_string(), id.to_string());
        let shared = Arc::clone(&self.shared);
        let txn = self.txn()?;
        let (observed, snapshot) = txn
            .reads
            .entry(key.clone())
            .or_insert_with(|| {
                let (body, version) = shared.committed(collection, id);
                (version, body)
            })
            .clone();

        match txn.writes.get(&key) {
            Some(buffered) => Ok((buffered.clone(), observed)),
            None => Ok((snapshot, observed)),
        }
    }

    fn write(&mut self, collection: &str, id: &str, body: Option<Value>) -> Result<(), StoreError> {
        let txn = self.txn()?;
        txn.writes.insert((collection.to_string(), id.to_string()), body);
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn start_transaction(&mut self) -> Result<(), StoreError> {
        if self.ended {
            return Err(StoreError::InvalidState("session ended".to_string()));
        }
        if self.txn.is_some() {
            return Err(StoreError::InvalidState("transaction already in progress".to_string()));
        }
        self.txn = Some(Txn::default());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.txn()?;
        let txn = self.txn.take().unwrap_or_default();

        if let Some(err) = self.shared.commit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut collections = self.shared.collections.write().unwrap();

        for ((collection, id), (observed, _)) in &txn.reads {
            let current = collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|doc| doc.version)
                .unwrap_or(0);

            if current != *observed {
                self.shared.conflicts.fetch_add(1, Ordering::SeqCst);
                debug!(session_id = %self.id, %collection, %id, observed, current, "Write conflict");
                return Err(StoreError::WriteConflict(format!("{}/{}", collection, id)));
            }
        }

        if !txn.writes.is_empty() {
            let version = self.shared.commit_seq.fetch_add(1, Ordering::SeqCst) + 1;
            for ((collection, id), body) in txn.writes {
                collections.entry(collection).or_default().insert(id, Versioned { body, version });
            }
        }

        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), StoreError> {
        self.txn()?;
        self.txn = None;
        self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end_session(&mut self) {
        if self.ended {
            return;
        }
        if self.txn.take().is_some() {
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
        self.ended = true;
        self.shared.sessions_ended.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.end_session();
    }
}

// =============================================================================
// Document Repository Implementation
// =============================================================================

#[async_trait]
impl DocumentSession for MemorySession {
    async fn insert_one(&mut self, collection: &str, id: &str, body: Value) -> Result<(), StoreError> {
        ensure_object(&body)?;
        let (existing, _) = self.read(collection, id)?;
        if existing.is_some() {
            return Err(StoreError::duplicate(collection, id));
        }
        self.write(collection, id, Some(body))
    }

    async fn find_one(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let (body, version) = self.read(collection, id)?;
        Ok(body.map(|body| Document { id: id.to_string(), body, version }))
    }

    async fn find(&mut self, collection: &str, filter: &Value) -> Result<Vec<Document>, StoreError> {
        self.txn()?;

        // Committed ids plus ids only written in this transaction
        let mut ids: Vec<String> = {
            let collections = self.shared.collections.read().unwrap();
            collections
                .get(collection)
                .map(|docs| docs.keys().cloned().collect())
                .unwrap_or_default()
        };
        if let Some(txn) = self.txn.as_ref() {
            ids.extend(
                txn.writes
                    .keys()
                    .filter(|(c, id)| c == collection && !ids.contains(id))
                    .map(|(_, id)| id.clone())
                    .collect::<Vec<_>>(),
            );
        }
        ids.sort();

        let mut found = Vec::new();
        for id in ids {
            if let (Some(body), version) = self.read(collection, &id)? {
                if matches_filter(&body, filter) {
                    found.push(Document { id, body, version });
                }
            }
        }
        Ok(found)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Document, StoreError> {
        let (existing, version) = self.read(collection, id)?;
        let mut body = existing.ok_or_else(|| StoreError::not_found(collection, id))?;
        merge_patch(&mut body, &patch)?;
        self.write(collection, id, Some(body.clone()))?;
        Ok(Document { id: id.to_string(), body, version })
    }

    async fn replace_one(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<Document, StoreError> {
        ensure_object(&body)?;
        let (existing, version) = self.read(collection, id)?;
        if existing.is_none() {
            return Err(StoreError::not_found(collection, id));
        }
        self.write(collection, id, Some(body.clone()))?;
        Ok(Document { id: id.to_string(), body, version })
    }

    async fn delete_one(&mut self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let (existing, _) = self.read(collection, id)?;
        if existing.is_none() {
            return Ok(false);
        }
        self.write(collection, id, None)?;
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn begin(store: &MemoryStore) -> MemorySession {
        let mut session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_insert_and_find_after_commit() {
        let store = MemoryStore::new();

        let mut session = begin(&store).await;
        session.insert_one("users", "u1", json!({"name": "Ada"})).await.unwrap();

        // Not visible outside the transaction until commit
        assert!(store.get("users", "u1").is_none());

        session.commit().await.unwrap();
        session.end_session();

        let doc = store.get("users", "u1").unwrap();
        assert_eq!(doc.body["name"], "Ada");
        assert_eq!(store.document_count("users"), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_reads_see_own_writes() {
        let store = MemoryStore::new();
        store.seed("users", "u1", json!({"name": "Ada", "age": 36})).unwrap();

        let mut session = begin(&store).await;
        session.update_one("users", "u1", json!({"age": 37})).await.unwrap();
        session.insert_one("users", "u2", json!({"name": "Alan", "age": 41})).await.unwrap();

        let u1 = session.find_one("users", "u1").await.unwrap().unwrap();
        assert_eq!(u1.body, json!({"name": "Ada", "age": 37}));

        let all = session.find("users", &json!({})).await.unwrap();
        assert_eq!(all.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), vec!["u1", "u2"]);

        let alan = session.find("users", &json!({"name": "Alan"})).await.unwrap();
        assert_eq!(alan.len(), 1);

        // Committed state untouched
        assert_eq!(store.get("users", "u1").unwrap().body["age"], 36);
        session.end_session();
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = MemoryStore::new();

        let mut session = begin(&store).await;
        session.insert_one("users", "u1", json!({"name": "Ada"})).await.unwrap();
        session.abort().await.unwrap();
        session.end_session();

        assert!(store.get("users", "u1").is_none());
        assert_eq!(store.aborts(), 1);
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn test_end_session_discards_open_transaction() {
        let store = MemoryStore::new();

        let mut session = begin(&store).await;
        session.insert_one("users", "u1", json!({"name": "Ada"})).await.unwrap();
        drop(session);

        assert!(store.get("users", "u1").is_none());
        assert_eq!(store.aborts(), 1);
        assert_eq!(store.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_update_conflicts() {
        let store = MemoryStore::new();
        store.seed("accounts", "a", json!({"balance": 100})).unwrap();

        let mut first = begin(&store).await;
        let mut second = begin(&store).await;

        first.update_one("accounts", "a", json!({"balance": 90})).await.unwrap();
        second.update_one("accounts", "a", json!({"balance": 80})).await.unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;

        assert!(matches!(result, Err(StoreError::WriteConflict(_))));
        assert_eq!(store.get("accounts", "a").unwrap().body["balance"], 90);
        assert_eq!(store.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_read_only_conflict_detected() {
        let store = MemoryStore::new();
        store.seed("accounts", "a", json!({"balance": 100})).unwrap();

        let mut reader = begin(&store).await;
        reader.find_one("accounts", "a").await.unwrap();
        reader.insert_one("audit", "x", json!({"saw": 100})).await.unwrap();

        let mut writer = begin(&store).await;
        writer.update_one("accounts", "a", json!({"balance": 0})).await.unwrap();
        writer.commit().await.unwrap();

        assert!(matches!(reader.commit().await, Err(StoreError::WriteConflict(_))));
        assert!(store.get("audit", "x").is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_and_missing_update() {
        let store = MemoryStore::new();
        store.seed("users", "u1", json!({"name": "Ada"})).unwrap();

        let mut session = begin(&store).await;
        let dup = session.insert_one("users", "u1", json!({"name": "Eve"})).await;
        let missing = session.update_one("users", "nope", json!({"x": 1})).await;
        let not_object = session.insert_one("users", "u2", json!("Eve")).await;

        assert!(matches!(dup, Err(StoreError::Duplicate { .. })));
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        assert!(matches!(not_object, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_delete_and_reinsert() {
        let store = MemoryStore::new();
        store.seed("users", "u1", json!({"name": "Ada"})).unwrap();

        let mut session = begin(&store).await;
        assert!(session.delete_one("users", "u1").await.unwrap());
        assert!(!session.delete_one("users", "u1").await.unwrap());
        assert!(session.find_one("users", "u1").await.unwrap().is_none());
        session.commit().await.unwrap();

        assert!(store.get("users", "u1").is_none());
        assert_eq!(store.document_count("users"), 0);

        let mut session = begin(&store).await;
        session.insert_one("users", "u1", json!({"name": "Grace"})).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(store.get("users", "u1").unwrap().body["name"], "Grace");
    }

    #[tokio::test]
    async fn test_operations_require_transaction() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();

        let result = session.find_one("users", "u1").await;
        assert!(matches!(result, Err(StoreError::InvalidState(_))));
        assert!(matches!(session.commit().await, Err(StoreError::InvalidState(_))));

        session.start_transaction().await.unwrap();
        assert!(matches!(session.start_transaction().await, Err(StoreError::InvalidState(_))));

        session.end_session();
        session.end_session();
        assert_eq!(store.sessions_ended(), 1);
        assert!(matches!(session.start_transaction().await, Err(StoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = MemoryStore::new();
        store.inject_commit_failure(StoreError::Timeout("commit".to_string()));

        let mut session = begin(&store).await;
        session.insert_one("users", "u1", json!({"name": "Ada"})).await.unwrap();

        assert!(matches!(session.commit().await, Err(StoreError::Timeout(_))));
        assert!(store.get("users", "u1").is_none());
    }

    #[tokio::test]
    async fn test_repeat_read_returns_first_snapshot() {
        let store = MemoryStore::new();
        store.seed("accounts", "a", json!({"balance": 100})).unwrap();

        let mut session = begin(&store).await;
        let first = session.find_one("accounts", "a").await.unwrap().unwrap();

        // Another writer commits between the two reads
        store.seed("accounts", "a", json!({"balance": 0})).unwrap();

        let second = session.find_one("accounts", "a").await.unwrap().unwrap();
        assert_eq!(second.body, first.body);
        assert_eq!(second.version, first.version);

        let listed = session.find("accounts", &json!({})).await.unwrap();
        assert_eq!(listed[0].body["balance"], 100);

        assert!(matches!(session.commit().await, Err(StoreError::WriteConflict(_))));
        assert_eq!(store.get("accounts", "a").unwrap().body["balance"], 0);
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    #[tokio::test]
    async fn test_typed_insert_and_find() {
        let store = MemoryStore::new();
        let ada = User { name: "Ada".to_string(), age: 36 };

        let mut session = begin(&store).await;
        session.insert_as("users", "u1", &ada).await.unwrap();

        let found: Option<User> = session.find_one_as("users", "u1").await.unwrap();
        assert_eq!(found, Some(ada));

        let missing: Option<User> = session.find_one_as("users", "u2").await.unwrap();
        assert!(missing.is_none());

        session.commit().await.unwrap();
        assert_eq!(store.get("users", "u1").unwrap().body, json!({"name": "Ada", "age": 36}));
    }

    #[tokio::test]
    async fn test_typed_find_rejects_wrong_shape() {
        let store = MemoryStore::new();
        store.seed("users", "u1", json!({"name": "Ada"})).unwrap();

        let mut session = begin(&store).await;
        let result: Result<Option<User>, _> = session.find_one_as("users", "u1").await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_live_sessions_tracks_open_sessions() {
        let store = MemoryStore::new();
        assert_eq!(store.live_sessions(), 0);

        let first = store.start_session().await.unwrap();
        let second = store.start_session().await.unwrap();
        assert_eq!(store.live_sessions(), 2);

        drop(first);
        drop(second);
        assert_eq!(store.live_sessions(), 0);
        assert_eq!(store.sessions_started(), 2);
    }
}
