//! In-process [`RemoteStore`] backend.
//!
//! Keeps every collection in memory and pushes change-feed snapshots to all
//! open feeds on each write. Used by the tests and for local development;
//! it also supports fault injection (failing writes, denied or broken
//! feeds) and holding message sends in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use shopfloor_shared::protocol::{
    ChangeKind, Collection, DocChange, FeedEvent, FeedKey, RemoteDocument, Snapshot,
};
use shopfloor_shared::ChatError;

use crate::remote::{FeedStream, RemoteStore};

#[derive(Debug, Clone)]
struct StoredDoc {
    seq: u64,
    data: Value,
}

#[derive(Debug)]
struct Feed {
    key: FeedKey,
    tx: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Collection, HashMap<String, StoredDoc>>,
    next_seq: u64,
    next_id: u64,
    feeds: Vec<Feed>,
    failing_writes: usize,
    denied_feeds: HashSet<FeedKey>,
    listen_calls: HashMap<FeedKey, usize>,
    writes: usize,
}

impl Inner {
    /// Store `data` under `id` and notify matching feeds.
    fn put(&mut self, collection: &Collection, id: String, data: Value) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let docs = self.collections.entry(collection.clone()).or_default();
        let kind = match docs.get_mut(&id) {
            Some(existing) => {
                existing.data = data.clone();
                ChangeKind::Modified
            }
            None => {
                docs.insert(id.clone(), StoredDoc { seq, data: data.clone() });
                ChangeKind::Added
            }
        };
        self.broadcast(collection, kind, RemoteDocument::new(id, data));
    }

    fn broadcast(&mut self, collection: &Collection, kind: ChangeKind, doc: RemoteDocument) {
        self.feeds.retain(|feed| !feed.tx.is_closed());
        for feed in &self.feeds {
            if &feed.key.collection() != collection || !feed.key.matches(&doc) {
                continue;
            }
            let snapshot = Snapshot {
                key: feed.key.clone(),
                changes: vec![DocChange {
                    kind,
                    doc: doc.clone(),
                }],
            };
            let _ = feed.tx.send(FeedEvent::Snapshot(snapshot));
        }
    }

    fn documents(&self, collection: &Collection) -> Vec<RemoteDocument> {
        let mut docs: Vec<_> = self
            .collections
            .get(collection)
            .map(|docs| docs.iter().collect())
            .unwrap_or_default();
        docs.sort_by_key(|(_, doc)| doc.seq);
        docs.into_iter()
            .map(|(id, doc)| RemoteDocument::new(id.clone(), doc.data.clone()))
            .collect()
    }

    /// Consume one injected write failure, if any is armed.
    fn take_failure(&mut self) -> Result<(), ChatError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(ChatError::network("injected write failure"));
        }
        self.writes += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
    /// `true` while message sends are held before reaching the store.
    send_gate: watch::Sender<bool>,
    /// `true` while responses to stored message sends are held back.
    response_gate: watch::Sender<bool>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (send_gate, _) = watch::channel(false);
        let (response_gate, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner::default()),
            send_gate,
            response_gate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a document without going through the async API.
    pub fn seed(&self, collection: Collection, doc: RemoteDocument) {
        self.lock().put(&collection, doc.id, doc.data);
    }

    pub fn document(&self, collection: &Collection, id: &str) -> Option<RemoteDocument> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| RemoteDocument::new(id, doc.data.clone()))
    }

    pub fn documents(&self, collection: &Collection) -> Vec<RemoteDocument> {
        self.lock().documents(collection)
    }

    /// Make the next `n` writes fail with a network error.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failing_writes = n;
    }

    /// Refuse future `listen` calls for `key`.
    pub fn deny_feed(&self, key: FeedKey) {
        self.lock().denied_feeds.insert(key);
    }

    /// Push an error to every open feed of `key`.
    pub fn break_feed(&self, key: &FeedKey, error: ChatError) {
        let mut inner = self.lock();
        inner.feeds.retain(|feed| !feed.tx.is_closed());
        for feed in inner.feeds.iter().filter(|f| &f.key == key) {
            let _ = feed.tx.send(FeedEvent::Error(error.clone()));
        }
    }

    /// Keep message sends in flight until [`InMemoryRemote::release_sends`].
    pub fn hold_sends(&self) {
        self.send_gate.send_replace(true);
    }

    pub fn release_sends(&self) {
        self.send_gate.send_replace(false);
    }

    /// Store message sends and notify feeds, but hold the response until
    /// [`InMemoryRemote::release_responses`].
    pub fn hold_responses(&self) {
        self.response_gate.send_replace(true);
    }

    pub fn release_responses(&self) {
        self.response_gate.send_replace(false);
    }

    /// Number of feeds currently open for `key`.
    pub fn open_feeds(&self, key: &FeedKey) -> usize {
        let mut inner = self.lock();
        inner.feeds.retain(|feed| !feed.tx.is_closed());
        inner.feeds.iter().filter(|f| &f.key == key).count()
    }

    /// Number of `listen` calls made for `key` so far.
    pub fn listen_calls(&self, key: &FeedKey) -> usize {
        self.lock().listen_calls.get(key).copied().unwrap_or(0)
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    async fn wait_for_gate(gate: &watch::Sender<bool>) {
        let mut gate = gate.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = gate.wait_for(|held| !*held).await;
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get(
        &self,
        collection: &Collection,
        id: &str,
    ) -> Result<Option<RemoteDocument>, ChatError> {
        Ok(self.document(collection, id))
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<RemoteDocument>, ChatError> {
        Ok(self.documents(collection))
    }

    async fn set(&self, collection: &Collection, doc: RemoteDocument) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        inner.put(collection, doc.id, doc.data);
        Ok(())
    }

    async fn add(&self, collection: &Collection, data: Value) -> Result<RemoteDocument, ChatError> {
        let is_message = matches!(collection, Collection::Messages(_));
        if is_message {
            Self::wait_for_gate(&self.send_gate).await;
        }
        let id = {
            let mut inner = self.lock();
            inner.take_failure()?;
            inner.next_id += 1;
            let id = format!("doc-{}", inner.next_id);
            inner.put(collection, id.clone(), data.clone());
            id
        };
        debug!(collection = %collection, id = %id, "document added");
        if is_message {
            Self::wait_for_gate(&self.response_gate).await;
        }
        Ok(RemoteDocument::new(id, data))
    }

    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ChatError> {
        let mut inner = self.lock();
        let mut data = inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.data.clone())
            .ok_or_else(|| ChatError::not_found(format!("{collection}/{id}")))?;
        inner.take_failure()?;
        if let Value::Object(map) = &mut data {
            map.extend(fields);
        }
        inner.put(collection, id.to_string(), data);
        Ok(())
    }

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), ChatError> {
        let mut inner = self.lock();
        inner.take_failure()?;
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if let Some(doc) = removed {
            inner.broadcast(collection, ChangeKind::Removed, RemoteDocument::new(id, doc.data));
        }
        Ok(())
    }

    fn listen(&self, key: &FeedKey) -> Result<FeedStream, ChatError> {
        let mut inner = self.lock();
        *inner.listen_calls.entry(key.clone()).or_insert(0) += 1;
        if inner.denied_feeds.contains(key) {
            return Err(ChatError::denied(format!("feed {key}")));
        }

        let (tx, stream) = FeedStream::channel();
        let changes = inner
            .documents(&key.collection())
            .into_iter()
            .filter(|doc| key.matches(doc))
            .map(|doc| DocChange {
                kind: ChangeKind::Added,
                doc,
            })
            .collect();
        let _ = tx.send(FeedEvent::Snapshot(Snapshot {
            key: key.clone(),
            changes,
        }));
        inner.feeds.push(Feed {
            key: key.clone(),
            tx,
        });
        Ok(stream)
    }
}
