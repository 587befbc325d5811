//! Remote document store abstraction.
//!
//! The hosted document database is reached only through [`RemoteStore`].
//! Writes are async; change feeds are opened synchronously and deliver
//! [`FeedEvent`]s on a [`FeedStream`] until the stream is dropped.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use shopfloor_shared::protocol::{Collection, FeedEvent, FeedKey, RemoteDocument};
use shopfloor_shared::ChatError;

/// Receiving end of one live change feed. Dropping it closes the feed.
#[derive(Debug)]
pub struct FeedStream {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl FeedStream {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<FeedEvent>, FeedStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, FeedStream { rx })
    }

    /// Next delivery, or `None` once the remote side has closed the feed.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one document. `Ok(None)` when it does not exist.
    async fn get(&self, collection: &Collection, id: &str)
        -> Result<Option<RemoteDocument>, ChatError>;

    /// All documents of a collection, in insertion order.
    async fn list(&self, collection: &Collection) -> Result<Vec<RemoteDocument>, ChatError>;

    /// Create or overwrite a document under a caller-chosen id.
    async fn set(&self, collection: &Collection, doc: RemoteDocument) -> Result<(), ChatError>;

    /// Create a document under a server-assigned id and return it as stored.
    async fn add(&self, collection: &Collection, data: Value) -> Result<RemoteDocument, ChatError>;

    /// Merge `fields` into an existing document. `NotFound` when absent.
    async fn update(
        &self,
        collection: &Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ChatError>;

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), ChatError>;

    /// Open the change feed for `key`. The first delivery is a snapshot of
    /// every matching document.
    fn listen(&self, key: &FeedKey) -> Result<FeedStream, ChatError>;
}
