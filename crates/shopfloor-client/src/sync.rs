//! Remote sync manager.
//!
//! Keeps at most one remote change feed open per [`FeedKey`]. Subscribers
//! of the same key share the feed; the feed's reference count is its number
//! of listeners. The last [`Subscription`] to go away closes the feed.
//!
//! Each open feed is drained by one pump task. A snapshot is decoded into
//! store changes and applied as a single [`Change::Batch`], so snapshots of
//! one feed are merged in delivery order. Documents that fail validation
//! are dropped with a warning; a channel that fails validation is also
//! purged from the store. A feed error marks only that feed degraded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use shopfloor_shared::protocol::{ChangeKind, DocChange, FeedEvent, FeedKey, RemoteDocument, Snapshot};
use shopfloor_shared::{ChannelId, ChatError, UserId};
use shopfloor_store::decode::{
    decode_category, decode_channel, decode_dm_channel, decode_message, decode_notification,
    decode_typing, decode_user,
};
use shopfloor_store::{Change, Effect, EntityKind, Records, SharedStore, StoreError};

use crate::remote::{FeedStream, RemoteStore};

/// Health of one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Live,
    /// The feed failed and delivers nothing more until reconnected.
    Degraded(ChatError),
}

/// What one merged snapshot did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedUpdate {
    pub key: FeedKey,
    pub effect: Effect,
    /// Document changes in the snapshot.
    pub changes: usize,
    /// Documents dropped by validation.
    pub rejected: usize,
}

/// Receives notifications for one feed key. Called after the store has
/// been updated, outside of any lock.
pub trait FeedListener: Send + Sync {
    fn on_update(&self, update: &FeedUpdate);

    fn on_error(&self, key: &FeedKey, error: &ChatError) {
        let _ = (key, error);
    }
}

impl<F> FeedListener for F
where
    F: Fn(&FeedUpdate) + Send + Sync,
{
    fn on_update(&self, update: &FeedUpdate) {
        self(update)
    }
}

type ListenerRef = Arc<dyn FeedListener>;

struct FeedEntry {
    /// Identifies the pump task currently serving this entry.
    generation: u64,
    listeners: Vec<(u64, ListenerRef)>,
    status: FeedStatus,
    /// Dropping this stops the pump task.
    _shutdown: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Registry {
    feeds: HashMap<FeedKey, FeedEntry>,
    next_id: u64,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct SyncInner {
    remote: Arc<dyn RemoteStore>,
    store: SharedStore,
    session: UserId,
    typing_ttl: chrono::Duration,
    registry: Mutex<Registry>,
}

#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncInner>,
}

impl SyncManager {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: SharedStore,
        session: UserId,
        typing_ttl: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                remote,
                store,
                session,
                typing_ttl,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register `listener` for `key`, opening the remote feed if this is the
    /// first listener. Must be called from within a Tokio runtime for the
    /// feed to be served; otherwise it is registered as degraded.
    pub fn subscribe(&self, key: FeedKey, listener: impl FeedListener + 'static) -> Subscription {
        let listener: ListenerRef = Arc::new(listener);
        let mut registry = self.inner.registry();
        let id = registry.next_id();

        if let Some(entry) = registry.feeds.get_mut(&key) {
            entry.listeners.push((id, listener));
            debug!(feed = %key, listeners = entry.listeners.len(), "joined open feed");
        } else {
            let (status, shutdown) = self.inner.open(&key, id);
            info!(feed = %key, status = ?status, "feed opened");
            registry.feeds.insert(
                key.clone(),
                FeedEntry {
                    generation: id,
                    listeners: vec![(id, listener)],
                    status,
                    _shutdown: shutdown,
                },
            );
        }

        Subscription {
            inner: Arc::downgrade(&self.inner),
            key,
            id,
            active: true,
        }
    }

    /// Reopen a degraded feed, keeping its listeners.
    pub fn reconnect(&self, key: &FeedKey) -> Option<FeedStatus> {
        let mut registry = self.inner.registry();
        let generation = registry.next_id();
        let entry = registry.feeds.get_mut(key)?;
        if entry.status == FeedStatus::Live {
            return Some(FeedStatus::Live);
        }
        let (status, shutdown) = self.inner.open(key, generation);
        info!(feed = %key, status = ?status, "feed reconnected");
        entry.generation = generation;
        entry.status = status.clone();
        entry._shutdown = shutdown;
        Some(status)
    }

    pub fn feed_status(&self, key: &FeedKey) -> Option<FeedStatus> {
        self.inner
            .registry()
            .feeds
            .get(key)
            .map(|entry| entry.status.clone())
    }

    /// Number of listeners sharing the feed of `key`.
    pub fn listener_count(&self, key: &FeedKey) -> usize {
        self.inner
            .registry()
            .feeds
            .get(key)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    pub fn active_feeds(&self) -> Vec<FeedKey> {
        self.inner.registry().feeds.keys().cloned().collect()
    }
}

impl SyncInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the remote feed for `key` and spawn its pump task.
    fn open(
        self: &Arc<Self>,
        key: &FeedKey,
        generation: u64,
    ) -> (FeedStatus, Option<oneshot::Sender<()>>) {
        let stream = match self.remote.listen(key) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(feed = %key, error = %e, "failed to open feed");
                return (FeedStatus::Degraded(e), None);
            }
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(feed = %key, "no async runtime, feed not served");
                return (
                    FeedStatus::Degraded(ChatError::network("no async runtime")),
                    None,
                );
            }
        };
        let (tx, rx) = oneshot::channel();
        handle.spawn(pump(Arc::downgrade(self), key.clone(), generation, stream, rx));
        (FeedStatus::Live, Some(tx))
    }

    /// Listeners of `key` if `generation` still serves it.
    fn listeners(&self, key: &FeedKey, generation: u64) -> Option<Vec<ListenerRef>> {
        let registry = self.registry();
        let entry = registry.feeds.get(key)?;
        (entry.generation == generation)
            .then(|| entry.listeners.iter().map(|(_, l)| l.clone()).collect())
    }

    /// Returns `false` once the feed has been torn down or replaced.
    fn merge(&self, key: &FeedKey, generation: u64, snapshot: Snapshot, primed: bool) -> bool {
        if self.listeners(key, generation).is_none() {
            return false;
        }
        let changes = snapshot.changes.len();
        let (batch, rejected) = snapshot_changes(
            key,
            snapshot,
            primed,
            &self.session,
            self.typing_ttl,
        );
        let effect = self.store.apply(Change::Batch(batch));
        debug!(feed = %key, changes, rejected, effect = ?effect, "snapshot merged");

        let Some(listeners) = self.listeners(key, generation) else {
            return false;
        };
        let update = FeedUpdate {
            key: key.clone(),
            effect,
            changes,
            rejected,
        };
        for listener in listeners {
            listener.on_update(&update);
        }
        true
    }

    fn degrade(&self, key: &FeedKey, generation: u64, error: ChatError) {
        let listeners = {
            let mut registry = self.registry();
            let Some(entry) = registry.feeds.get_mut(key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.status = FeedStatus::Degraded(error.clone());
            entry._shutdown = None;
            entry.listeners.iter().map(|(_, l)| l.clone()).collect::<Vec<_>>()
        };
        warn!(feed = %key, error = %error, "feed degraded");
        for listener in listeners {
            listener.on_error(key, &error);
        }
    }

    fn unsubscribe(&self, key: &FeedKey, id: u64) {
        let mut registry = self.registry();
        let Some(entry) = registry.feeds.get_mut(key) else {
            return;
        };
        entry.listeners.retain(|(listener_id, _)| *listener_id != id);
        if entry.listeners.is_empty() {
            registry.feeds.remove(key);
            info!(feed = %key, "feed closed");
        } else {
            debug!(feed = %key, listeners = entry.listeners.len(), "listener removed");
        }
    }
}

async fn pump(
    inner: Weak<SyncInner>,
    key: FeedKey,
    generation: u64,
    mut stream: FeedStream,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut primed = false;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = stream.next() => {
                let Some(inner) = inner.upgrade() else { break };
                match event {
                    Some(FeedEvent::Snapshot(snapshot)) => {
                        if !inner.merge(&key, generation, snapshot, primed) {
                            break;
                        }
                        primed = true;
                    }
                    Some(FeedEvent::Error(error)) => {
                        inner.degrade(&key, generation, error);
                        break;
                    }
                    None => {
                        inner.degrade(&key, generation, ChatError::network("feed closed by remote"));
                        break;
                    }
                }
            }
        }
    }
    debug!(feed = %key, "feed pump stopped");
}

/// A registered feed listener. Cancelling or dropping it removes the
/// listener immediately.
#[derive(Debug)]
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Weak<SyncInner>,
    key: FeedKey,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            if let Some(inner) = self.inner.upgrade() {
                inner.unsubscribe(&self.key, self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Snapshot decoding
// ---------------------------------------------------------------------------

/// Turn one snapshot into store changes, in delivery order. Returns the
/// changes and the number of rejected documents.
pub(crate) fn snapshot_changes(
    key: &FeedKey,
    snapshot: Snapshot,
    primed: bool,
    session: &UserId,
    typing_ttl: chrono::Duration,
) -> (Vec<Change>, usize) {
    let mut batch = Vec::with_capacity(snapshot.changes.len() + 1);
    let mut rejected = 0;
    let mut unread = 0u32;

    for DocChange { kind, doc } in snapshot.changes {
        let change = match key {
            FeedKey::Channels => entity_change(kind, doc, EntityKind::Channel, true, &mut rejected, |d| {
                decode_channel(d).map(|c| Records::Channels(vec![c]))
            }),
            FeedKey::Categories => entity_change(kind, doc, EntityKind::Category, false, &mut rejected, |d| {
                decode_category(d).map(|c| Records::Categories(vec![c]))
            }),
            FeedKey::Users => entity_change(kind, doc, EntityKind::User, false, &mut rejected, |d| {
                decode_user(d).map(|u| Records::Users(vec![u]))
            }),
            FeedKey::Notifications(_) => {
                entity_change(kind, doc, EntityKind::Notification, false, &mut rejected, |d| {
                    decode_notification(d).map(|n| Records::Notifications(vec![n]))
                })
            }
            FeedKey::DirectMessages(_) => {
                entity_change(kind, doc, EntityKind::DirectMessageChannel, false, &mut rejected, |d| {
                    decode_dm_channel(d).map(|dm| Records::DirectMessageChannels(vec![dm]))
                })
            }
            FeedKey::Messages(channel) => {
                let counts = primed && kind == ChangeKind::Added;
                entity_change(kind, doc, EntityKind::Message, false, &mut rejected, |d| {
                    let message = decode_message(channel, d)?;
                    if counts && &message.author_id != session && !message.is_deleted {
                        unread += 1;
                    }
                    Ok(Records::Messages(vec![message]))
                })
            }
            FeedKey::Typing(_) => match decode_typing(&doc) {
                Ok(mut entry) => {
                    if kind == ChangeKind::Removed {
                        entry.is_typing = false;
                    }
                    Some(Change::SetTyping(vec![entry]))
                }
                Err(e) => {
                    warn!(feed = %key, error = %e, "dropping malformed typing document");
                    rejected += 1;
                    None
                }
            },
        };
        batch.extend(change);
    }

    if unread > 0 {
        if let FeedKey::Messages(channel) = key {
            batch.push(unread_change(channel, session, unread));
        }
    }
    if key.is_ephemeral() {
        batch.push(Change::ExpireTyping {
            before: Utc::now() - typing_ttl,
        });
    }
    (batch, rejected)
}

fn unread_change(channel: &ChannelId, user: &UserId, by: u32) -> Change {
    Change::IncrementUnread {
        channel_id: channel.clone(),
        user_id: user.clone(),
        by,
    }
}

/// Change for one entity document. Rejected documents are dropped, or
/// removed from the store when `purge_rejected` is set.
fn entity_change(
    kind: ChangeKind,
    doc: RemoteDocument,
    entity: EntityKind,
    purge_rejected: bool,
    rejected: &mut usize,
    decode: impl FnOnce(&RemoteDocument) -> Result<Records, StoreError>,
) -> Option<Change> {
    if kind == ChangeKind::Removed {
        return Some(Change::Remove {
            kind: entity,
            id: doc.id,
        });
    }
    match decode(&doc) {
        Ok(records) => Some(Change::Upsert(records)),
        Err(e) => {
            warn!(id = %doc.id, error = %e, "quarantined remote document");
            *rejected += 1;
            purge_rejected.then(|| Change::Remove {
                kind: entity,
                id: doc.id,
            })
        }
    }
}
