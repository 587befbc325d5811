//! The chat client façade.
//!
//! [`ChatClient`] wires the components together around one shared entity
//! store and one remote store, on behalf of the signed-in user.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use shopfloor_shared::permissions::CategoryPermissions;
use shopfloor_shared::protocol::FeedKey;
use shopfloor_shared::{CategoryId, ChannelId, ChatError, MessageId, UserId};
use shopfloor_store::{Channel, DirectMessageChannel, EntityStore, SharedStore};

use crate::actions::MessageActions;
use crate::admin::{CategoryUpdate, ChannelAdmin, ChannelUpdate, NewChannel};
use crate::config::ClientConfig;
use crate::dm::DmResolver;
use crate::queue::{Draft, OutboundQueue, PendingSend, SendOutcome};
use crate::remote::RemoteStore;
use crate::session::SessionUser;
use crate::sync::{FeedListener, Subscription, SyncManager};

#[derive(Clone)]
pub struct ChatClient {
    session: SessionUser,
    config: ClientConfig,
    store: SharedStore,
    queue: OutboundQueue,
    sync: SyncManager,
    dms: DmResolver,
    actions: MessageActions,
    admin: ChannelAdmin,
}

impl ChatClient {
    pub fn new(remote: Arc<dyn RemoteStore>, session: SessionUser, config: ClientConfig) -> Self {
        let mut entities = EntityStore::new().with_typing_ttl(config.typing_ttl_chrono());
        if config.journal {
            entities = entities.with_journal();
        }
        let store = SharedStore::new(entities);
        let sync = SyncManager::new(
            remote.clone(),
            store.clone(),
            session.id.clone(),
            config.typing_ttl_chrono(),
        );
        info!(user_id = %session.id, role = %session.role, "Chat client started");

        Self {
            queue: OutboundQueue::new(
                remote.clone(),
                store.clone(),
                session.clone(),
                config.max_message_len,
            ),
            dms: DmResolver::new(remote.clone(), sync.clone()),
            actions: MessageActions::new(
                remote.clone(),
                store.clone(),
                session.clone(),
                config.max_message_len,
            ),
            admin: ChannelAdmin::new(remote, store.clone(), session.clone()),
            sync,
            store,
            session,
            config,
        }
    }

    pub fn session(&self) -> &SessionUser {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Show `draft` as pending and return the send to dispatch.
    pub fn enqueue_message(&self, draft: Draft) -> Result<PendingSend, ChatError> {
        self.queue.enqueue(draft)
    }

    pub async fn send_message(&self, draft: Draft) -> Result<SendOutcome, ChatError> {
        self.queue.send(draft).await
    }

    /// Send a new copy of a failed message; the failed entry stays until
    /// discarded.
    pub async fn retry_message(&self, temp_id: &MessageId) -> Result<SendOutcome, ChatError> {
        Ok(self.queue.retry(temp_id)?.dispatch().await)
    }

    pub fn discard_message(&self, temp_id: &MessageId) -> Result<(), ChatError> {
        self.queue.discard(temp_id)
    }

    // ------------------------------------------------------------------
    // Message actions
    // ------------------------------------------------------------------

    pub async fn edit_message(&self, id: &MessageId, content: &str) -> Result<(), ChatError> {
        self.actions.edit_message(id, content).await
    }

    pub async fn delete_message(&self, id: &MessageId) -> Result<(), ChatError> {
        self.actions.delete_message(id).await
    }

    pub async fn pin_message(&self, id: &MessageId) -> Result<(), ChatError> {
        self.actions.pin_message(id).await
    }

    pub async fn unpin_message(&self, id: &MessageId) -> Result<(), ChatError> {
        self.actions.unpin_message(id).await
    }

    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ChatError> {
        self.actions.toggle_reaction(id, emoji).await
    }

    pub async fn mark_read(&self, channel: &ChannelId) -> Result<(), ChatError> {
        self.actions.mark_read(channel).await
    }

    pub async fn update_typing_status(
        &self,
        channel: &ChannelId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        self.actions.update_typing_status(channel, is_typing).await
    }

    // ------------------------------------------------------------------
    // Direct messages
    // ------------------------------------------------------------------

    pub async fn get_or_create_dm(&self, other: &UserId) -> Result<DirectMessageChannel, ChatError> {
        self.dms.get_or_create(&self.session.id, other).await
    }

    /// Resolve the DM with `other` and subscribe to its messages.
    pub async fn open_dm(
        &self,
        other: &UserId,
        listener: impl FeedListener + 'static,
    ) -> Result<(DirectMessageChannel, Subscription), ChatError> {
        self.dms.open(&self.session.id, other, listener).await
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe(&self, key: FeedKey, listener: impl FeedListener + 'static) -> Subscription {
        self.sync.subscribe(key, listener)
    }

    /// Subscribe to the messages of `channel`.
    pub fn subscribe_channel(
        &self,
        channel: &ChannelId,
        listener: impl FeedListener + 'static,
    ) -> Subscription {
        self.sync.subscribe(FeedKey::Messages(channel.clone()), listener)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Channels the session user may see, in sidebar order.
    pub fn visible_channels(&self) -> Vec<Channel> {
        self.store.read(|s| s.visible_channels(self.session.role))
    }

    pub fn unread_count(&self, channel: &ChannelId) -> u32 {
        self.store
            .read(|s| s.select_unread_count(channel, &self.session.id))
    }

    /// Other users currently typing in `channel`.
    pub fn typing_users(&self, channel: &ChannelId) -> Vec<UserId> {
        let now = Utc::now();
        self.store.read(|s| {
            s.typing_users(channel, now)
                .into_iter()
                .filter(|u| u != &self.session.id)
                .collect()
        })
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, new: NewChannel) -> Result<ChannelId, ChatError> {
        self.admin.create_channel(new).await
    }

    pub async fn update_channel(&self, id: &ChannelId, update: ChannelUpdate) -> Result<(), ChatError> {
        self.admin.update_channel(id, update).await
    }

    pub async fn delete_channel(&self, id: &ChannelId) -> Result<(), ChatError> {
        self.admin.delete_channel(id).await
    }

    pub async fn create_category(
        &self,
        name: &str,
        permissions: CategoryPermissions,
        position: Option<i64>,
    ) -> Result<CategoryId, ChatError> {
        self.admin.create_category(name, permissions, position).await
    }

    pub async fn update_category(
        &self,
        id: &CategoryId,
        update: CategoryUpdate,
    ) -> Result<(), ChatError> {
        self.admin.update_category(id, update).await
    }

    pub async fn delete_category(&self, id: &CategoryId) -> Result<(), ChatError> {
        self.admin.delete_category(id).await
    }
}
