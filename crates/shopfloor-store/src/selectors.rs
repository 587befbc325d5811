//! Read views over the entity store. Selectors return owned copies so
//! callers never hold references into the store.

use chrono::{DateTime, Utc};

use shopfloor_shared::permissions::{can_view_category, can_view_channel};
use shopfloor_shared::{
    CategoryId, ChannelId, CorrelationToken, MessageId, MessageStatus, NotificationId, Role,
    UserId,
};

use crate::models::{
    Category, Channel, DirectMessageChannel, EntityKind, Message, Notification, User,
};
use crate::store::EntityStore;

/// Result of a by-id lookup across entity kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRecord {
    Message(Message),
    Channel(Channel),
    Category(Category),
    DirectMessageChannel(DirectMessageChannel),
    User(User),
    Notification(Notification),
}

impl EntityStore {
    pub fn select_by_id(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        let id = id.to_string();
        match kind {
            EntityKind::Message => self
                .messages
                .get(&MessageId(id))
                .cloned()
                .map(EntityRecord::Message),
            EntityKind::Channel => self
                .channels
                .get(&ChannelId(id))
                .cloned()
                .map(EntityRecord::Channel),
            EntityKind::Category => self
                .categories
                .get(&CategoryId(id))
                .cloned()
                .map(EntityRecord::Category),
            EntityKind::DirectMessageChannel => self
                .dm_channels
                .get(&ChannelId(id))
                .cloned()
                .map(EntityRecord::DirectMessageChannel),
            EntityKind::User => self.users.get(&UserId(id)).cloned().map(EntityRecord::User),
            EntityKind::Notification => self
                .notifications
                .get(&NotificationId(id))
                .cloned()
                .map(EntityRecord::Notification),
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.get(id)
    }

    pub fn dm_channel(&self, id: &ChannelId) -> Option<&DirectMessageChannel> {
        self.dm_channels.get(id)
    }

    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    /// Messages of a channel in display order.
    pub fn select_by_channel(&self, channel: &ChannelId) -> Vec<Message> {
        self.timelines
            .get(channel)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn select_unread_count(&self, channel: &ChannelId, user: &UserId) -> u32 {
        self.unread
            .get(&(channel.clone(), user.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_unread(&self, user: &UserId) -> u32 {
        self.unread
            .iter()
            .filter(|((_, u), _)| u == user)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Provisional message currently registered under `token`.
    pub fn provisional_for(&self, token: &CorrelationToken) -> Option<&Message> {
        self.provisional
            .get(token)
            .and_then(|id| self.messages.get(id))
    }

    /// Whether the pending message of `token` was discarded and its
    /// confirmation has not arrived yet.
    pub fn was_discarded(&self, token: &CorrelationToken) -> bool {
        self.discarded.contains(token)
    }

    pub fn messages_with_status(&self, channel: &ChannelId, status: MessageStatus) -> Vec<Message> {
        self.select_by_channel(channel)
            .into_iter()
            .filter(|m| m.status == status)
            .collect()
    }

    pub fn pinned_messages(&self, channel: &ChannelId) -> Vec<Message> {
        self.select_by_channel(channel)
            .into_iter()
            .filter(|m| m.is_pinned && !m.is_deleted)
            .collect()
    }

    /// Replies whose thread parent is `parent`, in display order.
    pub fn thread_replies(&self, channel: &ChannelId, parent: &MessageId) -> Vec<Message> {
        self.select_by_channel(channel)
            .into_iter()
            .filter(|m| m.thread_parent_id.as_ref() == Some(parent))
            .collect()
    }

    /// Categories ordered by position, then name.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<_> = self.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        categories
    }

    pub fn channels_in_category(&self, category: &CategoryId) -> Vec<Channel> {
        let mut channels: Vec<_> = self
            .channels
            .values()
            .filter(|c| &c.category_id == category)
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        channels
    }

    /// Channels `role` may see, grouped by category order then channel
    /// position. Channels whose category is not loaded yet are listed last.
    pub fn visible_channels(&self, role: Role) -> Vec<Channel> {
        let mut visible: Vec<(i64, Channel)> = self
            .channels
            .values()
            .filter(|c| can_view_channel(role, c.is_private, &c.allowed_roles))
            .filter_map(|c| match self.categories.get(&c.category_id) {
                Some(category) if !can_view_category(role, &category.permissions) => None,
                Some(category) => Some((category.position, c.clone())),
                None => Some((i64::MAX, c.clone())),
            })
            .collect();
        visible.sort_by(|(pa, a), (pb, b)| {
            pa.cmp(pb)
                .then_with(|| a.category_id.cmp(&b.category_id))
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.name.cmp(&b.name))
        });
        visible.into_iter().map(|(_, c)| c).collect()
    }

    /// DM channels of `user`, most recent conversation first.
    pub fn dm_channels_for(&self, user: &UserId) -> Vec<DirectMessageChannel> {
        let mut dms: Vec<_> = self
            .dm_channels
            .values()
            .filter(|dm| dm.includes(user))
            .cloned()
            .collect();
        dms.sort_by(|a, b| {
            let ta = a.last_message.as_ref().map(|m| m.timestamp);
            let tb = b.last_message.as_ref().map(|m| m.timestamp);
            tb.cmp(&ta).then_with(|| a.id.cmp(&b.id))
        });
        dms
    }

    /// Users typing in `channel` whose indicator has not expired at `now`.
    pub fn typing_users(&self, channel: &ChannelId, now: DateTime<Utc>) -> Vec<UserId> {
        let mut users: Vec<_> = self
            .typing
            .values()
            .filter(|t| &t.channel_id == channel && t.is_typing)
            .filter(|t| t.updated_at + self.typing_ttl > now)
            .map(|t| t.user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Notifications of `user`, newest first.
    pub fn notifications_for(&self, user: &UserId) -> Vec<Notification> {
        let mut notifications: Vec<_> = self
            .notifications
            .values()
            .filter(|n| &n.user_id == user)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications
    }

    pub fn unread_notification_count(&self, user: &UserId) -> usize {
        self.notifications
            .values()
            .filter(|n| &n.user_id == user && !n.is_read)
            .count()
    }
}
