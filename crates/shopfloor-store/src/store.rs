//! The normalized entity store.
//!
//! [`EntityStore`] is a plain in-memory cache of every chat entity, keyed by
//! id. It is mutated only through [`EntityStore::apply`]; each call runs to
//! completion before the next one, so a reader can never observe a
//! half-applied change.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use tracing::trace;

use shopfloor_shared::constants::DEFAULT_TYPING_TTL_MS;
use shopfloor_shared::{
    CategoryId, ChannelId, CorrelationToken, MessageId, MessageStatus, NotificationId, UserId,
};

use crate::change::{Change, Records};
use crate::models::{
    Category, Channel, DirectMessageChannel, Entity, EntityKind, Message, Notification,
    TypingEntry, User,
};

/// What applying a change did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// State changed.
    Applied,
    /// A provisional message was replaced by its confirmed counterpart.
    Reconciled,
    /// Nothing to do (stale record, unknown id, discarded provisional...).
    Ignored,
}

impl Effect {
    fn merge(self, other: Effect) -> Effect {
        match (self, other) {
            (Effect::Reconciled, _) | (_, Effect::Reconciled) => Effect::Reconciled,
            (Effect::Applied, _) | (_, Effect::Applied) => Effect::Applied,
            _ => Effect::Ignored,
        }
    }

    pub fn changed(self) -> bool {
        self != Effect::Ignored
    }
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    pub(crate) messages: HashMap<MessageId, Message>,
    /// Display order of message ids per channel.
    pub(crate) timelines: HashMap<ChannelId, Vec<MessageId>>,
    /// Correlation token -> provisional message id.
    pub(crate) provisional: HashMap<CorrelationToken, MessageId>,
    /// Tokens of provisional messages discarded before their confirmation.
    pub(crate) discarded: HashSet<CorrelationToken>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) categories: HashMap<CategoryId, Category>,
    pub(crate) dm_channels: HashMap<ChannelId, DirectMessageChannel>,
    pub(crate) users: HashMap<UserId, User>,
    pub(crate) notifications: HashMap<NotificationId, Notification>,
    pub(crate) unread: HashMap<(ChannelId, UserId), u32>,
    pub(crate) typing: HashMap<(ChannelId, UserId), TypingEntry>,
    pub(crate) typing_ttl: Duration,
    journal: Option<Vec<Change>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            messages: HashMap::new(),
            timelines: HashMap::new(),
            provisional: HashMap::new(),
            discarded: HashSet::new(),
            channels: HashMap::new(),
            categories: HashMap::new(),
            dm_channels: HashMap::new(),
            users: HashMap::new(),
            notifications: HashMap::new(),
            unread: HashMap::new(),
            typing: HashMap::new(),
            typing_ttl: Duration::milliseconds(DEFAULT_TYPING_TTL_MS as i64),
            journal: None,
        }
    }

    /// Set how long a typing indicator stays visible without a refresh.
    pub fn with_typing_ttl(mut self, ttl: Duration) -> Self {
        self.typing_ttl = ttl;
        self
    }

    /// Record every applied change so the store can be replayed later.
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Vec::new());
        self
    }

    pub fn journal(&self) -> &[Change] {
        self.journal.as_deref().unwrap_or(&[])
    }

    /// Rebuild a store by applying `changes` in order to an empty store
    /// with default settings.
    pub fn replay(changes: impl IntoIterator<Item = Change>) -> Self {
        Self::new().replay_into(changes)
    }

    /// Apply `changes` in order to `self`, keeping its configuration
    /// (typing TTL, journal).
    pub fn replay_into(mut self, changes: impl IntoIterator<Item = Change>) -> Self {
        for change in changes {
            self.apply(change);
        }
        self
    }

    /// Apply one change atomically.
    pub fn apply(&mut self, change: Change) -> Effect {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(change.clone());
        }
        let name = change.name();
        let effect = self.apply_inner(change);
        trace!(change = name, effect = ?effect, "applied store change");
        effect
    }

    /// Convenience wrapper for [`Change::Upsert`].
    pub fn upsert(&mut self, records: Records) -> Effect {
        self.apply(Change::Upsert(records))
    }

    /// Convenience wrapper for [`Change::Remove`].
    pub fn remove(&mut self, kind: EntityKind, id: impl Into<String>) -> Effect {
        self.apply(Change::Remove {
            kind,
            id: id.into(),
        })
    }

    fn apply_inner(&mut self, change: Change) -> Effect {
        match change {
            Change::Upsert(records) => self.upsert_records(records),
            Change::Remove { kind, id } => self.remove_record(kind, id),
            Change::InsertProvisional(message) => self.insert_provisional(message),
            Change::ConfirmProvisional { token, message } => self.confirm_provisional(token, message),
            Change::MarkFailed { token, error } => self.mark_failed(token, error),
            Change::DiscardProvisional { id } => self.discard_provisional(&id),
            Change::PatchMessage { id, patch } => match self.messages.get_mut(&id) {
                Some(message) => {
                    patch.apply_to(message);
                    Effect::Applied
                }
                None => Effect::Ignored,
            },
            Change::RestoreMessage(message) => {
                if !self.messages.contains_key(&message.id) {
                    self.insert_ordered(&message);
                }
                self.messages.insert(message.id.clone(), message);
                Effect::Applied
            }
            Change::IncrementUnread {
                channel_id,
                user_id,
                by,
            } => {
                let count = self.unread.entry((channel_id, user_id)).or_insert(0);
                *count = count.saturating_add(by);
                Effect::Applied
            }
            Change::MarkRead {
                channel_id,
                user_id,
            } => {
                self.unread.insert((channel_id, user_id), 0);
                Effect::Applied
            }
            Change::SetTyping(entries) => {
                let mut effect = Effect::Ignored;
                for entry in entries {
                    effect = effect.merge(self.set_typing(entry));
                }
                effect
            }
            Change::ExpireTyping { before } => {
                let len = self.typing.len();
                self.typing.retain(|_, entry| entry.updated_at >= before);
                if self.typing.len() != len {
                    Effect::Applied
                } else {
                    Effect::Ignored
                }
            }
            Change::Batch(changes) => changes
                .into_iter()
                .fold(Effect::Ignored, |acc, c| acc.merge(self.apply_inner(c))),
        }
    }

    // ------------------------------------------------------------------
    // Upsert / remove
    // ------------------------------------------------------------------

    fn upsert_records(&mut self, records: Records) -> Effect {
        match records {
            Records::Messages(messages) => messages
                .into_iter()
                .fold(Effect::Ignored, |acc, m| acc.merge(self.upsert_message(m))),
            Records::Channels(channels) => merge_all(&mut self.channels, channels),
            Records::Categories(categories) => merge_all(&mut self.categories, categories),
            Records::DirectMessageChannels(dms) => merge_all(&mut self.dm_channels, dms),
            Records::Users(users) => merge_all(&mut self.users, users),
            Records::Notifications(notifications) => {
                merge_all(&mut self.notifications, notifications)
            }
        }
    }

    fn upsert_message(&mut self, incoming: Message) -> Effect {
        // A confirmed record carrying the token of a local provisional
        // message takes over that message's slot.
        if let Some(token) = incoming.correlation {
            if let Some(temp_id) = self.provisional.get(&token).cloned() {
                if temp_id != incoming.id {
                    self.replace_provisional(token, &temp_id, incoming);
                    return Effect::Reconciled;
                }
            }
        }

        match self.messages.get(&incoming.id) {
            Some(existing) if existing.updated_at > incoming.updated_at => Effect::Ignored,
            Some(_) => {
                self.messages.insert(incoming.id.clone(), incoming);
                Effect::Applied
            }
            None => {
                self.insert_ordered(&incoming);
                self.messages.insert(incoming.id.clone(), incoming);
                Effect::Applied
            }
        }
    }

    fn remove_record(&mut self, kind: EntityKind, id: String) -> Effect {
        let removed = match kind {
            EntityKind::Message => {
                let id = MessageId(id);
                match self.messages.remove(&id) {
                    Some(message) => {
                        self.unlink(&message);
                        true
                    }
                    None => false,
                }
            }
            EntityKind::Channel => self.channels.remove(&ChannelId(id)).is_some(),
            EntityKind::Category => self.categories.remove(&CategoryId(id)).is_some(),
            EntityKind::DirectMessageChannel => self.dm_channels.remove(&ChannelId(id)).is_some(),
            EntityKind::User => self.users.remove(&UserId(id)).is_some(),
            EntityKind::Notification => self.notifications.remove(&NotificationId(id)).is_some(),
        };
        if removed {
            Effect::Applied
        } else {
            Effect::Ignored
        }
    }

    // ------------------------------------------------------------------
    // Provisional messages
    // ------------------------------------------------------------------

    fn insert_provisional(&mut self, message: Message) -> Effect {
        let Some(token) = message.correlation else {
            return Effect::Ignored;
        };
        if self.messages.contains_key(&message.id) {
            return Effect::Ignored;
        }
        self.timelines
            .entry(message.channel_id.clone())
            .or_default()
            .push(message.id.clone());
        self.provisional.insert(token, message.id.clone());
        self.messages.insert(message.id.clone(), message);
        Effect::Applied
    }

    fn confirm_provisional(&mut self, token: CorrelationToken, message: Message) -> Effect {
        if self.discarded.remove(&token) {
            return Effect::Ignored;
        }
        if let Some(temp_id) = self.provisional.get(&token).cloned() {
            self.replace_provisional(token, &temp_id, message);
            return Effect::Reconciled;
        }
        // Already reconciled through the feed: merge as an ordinary update.
        if self.messages.contains_key(&message.id) {
            let mut message = message;
            message.correlation = None;
            self.upsert_message(message)
        } else {
            Effect::Ignored
        }
    }

    fn replace_provisional(&mut self, token: CorrelationToken, temp_id: &MessageId, confirmed: Message) {
        self.provisional.remove(&token);
        let channel_id = self
            .messages
            .remove(temp_id)
            .map(|m| m.channel_id)
            .unwrap_or_else(|| confirmed.channel_id.clone());

        let already_present = self.messages.contains_key(&confirmed.id);
        if let Some(list) = self.timelines.get_mut(&channel_id) {
            if already_present {
                list.retain(|id| id != temp_id);
            } else if let Some(slot) = list.iter_mut().find(|id| *id == temp_id) {
                *slot = confirmed.id.clone();
            }
        }

        if !already_present && !self.timeline_contains(&confirmed) {
            self.insert_ordered(&confirmed);
        }
        match self.messages.get(&confirmed.id) {
            Some(existing) if existing.updated_at > confirmed.updated_at => {}
            _ => {
                self.messages.insert(confirmed.id.clone(), confirmed);
            }
        }
    }

    fn mark_failed(&mut self, token: CorrelationToken, error: String) -> Effect {
        let Some(id) = self.provisional.get(&token) else {
            return Effect::Ignored;
        };
        match self.messages.get_mut(id) {
            Some(message) => {
                message.status = MessageStatus::Failed;
                message.error = Some(error);
                Effect::Applied
            }
            None => Effect::Ignored,
        }
    }

    fn discard_provisional(&mut self, id: &MessageId) -> Effect {
        if !id.is_provisional() {
            return Effect::Ignored;
        }
        match self.messages.remove(id) {
            Some(message) => {
                if let Some(token) = message.correlation {
                    self.provisional.remove(&token);
                    // Only a pending send can still be confirmed.
                    if message.status == MessageStatus::Pending {
                        self.discarded.insert(token);
                    }
                }
                self.unlink(&message);
                Effect::Applied
            }
            None => Effect::Ignored,
        }
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    fn set_typing(&mut self, entry: TypingEntry) -> Effect {
        let key = (entry.channel_id.clone(), entry.user_id.clone());
        if let Some(existing) = self.typing.get(&key) {
            if existing.updated_at > entry.updated_at {
                return Effect::Ignored;
            }
        }
        if entry.is_typing {
            self.typing.insert(key, entry);
            Effect::Applied
        } else if self.typing.remove(&key).is_some() {
            Effect::Applied
        } else {
            Effect::Ignored
        }
    }

    // ------------------------------------------------------------------
    // Timeline helpers
    // ------------------------------------------------------------------

    /// Insert after the last message created no later than `message`.
    fn insert_ordered(&mut self, message: &Message) {
        let messages = &self.messages;
        let list = self.timelines.entry(message.channel_id.clone()).or_default();
        let pos = list
            .iter()
            .rposition(|id| {
                messages
                    .get(id)
                    .map(|m| m.created_at <= message.created_at)
                    .unwrap_or(true)
            })
            .map(|i| i + 1)
            .unwrap_or(0);
        list.insert(pos, message.id.clone());
    }

    fn timeline_contains(&self, message: &Message) -> bool {
        self.timelines
            .get(&message.channel_id)
            .map(|list| list.contains(&message.id))
            .unwrap_or(false)
    }

    fn unlink(&mut self, message: &Message) {
        if let Some(list) = self.timelines.get_mut(&message.channel_id) {
            list.retain(|id| id != &message.id);
        }
    }
}

/// Last-write-wins merge: a record strictly older than the cached one is
/// ignored, ties are accepted.
fn merge_all<E: Entity>(map: &mut HashMap<E::Id, E>, records: Vec<E>) -> Effect {
    let mut effect = Effect::Ignored;
    for record in records {
        let stale = map
            .get(record.id())
            .map(|existing| existing.updated_at() > record.updated_at())
            .unwrap_or(false);
        if !stale {
            map.insert(record.id().clone(), record);
            effect = Effect::Applied;
        }
    }
    effect
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use chrono::Utc;

    #[test]
    fn test_upsert_is_idempotent() {
        let mut store = EntityStore::new();
        let msg = sent_message("m1", "c1", "u1", "hello", 0);

        assert_eq!(store.upsert(Records::Messages(vec![msg.clone()])), Effect::Applied);
        store.upsert(Records::Messages(vec![msg.clone()]));

        assert_eq!(store.select_by_channel(&ChannelId::new("c1")), vec![msg]);
    }

    #[test]
    fn test_last_write_wins_ignores_older_records() {
        let mut store = EntityStore::new();
        let newer = sent_message("m1", "c1", "u1", "edited", 10);
        let mut older = sent_message("m1", "c1", "u1", "original", 0);
        older.updated_at = newer.updated_at - Duration::seconds(5);

        store.upsert(Records::Messages(vec![newer.clone()]));
        assert_eq!(store.upsert(Records::Messages(vec![older])), Effect::Ignored);
        assert_eq!(store.message(&MessageId::new("m1")).unwrap().content, "edited");
    }

    #[test]
    fn test_server_messages_ordered_by_creation() {
        let mut store = EntityStore::new();
        store.upsert(Records::Messages(vec![
            sent_message("m3", "c1", "u1", "third", 30),
            sent_message("m1", "c1", "u1", "first", 10),
        ]));
        store.upsert(Records::Messages(vec![sent_message("m2", "c1", "u1", "second", 20)]));

        let ids: Vec<_> = store
            .select_by_channel(&ChannelId::new("c1"))
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_confirm_keeps_list_position() {
        let mut store = EntityStore::new();
        store.upsert(Records::Messages(vec![sent_message("m1", "c1", "u2", "before", 0)]));
        let pending = pending_message("c1", "u1", "hello");
        let token = pending.correlation.unwrap();
        let temp_id = pending.id.clone();
        store.apply(Change::InsertProvisional(pending));
        store.upsert(Records::Messages(vec![sent_message("m2", "c1", "u2", "after", 60)]));

        let mut confirmed = sent_message("srv-1", "c1", "u1", "hello", 30);
        confirmed.correlation = Some(token);
        let effect = store.apply(Change::ConfirmProvisional {
            token,
            message: confirmed,
        });

        assert_eq!(effect, Effect::Reconciled);
        assert!(store.message(&temp_id).is_none());
        let ids: Vec<_> = store
            .select_by_channel(&ChannelId::new("c1"))
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec!["m1", "srv-1", "m2"]);
    }

    #[test]
    fn test_feed_confirmation_before_send_response() {
        let mut store = EntityStore::new();
        let pending = pending_message("c1", "u1", "hello");
        let token = pending.correlation.unwrap();
        store.apply(Change::InsertProvisional(pending));

        let mut confirmed = sent_message("srv-1", "c1", "u1", "hello", 0);
        confirmed.correlation = Some(token);
        assert_eq!(
            store.upsert(Records::Messages(vec![confirmed.clone()])),
            Effect::Reconciled
        );
        // The late send response merges into the existing record.
        store.apply(Change::ConfirmProvisional {
            token,
            message: confirmed,
        });

        let list = store.select_by_channel(&ChannelId::new("c1"));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, MessageId::new("srv-1"));
    }

    #[test]
    fn test_confirmation_after_discard_is_noop() {
        let mut store = EntityStore::new();
        let pending = pending_message("c1", "u1", "oops");
        let token = pending.correlation.unwrap();
        let temp_id = pending.id.clone();
        store.apply(Change::InsertProvisional(pending));
        store.apply(Change::MarkFailed {
            token,
            error: "offline".into(),
        });
        store.apply(Change::DiscardProvisional { id: temp_id });

        let effect = store.apply(Change::ConfirmProvisional {
            token,
            message: sent_message("srv-1", "c1", "u1", "oops", 0),
        });
        assert_eq!(effect, Effect::Ignored);
        assert!(store.select_by_channel(&ChannelId::new("c1")).is_empty());
    }

    #[test]
    fn test_discard_only_touches_provisional_ids() {
        let mut store = EntityStore::new();
        store.upsert(Records::Messages(vec![sent_message("m1", "c1", "u1", "hi", 0)]));
        assert_eq!(
            store.apply(Change::DiscardProvisional {
                id: MessageId::new("m1")
            }),
            Effect::Ignored
        );
    }

    #[test]
    fn test_unread_count_resets_to_zero() {
        let mut store = EntityStore::new();
        let (c, u) = (ChannelId::new("c1"), UserId::new("u1"));
        store.apply(Change::IncrementUnread {
            channel_id: c.clone(),
            user_id: u.clone(),
            by: 3,
        });
        assert_eq!(store.select_unread_count(&c, &u), 3);

        store.apply(Change::MarkRead {
            channel_id: c.clone(),
            user_id: u.clone(),
        });
        assert_eq!(store.select_unread_count(&c, &u), 0);
        store.apply(Change::MarkRead {
            channel_id: c.clone(),
            user_id: u.clone(),
        });
        assert_eq!(store.select_unread_count(&c, &u), 0);
    }

    #[test]
    fn test_journal_replay_rebuilds_same_state() {
        let mut store = EntityStore::new().with_journal();
        let pending = pending_message("c1", "u1", "hello");
        let token = pending.correlation.unwrap();
        store.upsert(Records::Messages(vec![sent_message("m1", "c1", "u2", "hi", 0)]));
        store.apply(Change::InsertProvisional(pending));
        store.apply(Change::Batch(vec![
            Change::ConfirmProvisional {
                token,
                message: sent_message("srv-1", "c1", "u1", "hello", 5),
            },
            Change::IncrementUnread {
                channel_id: ChannelId::new("c1"),
                user_id: UserId::new("u1"),
                by: 1,
            },
        ]));

        let journal = store.journal().to_vec();
        let encoded = serde_json::to_string(&journal).unwrap();
        let decoded: Vec<Change> = serde_json::from_str(&encoded).unwrap();
        let replayed = EntityStore::replay(decoded);

        let channel = ChannelId::new("c1");
        assert_eq!(replayed.select_by_channel(&channel), store.select_by_channel(&channel));
        assert_eq!(
            replayed.select_unread_count(&channel, &UserId::new("u1")),
            store.select_unread_count(&channel, &UserId::new("u1"))
        );
    }

    #[test]
    fn test_typing_entries_expire() {
        let mut store = EntityStore::new().with_typing_ttl(Duration::seconds(5));
        let now = Utc::now();
        let channel = ChannelId::new("c1");
        store.apply(Change::SetTyping(vec![TypingEntry {
            channel_id: channel.clone(),
            user_id: UserId::new("u2"),
            is_typing: true,
            updated_at: now - Duration::seconds(10),
        }]));
        assert!(store.typing_users(&channel, now).is_empty());
        assert_eq!(
            store.typing_users(&channel, now - Duration::seconds(8)),
            vec![UserId::new("u2")]
        );

        store.apply(Change::ExpireTyping {
            before: now - Duration::seconds(5),
        });
        assert!(store.typing.is_empty());
    }

    #[test]
    fn test_confirmation_after_discard_loses_to_feed_record() {
        let mut store = EntityStore::new();
        let pending = pending_message("c1", "u1", "oops");
        let token = pending.correlation.unwrap();
        let temp_id = pending.id.clone();
        store.apply(Change::InsertProvisional(pending));
        store.apply(Change::DiscardProvisional { id: temp_id });
        assert!(store.was_discarded(&token));

        // The feed delivers the stored record before the send response.
        let mut stored = sent_message("srv-1", "c1", "u1", "oops", 0);
        stored.correlation = Some(token);
        store.upsert(Records::Messages(vec![stored.clone()]));

        let effect = store.apply(Change::ConfirmProvisional {
            token,
            message: stored,
        });
        assert_eq!(effect, Effect::Ignored);
        assert!(!store.was_discarded(&token));
        assert_eq!(store.select_by_channel(&ChannelId::new("c1")).len(), 1);
    }

    #[test]
    fn test_replay_into_keeps_typing_ttl() {
        let now = Utc::now();
        let channel = ChannelId::new("c1");
        let changes = vec![Change::SetTyping(vec![TypingEntry {
            channel_id: channel.clone(),
            user_id: UserId::new("u2"),
            is_typing: true,
            updated_at: now - Duration::seconds(10),
        }])];

        let default_ttl = EntityStore::replay(changes.clone());
        assert!(default_ttl.typing_users(&channel, now).is_empty());

        let long_ttl = EntityStore::new()
            .with_typing_ttl(Duration::seconds(30))
            .replay_into(changes);
        assert_eq!(long_ttl.typing_users(&channel, now), vec![UserId::new("u2")]);
    }
}
