//! Outbound message queue.
//!
//! Sending is split in two steps. [`OutboundQueue::enqueue`] validates the
//! draft and shows the pending entry immediately, so entries appear in
//! submission order. [`PendingSend::dispatch`] then performs the remote
//! write and folds the result back into the store. Several sends may be in
//! flight at once; there is no automatic retry and no send deadline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use shopfloor_shared::constants::LAST_MESSAGE_PREVIEW_LEN;
use shopfloor_shared::permissions::{can_post, can_view_channel};
use shopfloor_shared::protocol::{
    dm_participants, Attachment, Collection, LastMessage, MessageDoc,
};
use shopfloor_shared::{
    ChannelId, ChatError, CorrelationToken, MessageId, MessageKind, MessageStatus, UserId,
};
use shopfloor_store::decode::decode_message;
use shopfloor_store::{Message, SharedStore};

use crate::optimistic::{OptimisticUpdates, Reconciliation};
use crate::remote::RemoteStore;
use crate::session::SessionUser;

/// A message as composed by the user, before it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub channel_id: ChannelId,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<UserId>,
    pub reply_to: Option<MessageId>,
    pub thread_parent_id: Option<MessageId>,
}

impl Draft {
    pub fn text(channel_id: impl Into<ChannelId>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            mentions: Vec::new(),
            reply_to: None,
            thread_parent_id: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        if self.kind == MessageKind::Text {
            self.kind = MessageKind::File;
        }
        self.attachments.push(attachment);
        self
    }

    pub fn mentioning(mut self, user: impl Into<UserId>) -> Self {
        self.mentions.push(user.into());
        self
    }

    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    pub fn in_thread(mut self, parent: MessageId) -> Self {
        self.thread_parent_id = Some(parent);
        self
    }

    fn from_message(message: &Message) -> Self {
        Self {
            channel_id: message.channel_id.clone(),
            content: message.content.clone(),
            kind: message.kind,
            attachments: message.attachments.clone(),
            mentions: message.mentions.clone(),
            reply_to: message.reply_to.clone(),
            thread_parent_id: message.thread_parent_id.clone(),
        }
    }
}

/// Result of one dispatched send.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The pending entry was replaced by the stored message.
    Sent(MessageId),
    /// The change feed had already delivered the stored message.
    AlreadyConfirmed(MessageId),
    /// The message was stored, but its pending entry had been discarded.
    Discarded(MessageId),
    /// The remote write failed; the entry stays visible as failed.
    Failed { temp_id: MessageId, error: ChatError },
}

impl SendOutcome {
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            SendOutcome::Sent(id) | SendOutcome::AlreadyConfirmed(id) | SendOutcome::Discarded(id) => {
                Some(id)
            }
            SendOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SendOutcome::Failed { .. })
    }
}

#[derive(Clone)]
pub struct OutboundQueue {
    remote: Arc<dyn RemoteStore>,
    store: SharedStore,
    optimistic: OptimisticUpdates,
    session: SessionUser,
    max_message_len: usize,
}

impl OutboundQueue {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: SharedStore,
        session: SessionUser,
        max_message_len: usize,
    ) -> Self {
        Self {
            optimistic: OptimisticUpdates::new(store.clone()),
            remote,
            store,
            session,
            max_message_len,
        }
    }

    /// Validate `draft` and insert its pending entry. The remote write
    /// happens when the returned [`PendingSend`] is dispatched.
    pub fn enqueue(&self, draft: Draft) -> Result<PendingSend, ChatError> {
        self.validate(&draft)?;
        let is_dm = self.check_destination(&draft.channel_id)?;

        let now = Utc::now();
        let token = CorrelationToken::new();
        let message = Message {
            id: MessageId::provisional(),
            channel_id: draft.channel_id,
            author_id: self.session.id.clone(),
            author_name: self.session.name.clone(),
            kind: draft.kind,
            content: draft.content,
            attachments: draft.attachments,
            reactions: Vec::new(),
            mentions: draft.mentions,
            reply_to: draft.reply_to,
            thread_parent_id: draft.thread_parent_id,
            status: MessageStatus::Pending,
            is_pinned: false,
            is_deleted: false,
            edited_at: None,
            created_at: now,
            updated_at: now,
            correlation: Some(token),
            error: None,
        };
        let pending = PendingSend {
            queue: self.clone(),
            temp_id: message.id.clone(),
            token,
            is_dm,
            doc: MessageDoc {
                content: message.content.clone(),
                author_id: message.author_id.clone(),
                author_name: message.author_name.clone(),
                kind: message.kind,
                attachments: message.attachments.clone(),
                mentions: message.mentions.clone(),
                reply_to: message.reply_to.clone(),
                thread_parent_id: message.thread_parent_id.clone(),
                reactions: Vec::new(),
                is_pinned: false,
                is_deleted: false,
                edited_at: None,
                created_at: now,
                updated_at: Some(now),
                client_token: Some(token),
            },
            channel_id: message.channel_id.clone(),
        };
        self.optimistic.insert_pending(message);
        Ok(pending)
    }

    /// Enqueue and dispatch in one step.
    pub async fn send(&self, draft: Draft) -> Result<SendOutcome, ChatError> {
        Ok(self.enqueue(draft)?.dispatch().await)
    }

    /// Queue a new pending copy of a failed message. The failed entry stays
    /// until it is discarded.
    pub fn retry(&self, temp_id: &MessageId) -> Result<PendingSend, ChatError> {
        let failed = self
            .store
            .read(|s| s.message(temp_id).cloned())
            .ok_or_else(|| ChatError::not_found(format!("message {temp_id}")))?;
        if failed.status != MessageStatus::Failed {
            return Err(ChatError::validation(format!(
                "message {temp_id} has not failed"
            )));
        }
        info!(temp_id = %temp_id, "retrying failed message");
        self.enqueue(Draft::from_message(&failed))
    }

    pub fn discard(&self, temp_id: &MessageId) -> Result<(), ChatError> {
        self.optimistic.discard(temp_id)
    }

    fn validate(&self, draft: &Draft) -> Result<(), ChatError> {
        if draft.content.trim().is_empty() && draft.attachments.is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        let len = draft.content.chars().count();
        if len > self.max_message_len {
            return Err(ChatError::validation(format!(
                "message is {len} characters, limit is {}",
                self.max_message_len
            )));
        }
        Ok(())
    }

    /// Check that the session user may post into `channel`. Returns whether
    /// it is a DM channel.
    fn check_destination(&self, channel: &ChannelId) -> Result<bool, ChatError> {
        let role = self.session.role;
        let (known_channel, known_dm) = self
            .store
            .read(|s| (s.channel(channel).cloned(), s.dm_channel(channel).cloned()));

        if let Some(dm) = known_dm {
            return if dm.includes(&self.session.id) {
                Ok(true)
            } else {
                Err(ChatError::denied(format!("not a participant of {channel}")))
            };
        }
        if let Some(c) = known_channel {
            if !can_view_channel(role, c.is_private, &c.allowed_roles) || !can_post(role, c.kind) {
                return Err(ChatError::denied(format!("{role} may not post in {}", c.name)));
            }
            return Ok(false);
        }
        // Not cached yet: a DM id must name the session user, anything else
        // is left to the remote store's own rules.
        match dm_participants(channel) {
            Some((a, b)) if a == self.session.id || b == self.session.id => Ok(true),
            Some(_) => Err(ChatError::denied(format!("not a participant of {channel}"))),
            None => Ok(false),
        }
    }

    async fn touch_dm(&self, channel: &ChannelId, content: &str) {
        let preview: String = content.chars().take(LAST_MESSAGE_PREVIEW_LEN).collect();
        let now = Utc::now();
        let last = LastMessage {
            content: preview,
            sender_id: self.session.id.clone(),
            is_read: false,
            timestamp: now,
        };
        let mut fields = Map::new();
        match serde_json::to_value(&last) {
            Ok(value) => {
                fields.insert("lastMessage".into(), value);
            }
            Err(e) => {
                warn!(channel_id = %channel, error = %e, "could not encode lastMessage");
                return;
            }
        }
        fields.insert("updatedAt".into(), Value::from(now.timestamp_millis()));

        if let Err(e) = self
            .remote
            .update(&Collection::DirectMessageChannels, channel.as_str(), fields)
            .await
        {
            warn!(channel_id = %channel, error = %e, "failed to update DM lastMessage");
        }
    }
}

/// A pending message waiting to be written to the remote store.
#[must_use = "a pending send does nothing until dispatched"]
pub struct PendingSend {
    queue: OutboundQueue,
    temp_id: MessageId,
    token: CorrelationToken,
    channel_id: ChannelId,
    is_dm: bool,
    doc: MessageDoc,
}

impl PendingSend {
    pub fn temp_id(&self) -> &MessageId {
        &self.temp_id
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Write the message and reconcile the pending entry with the result.
    pub async fn dispatch(self) -> SendOutcome {
        let PendingSend {
            queue,
            temp_id,
            token,
            channel_id,
            is_dm,
            doc,
        } = self;

        let stored = match serde_json::to_value(&doc) {
            Ok(data) => {
                queue
                    .remote
                    .add(&Collection::Messages(channel_id.clone()), data)
                    .await
            }
            Err(e) => Err(ChatError::from(e)),
        };
        let confirmed = stored.and_then(|doc| {
            decode_message(&channel_id, &doc).map_err(ChatError::from)
        });

        let confirmed = match confirmed {
            Ok(message) => message,
            Err(error) => {
                error!(temp_id = %temp_id, channel_id = %channel_id, error = %error, "message send failed");
                queue.optimistic.fail(token, &error);
                return SendOutcome::Failed { temp_id, error };
            }
        };

        let id = confirmed.id.clone();
        let outcome = match queue.optimistic.confirm(token, confirmed) {
            Reconciliation::Replaced => SendOutcome::Sent(id),
            Reconciliation::AlreadyConfirmed => SendOutcome::AlreadyConfirmed(id),
            Reconciliation::Dropped => SendOutcome::Discarded(id),
        };
        info!(temp_id = %temp_id, message_id = ?outcome.message_id(), channel_id = %channel_id, "message sent");

        if is_dm {
            queue.touch_dm(&channel_id, &doc.content).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;
    use shopfloor_shared::Role;
    use shopfloor_store::EntityStore;

    fn queue(remote: Arc<InMemoryRemote>) -> (SharedStore, OutboundQueue) {
        let store = SharedStore::new(EntityStore::new());
        let session = SessionUser::new("u1", "Aiko", Role::Worker);
        (store.clone(), OutboundQueue::new(remote, store, session, 20))
    }

    fn statuses(store: &SharedStore, channel: &str) -> Vec<MessageStatus> {
        store.read(|s| {
            s.select_by_channel(&ChannelId::new(channel))
                .into_iter()
                .map(|m| m.status)
                .collect()
        })
    }

    #[tokio::test]
    async fn test_enqueue_shows_pending_immediately() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, queue) = queue(remote.clone());

        let pending = queue.enqueue(Draft::text("c1", "hello")).unwrap();
        assert!(pending.temp_id().is_provisional());
        assert_eq!(statuses(&store, "c1"), vec![MessageStatus::Pending]);

        let outcome = pending.dispatch().await;
        assert!(matches!(outcome, SendOutcome::Sent(_)));
        assert_eq!(statuses(&store, "c1"), vec![MessageStatus::Sent]);
        assert_eq!(remote.documents(&Collection::Messages(ChannelId::new("c1"))).len(), 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_and_long_messages() {
        let (store, queue) = queue(Arc::new(InMemoryRemote::new()));
        assert!(matches!(
            queue.enqueue(Draft::text("c1", "   ")),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            queue.enqueue(Draft::text("c1", "x".repeat(21))),
            Err(ChatError::Validation(_))
        ));
        assert!(statuses(&store, "c1").is_empty());

        let attachment = Attachment {
            name: "photo.jpg".into(),
            url: "https://files.example/photo.jpg".into(),
            size: 1024,
            content_type: Some("image/jpeg".into()),
        };
        assert!(queue.enqueue(Draft::text("c1", "").with_attachment(attachment)).is_ok());
    }

    #[tokio::test]
    async fn test_failed_send_then_retry() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, queue) = queue(remote.clone());

        remote.fail_next_writes(1);
        let outcome = queue.send(Draft::text("c1", "hello")).await.unwrap();
        let SendOutcome::Failed { temp_id, error } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(error, ChatError::Network(_)));
        assert_eq!(statuses(&store, "c1"), vec![MessageStatus::Failed]);

        let retry = queue.retry(&temp_id).unwrap();
        assert_eq!(
            statuses(&store, "c1"),
            vec![MessageStatus::Failed, MessageStatus::Pending]
        );
        assert!(matches!(retry.dispatch().await, SendOutcome::Sent(_)));

        queue.discard(&temp_id).unwrap();
        assert_eq!(statuses(&store, "c1"), vec![MessageStatus::Sent]);
    }

    #[tokio::test]
    async fn test_foreign_dm_is_refused_locally() {
        let remote = Arc::new(InMemoryRemote::new());
        let (store, queue) = queue(remote.clone());

        let err = queue.enqueue(Draft::text("u2_u3", "hi")).err().unwrap();
        assert!(matches!(err, ChatError::PermissionDenied(_)));
        assert!(statuses(&store, "u2_u3").is_empty());
        assert_eq!(remote.write_count(), 0);

        assert!(queue.enqueue(Draft::text("u1_u2", "hi")).is_ok());
    }

    #[tokio::test]
    async fn test_retry_requires_failed_entry() {
        let (_, queue) = queue(Arc::new(InMemoryRemote::new()));
        let pending = queue.enqueue(Draft::text("c1", "hello")).unwrap();
        assert!(matches!(
            queue.retry(pending.temp_id()),
            Err(ChatError::Validation(_))
        ));
    }
}
