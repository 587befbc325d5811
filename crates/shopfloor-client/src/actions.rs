//! Actions on existing messages and channel read/typing state.
//!
//! Message actions check permissions locally, apply an optimistic patch,
//! write the change to the remote store and roll the patch back if the
//! write fails.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use shopfloor_shared::permissions::{can_delete_message, can_edit_message, can_pin_message};
use shopfloor_shared::protocol::{typing_doc_id, Collection, RemoteDocument, TypingDoc};
use shopfloor_shared::{ChannelId, ChatError, MessageId};
use shopfloor_store::{Message, MessagePatch, SharedStore};

use crate::optimistic::OptimisticUpdates;
use crate::remote::RemoteStore;
use crate::session::SessionUser;

#[derive(Clone)]
pub struct MessageActions {
    remote: Arc<dyn RemoteStore>,
    store: SharedStore,
    optimistic: OptimisticUpdates,
    session: SessionUser,
    max_message_len: usize,
}

impl MessageActions {
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

    /// Cached, already confirmed message.
    fn load(&self, id: &MessageId) -> Result<Message, ChatError> {
        if id.is_provisional() {
            return Err(ChatError::validation(format!("message {id} is not sent yet")));
        }
        let message = self
            .store
            .read(|s| s.message(id).cloned())
            .ok_or_else(|| ChatError::not_found(format!("message {id}")))?;
        if message.is_deleted {
            return Err(ChatError::not_found(format!("message {id} was deleted")));
        }
        Ok(message)
    }

    /// Apply `patch` locally, write it, and undo it if the write fails.
    async fn commit(&self, message: &Message, patch: MessagePatch) -> Result<(), ChatError> {
        let fields = patch.to_fields();
        let rollback = self.optimistic.patch(&message.id, patch)?;
        let result = self
            .remote
            .update(
                &Collection::Messages(message.channel_id.clone()),
                message.id.as_str(),
                fields,
            )
            .await;
        if let Err(e) = &result {
            warn!(message_id = %message.id, error = %e, "message update failed, rolling back");
            self.optimistic.rollback(rollback);
        }
        result
    }

    pub async fn edit_message(&self, id: &MessageId, content: &str) -> Result<(), ChatError> {
        let message = self.load(id)?;
        if !can_edit_message(message.author_id == self.session.id) {
            return Err(ChatError::denied("only the author may edit a message"));
        }
        if content.trim().is_empty() {
            return Err(ChatError::validation("message is empty"));
        }
        if content.chars().count() > self.max_message_len {
            return Err(ChatError::validation(format!(
                "message exceeds {} characters",
                self.max_message_len
            )));
        }

        let now = Utc::now();
        let mut patch = MessagePatch::new(now);
        patch.content = Some(content.to_string());
        patch.edited_at = Some(now);
        self.commit(&message, patch).await?;
        info!(message_id = %id, "message edited");
        Ok(())
    }

    /// Soft delete: the message stays in place with its content cleared.
    pub async fn delete_message(&self, id: &MessageId) -> Result<(), ChatError> {
        let message = self.load(id)?;
        if !can_delete_message(self.session.role, message.author_id == self.session.id) {
            return Err(ChatError::denied(format!(
                "{} may not delete this message",
                self.session.role
            )));
        }

        let mut patch = MessagePatch::new(Utc::now());
        patch.is_deleted = Some(true);
        patch.content = Some(String::new());
        patch.attachments = Some(Vec::new());
        self.commit(&message, patch).await?;
        info!(message_id = %id, "message deleted");
        Ok(())
    }

    pub async fn pin_message(&self, id: &MessageId) -> Result<(), ChatError> {
        self.set_pinned(id, true).await
    }

    pub async fn unpin_message(&self, id: &MessageId) -> Result<(), ChatError> {
        self.set_pinned(id, false).await
    }

    async fn set_pinned(&self, id: &MessageId, pinned: bool) -> Result<(), ChatError> {
        let message = self.load(id)?;
        if !can_pin_message(self.session.role) {
            return Err(ChatError::denied(format!(
                "{} may not pin messages",
                self.session.role
            )));
        }
        if message.is_pinned == pinned {
            return Ok(());
        }

        let mut patch = MessagePatch::new(Utc::now());
        patch.is_pinned = Some(pinned);
        self.commit(&message, patch).await?;
        info!(message_id = %id, pinned, "message pin changed");
        Ok(())
    }

    /// Add the session user's `emoji` reaction, or remove it if present.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ChatError> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ChatError::validation("empty reaction"));
        }
        let message = self.load(id)?;

        let mut patch = MessagePatch::new(Utc::now());
        patch.reactions = Some(message.toggled_reactions(emoji, &self.session.id));
        self.commit(&message, patch).await?;
        debug!(message_id = %id, emoji, "reaction toggled");
        Ok(())
    }

    /// Reset the local unread count of `channel`, then mark the DM preview
    /// and the session user's notifications for it as read remotely.
    ///
    /// Every remote update is attempted even when an earlier one fails; the
    /// first failure is returned once all of them have run.
    pub async fn mark_read(&self, channel: &ChannelId) -> Result<(), ChatError> {
        self.optimistic.mark_read(channel, &self.session.id);

        let (dm, notifications) = self.store.read(|s| {
            let dm = s.dm_channel(channel).cloned();
            let notifications: Vec<_> = s
                .notifications_for(&self.session.id)
                .into_iter()
                .filter(|n| &n.channel_id == channel && !n.is_read)
                .map(|n| n.id)
                .collect();
            (dm, notifications)
        });

        let mut first_error = None;
        if let Some(last) = dm.and_then(|dm| dm.last_message) {
            if last.sender_id != self.session.id && !last.is_read {
                let mut read = last;
                read.is_read = true;
                let mut fields = Map::new();
                fields.insert("lastMessage".into(), serde_json::to_value(&read)?);
                if let Err(e) = self
                    .remote
                    .update(&Collection::DirectMessageChannels, channel.as_str(), fields)
                    .await
                {
                    warn!(channel_id = %channel, error = %e, "failed to mark DM preview read");
                    first_error.get_or_insert(e);
                }
            }
        }

        for id in notifications {
            let mut fields = Map::new();
            fields.insert("isRead".into(), Value::Bool(true));
            if let Err(e) = self
                .remote
                .update(&Collection::Notifications, id.as_str(), fields)
                .await
            {
                warn!(notification_id = %id, error = %e, "failed to mark notification read");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(channel_id = %channel, "channel marked read");
                Ok(())
            }
        }
    }

    /// Publish whether the session user is typing in `channel`.
    pub async fn update_typing_status(
        &self,
        channel: &ChannelId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let body = TypingDoc {
            channel_id: channel.clone(),
            user_id: self.session.id.clone(),
            is_typing,
            updated_at: Utc::now(),
        };
        let doc = RemoteDocument::encode(typing_doc_id(channel, &self.session.id), &body)?;
        self.remote.set(&Collection::TypingStatus, doc).await
    }
}
