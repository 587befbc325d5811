//! Named, serializable descriptions of every store mutation.
//!
//! The store can only be changed by applying a [`Change`]. Because changes
//! are plain data they can be logged, journaled and replayed in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_shared::{ChannelId, CorrelationToken, MessageId, UserId};

use crate::models::{
    Category, Channel, DirectMessageChannel, EntityKind, Message, MessagePatch, Notification,
    TypingEntry, User,
};

/// A homogeneous batch of records for [`Change::Upsert`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum Records {
    Messages(Vec<Message>),
    Channels(Vec<Channel>),
    Categories(Vec<Category>),
    DirectMessageChannels(Vec<DirectMessageChannel>),
    Users(Vec<User>),
    Notifications(Vec<Notification>),
}

impl Records {
    pub fn kind(&self) -> EntityKind {
        match self {
            Records::Messages(_) => EntityKind::Message,
            Records::Channels(_) => EntityKind::Channel,
            Records::Categories(_) => EntityKind::Category,
            Records::DirectMessageChannels(_) => EntityKind::DirectMessageChannel,
            Records::Users(_) => EntityKind::User,
            Records::Notifications(_) => EntityKind::Notification,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Messages(r) => r.len(),
            Records::Channels(r) => r.len(),
            Records::Categories(r) => r.len(),
            Records::DirectMessageChannels(r) => r.len(),
            Records::Users(r) => r.len(),
            Records::Notifications(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum Change {
    /// Merge records by id, last write wins on `updated_at`.
    Upsert(Records),

    Remove { kind: EntityKind, id: String },

    /// Append a pending message at the end of its channel list.
    InsertProvisional(Message),

    /// Replace the provisional message registered under `token` with its
    /// confirmed counterpart, keeping its list position.
    ConfirmProvisional {
        token: CorrelationToken,
        message: Message,
    },

    MarkFailed {
        token: CorrelationToken,
        error: String,
    },

    /// Drop a provisional (pending or failed) message.
    DiscardProvisional { id: MessageId },

    PatchMessage { id: MessageId, patch: MessagePatch },

    /// Put back a previously captured message verbatim (rollback).
    RestoreMessage(Message),

    IncrementUnread {
        channel_id: ChannelId,
        user_id: UserId,
        by: u32,
    },

    MarkRead {
        channel_id: ChannelId,
        user_id: UserId,
    },

    SetTyping(Vec<TypingEntry>),

    /// Forget typing entries last refreshed before `before`.
    ExpireTyping { before: DateTime<Utc> },

    /// Several changes applied as one atomic step.
    Batch(Vec<Change>),
}

impl Change {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Change::Upsert(_) => "upsert",
            Change::Remove { .. } => "remove",
            Change::InsertProvisional(_) => "insert_provisional",
            Change::ConfirmProvisional { .. } => "confirm_provisional",
            Change::MarkFailed { .. } => "mark_failed",
            Change::DiscardProvisional { .. } => "discard_provisional",
            Change::PatchMessage { .. } => "patch_message",
            Change::RestoreMessage(_) => "restore_message",
            Change::IncrementUnread { .. } => "increment_unread",
            Change::MarkRead { .. } => "mark_read",
            Change::SetTyping(_) => "set_typing",
            Change::ExpireTyping { .. } => "expire_typing",
            Change::Batch(_) => "batch",
        }
    }
}
