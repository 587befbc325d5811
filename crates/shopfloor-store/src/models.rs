//! Domain model structs held by the entity store.
//!
//! Every struct derives `Serialize` and `Deserialize` so that changes
//! carrying them can be journaled and replayed.

use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfloor_shared::permissions::CategoryPermissions;
use shopfloor_shared::protocol::{Attachment, LastMessage, Reaction};
use shopfloor_shared::{
    CategoryId, ChannelId, ChannelType, CorrelationToken, MessageId, MessageKind, MessageStatus,
    NotificationId, NotificationKind, PresenceStatus, Role, UserId,
};

/// Entity families stored in the normalized store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    Channel,
    Category,
    DirectMessageChannel,
    User,
    Notification,
}

/// A record that can be merged by id with last-write-wins semantics.
pub trait Entity: Clone {
    type Id: Clone + Eq + Hash + From<String>;

    fn id(&self) -> &Self::Id;

    /// Ordering key for last-write-wins merges.
    fn updated_at(&self) -> DateTime<Utc>;
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Channel or DM channel the message belongs to.
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    pub kind: MessageKind,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub mentions: Vec<UserId>,
    pub reply_to: Option<MessageId>,
    pub thread_parent_id: Option<MessageId>,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub is_deleted: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Correlation token of the send that created this message, if any.
    pub correlation: Option<CorrelationToken>,
    /// Why the last send attempt failed (only set while `status` is failed).
    pub error: Option<String>,
}

impl Message {
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub fn has_reacted(&self, emoji: &str, user: &UserId) -> bool {
        self.reactions
            .iter()
            .any(|r| r.emoji == emoji && r.users.contains(user))
    }

    /// Reaction list after `user` toggles `emoji`. Emojis left without
    /// users are dropped.
    pub fn toggled_reactions(&self, emoji: &str, user: &UserId) -> Vec<Reaction> {
        let mut reactions = self.reactions.clone();
        match reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(reaction) => {
                if let Some(pos) = reaction.users.iter().position(|u| u == user) {
                    reaction.users.remove(pos);
                } else {
                    reaction.users.push(user.clone());
                }
            }
            None => reactions.push(Reaction {
                emoji: emoji.to_string(),
                users: vec![user.clone()],
            }),
        }
        reactions.retain(|r| !r.users.is_empty());
        reactions
    }
}

impl Entity for Message {
    type Id = MessageId;

    fn id(&self) -> &MessageId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Partial update of a message. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reactions: Option<Vec<Reaction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl MessagePatch {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            ..Default::default()
        }
    }

    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(attachments) = &self.attachments {
            message.attachments = attachments.clone();
        }
        if let Some(reactions) = &self.reactions {
            message.reactions = reactions.clone();
        }
        if let Some(pinned) = self.is_pinned {
            message.is_pinned = pinned;
        }
        if let Some(deleted) = self.is_deleted {
            message.is_deleted = deleted;
        }
        if self.edited_at.is_some() {
            message.edited_at = self.edited_at;
        }
        message.updated_at = self.updated_at;
    }

    /// Field map in the remote document's naming, for a merge update.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel / Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelType,
    /// Never empty; channels without a category are rejected on decode.
    pub category_id: CategoryId,
    pub is_private: bool,
    pub allowed_roles: Vec<Role>,
    pub position: i64,
    pub created_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Channel {
    type Id = ChannelId;

    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub position: i64,
    /// Always stored in resolved form (view roles include manage roles).
    pub permissions: CategoryPermissions,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &CategoryId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectMessageChannel {
    pub id: ChannelId,
    /// Sorted pair of participants.
    pub participants: [UserId; 2],
    pub last_message: Option<LastMessage>,
    pub updated_at: DateTime<Utc>,
}

impl DirectMessageChannel {
    pub fn includes(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        if &self.participants[0] == user {
            Some(&self.participants[1])
        } else if &self.participants[1] == user {
            Some(&self.participants[0])
        } else {
            None
        }
    }
}

impl Entity for DirectMessageChannel {
    type Id = ChannelId;

    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// ---------------------------------------------------------------------------
// Users, notifications, typing
// ---------------------------------------------------------------------------

/// A user as seen through the presence feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub department: String,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub message_id: Option<MessageId>,
    pub kind: NotificationKind,
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Notification {
    type Id = NotificationId;

    fn id(&self) -> &NotificationId {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Ephemeral typing indicator. Expires client-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingEntry {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}
