//! Shapes of the documents kept in the hosted document database, and of the
//! change-feed traffic that carries them.
//!
//! Field names follow the remote collections (camelCase, timestamps as
//! epoch milliseconds). These structs are the write format and the first
//! decoding step; strict validation into domain models happens in the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{DM_ID_SEPARATOR, TYPING_ID_SEPARATOR};
use crate::error::ChatError;
use crate::permissions::CategoryPermissions;
use crate::types::{
    CategoryId, ChannelId, ChannelType, CorrelationToken, MessageId, MessageKind,
    NotificationKind, PresenceStatus, Role, UserId,
};

// ---------------------------------------------------------------------------
// Collections and feeds
// ---------------------------------------------------------------------------

/// A logical collection of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Channels,
    Categories,
    /// Message subcollection of a channel or DM channel.
    Messages(ChannelId),
    DirectMessageChannels,
    Users,
    TypingStatus,
    Notifications,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Channels => f.write_str("channels"),
            Collection::Categories => f.write_str("categories"),
            Collection::Messages(channel) => write!(f, "channels/{channel}/messages"),
            Collection::DirectMessageChannels => f.write_str("directMessageChannels"),
            Collection::Users => f.write_str("users"),
            Collection::TypingStatus => f.write_str("typingStatus"),
            Collection::Notifications => f.write_str("notifications"),
        }
    }
}

/// Identity of one live change feed. At most one remote feed is open per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKey {
    Channels,
    Categories,
    Users,
    Messages(ChannelId),
    Typing(ChannelId),
    Notifications(UserId),
    DirectMessages(UserId),
}

impl FeedKey {
    pub fn collection(&self) -> Collection {
        match self {
            FeedKey::Channels => Collection::Channels,
            FeedKey::Categories => Collection::Categories,
            FeedKey::Users => Collection::Users,
            FeedKey::Messages(channel) => Collection::Messages(channel.clone()),
            FeedKey::Typing(_) => Collection::TypingStatus,
            FeedKey::Notifications(_) => Collection::Notifications,
            FeedKey::DirectMessages(_) => Collection::DirectMessageChannels,
        }
    }

    /// Typing feeds carry presence-like state that is never persisted.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, FeedKey::Typing(_))
    }

    /// Whether a document of [`FeedKey::collection`] belongs to this feed.
    pub fn matches(&self, doc: &RemoteDocument) -> bool {
        match self {
            FeedKey::Typing(channel) => doc.str_field("channelId") == Some(channel.as_str()),
            FeedKey::Notifications(user) => doc.str_field("userId") == Some(user.as_str()),
            FeedKey::DirectMessages(user) => doc
                .data
                .get("participants")
                .and_then(|p| p.as_array())
                .map(|p| p.iter().any(|v| v.as_str() == Some(user.as_str())))
                .unwrap_or(false),
            _ => true,
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKey::Channels => f.write_str("channels"),
            FeedKey::Categories => f.write_str("categories"),
            FeedKey::Users => f.write_str("users"),
            FeedKey::Messages(channel) => write!(f, "messages:{channel}"),
            FeedKey::Typing(channel) => write!(f, "typing:{channel}"),
            FeedKey::Notifications(user) => write!(f, "notifications:{user}"),
            FeedKey::DirectMessages(user) => write!(f, "dms:{user}"),
        }
    }
}

/// A raw document as delivered by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub data: serde_json::Value,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Serialize a typed document body.
    pub fn encode<T: Serialize>(id: impl Into<String>, body: &T) -> Result<Self, ChatError> {
        Ok(Self::new(id, serde_json::to_value(body)?))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(|v| v.as_str())
    }

    /// Millisecond timestamp field, if present.
    pub fn millis_field(&self, name: &str) -> Option<i64> {
        self.data.get(name).and_then(|v| v.as_i64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub doc: RemoteDocument,
}

/// The full ordered batch of changes delivered for one feed key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: FeedKey,
    pub changes: Vec<DocChange>,
}

/// One delivery on a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Snapshot(Snapshot),
    /// The feed failed (permission revoked, disconnect). No further
    /// snapshots are expected on it.
    Error(ChatError),
}

// ---------------------------------------------------------------------------
// Identity helpers
// ---------------------------------------------------------------------------

/// Canonical DM channel id for an unordered pair of users: both ids sorted
/// lexicographically and joined with [`DM_ID_SEPARATOR`].
pub fn dm_channel_id(a: &UserId, b: &UserId) -> ChannelId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    ChannelId(format!("{lo}{DM_ID_SEPARATOR}{hi}"))
}

/// Split a DM channel id back into its participants, if it has the
/// canonical `lo_hi` shape.
pub fn dm_participants(id: &ChannelId) -> Option<(UserId, UserId)> {
    let (lo, hi) = id.as_str().split_once(DM_ID_SEPARATOR)?;
    if lo.is_empty() || hi.is_empty() || hi.contains(DM_ID_SEPARATOR) || lo >= hi {
        return None;
    }
    Some((UserId::new(lo), UserId::new(hi)))
}

pub fn typing_doc_id(channel: &ChannelId, user: &UserId) -> String {
    format!("{channel}{TYPING_ID_SEPARATOR}{user}")
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Users who reacted with one emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDoc {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ChannelType,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub allowed_roles: Vec<Role>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDoc {
    pub name: String,
    #[serde(default)]
    pub permissions: CategoryPermissions,
    #[serde(default)]
    pub position: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub content: String,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default, rename = "threadParentId")]
    pub thread_parent_id: Option<MessageId>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Correlation token of the send that produced this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<CorrelationToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: UserId,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmChannelDoc {
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingDoc {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub is_typing: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDoc {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dm_channel_id_is_order_independent() {
        let a = UserId::new("alice");
        let b = UserId::new("bob");
        assert_eq!(dm_channel_id(&a, &b), dm_channel_id(&b, &a));
        assert_eq!(dm_channel_id(&b, &a).as_str(), "alice_bob");

        let (lo, hi) = dm_participants(&ChannelId::new("alice_bob")).unwrap();
        assert_eq!((lo.as_str(), hi.as_str()), ("alice", "bob"));
        assert!(dm_participants(&ChannelId::new("bob_alice")).is_none());
        assert!(dm_participants(&ChannelId::new("general")).is_none());
    }

    #[test]
    fn test_feed_matches_filters_by_field() {
        let doc = RemoteDocument::new(
            "c1:u1",
            json!({ "channelId": "c1", "userId": "u1", "isTyping": true, "updatedAt": 0 }),
        );
        assert!(FeedKey::Typing(ChannelId::new("c1")).matches(&doc));
        assert!(!FeedKey::Typing(ChannelId::new("c2")).matches(&doc));

        let dm = RemoteDocument::new("a_b", json!({ "participants": ["a", "b"] }));
        assert!(FeedKey::DirectMessages(UserId::new("b")).matches(&dm));
        assert!(!FeedKey::DirectMessages(UserId::new("c")).matches(&dm));
    }

    #[test]
    fn test_message_doc_wire_names() {
        let doc = RemoteDocument::new(
            "m1",
            json!({
                "content": "hi",
                "authorId": "u1",
                "type": "text",
                "threadParentId": "m0",
                "isPinned": true,
                "createdAt": 1_700_000_000_000i64,
            }),
        );
        let msg: MessageDoc = doc.decode().unwrap();
        assert_eq!(msg.thread_parent_id, Some(MessageId::new("m0")));
        assert!(msg.is_pinned);
        assert_eq!(msg.created_at.timestamp_millis(), 1_700_000_000_000);
        assert!(msg.client_token.is_none());
    }

    #[test]
    fn test_channel_doc_without_category_decodes_to_none() {
        let doc = RemoteDocument::new("c1", json!({ "name": "general", "type": "text" }));
        let channel: ChannelDoc = doc.decode().unwrap();
        assert!(channel.category_id.is_none());
    }
}
