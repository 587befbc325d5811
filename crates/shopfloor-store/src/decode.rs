//! Validation of raw remote documents into strict store models.
//!
//! Remote documents are dynamically shaped. Each decoder either produces a
//! fully valid model or rejects the document with [`StoreError::Rejected`];
//! rejected documents never reach the store.

use shopfloor_shared::protocol::{
    dm_channel_id, CategoryDoc, ChannelDoc, DmChannelDoc, MessageDoc, NotificationDoc,
    RemoteDocument, TypingDoc, UserDoc,
};
use shopfloor_shared::{
    CategoryId, ChannelId, MessageId, MessageStatus, NotificationId, UserId,
};

use crate::error::{Result, StoreError};
use crate::models::{
    Category, Channel, DirectMessageChannel, EntityKind, Message, Notification, TypingEntry, User,
};

fn reject(kind: EntityKind, doc: &RemoteDocument, reason: impl Into<String>) -> StoreError {
    StoreError::Rejected {
        kind,
        id: doc.id.clone(),
        reason: reason.into(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: EntityKind, doc: &RemoteDocument) -> Result<T> {
    doc.decode().map_err(|e| reject(kind, doc, e.to_string()))
}

pub fn decode_channel(doc: &RemoteDocument) -> Result<Channel> {
    let kind = EntityKind::Channel;
    let body: ChannelDoc = parse(kind, doc)?;

    if body.name.trim().is_empty() {
        return Err(reject(kind, doc, "empty channel name"));
    }
    let category_id = match body.category_id {
        Some(id) if !id.as_str().trim().is_empty() => id,
        _ => return Err(reject(kind, doc, "channel has no categoryId")),
    };

    Ok(Channel {
        id: ChannelId::new(doc.id.clone()),
        name: body.name,
        kind: body.kind,
        category_id,
        is_private: body.is_private,
        allowed_roles: body.allowed_roles,
        position: body.position,
        created_by: body.created_by,
        updated_at: body.updated_at.unwrap_or_default(),
    })
}

pub fn decode_category(doc: &RemoteDocument) -> Result<Category> {
    let kind = EntityKind::Category;
    let body: CategoryDoc = parse(kind, doc)?;

    if body.name.trim().is_empty() {
        return Err(reject(kind, doc, "empty category name"));
    }

    Ok(Category {
        id: CategoryId::new(doc.id.clone()),
        name: body.name,
        position: body.position,
        permissions: body.permissions.resolved(),
        updated_at: body.updated_at.unwrap_or_default(),
    })
}

/// Decode a message of the subcollection of `channel`.
pub fn decode_message(channel: &ChannelId, doc: &RemoteDocument) -> Result<Message> {
    let kind = EntityKind::Message;
    let body: MessageDoc = parse(kind, doc)?;

    if body.author_id.as_str().is_empty() {
        return Err(reject(kind, doc, "message has no authorId"));
    }
    let id = MessageId::new(doc.id.clone());
    if id.is_provisional() {
        return Err(reject(kind, doc, "remote message uses a provisional id"));
    }

    let updated_at = body
        .updated_at
        .or(body.edited_at)
        .unwrap_or(body.created_at);

    Ok(Message {
        id,
        channel_id: channel.clone(),
        author_id: body.author_id,
        author_name: body.author_name,
        kind: body.kind,
        content: body.content,
        attachments: body.attachments,
        reactions: body.reactions,
        mentions: body.mentions,
        reply_to: body.reply_to,
        thread_parent_id: body.thread_parent_id,
        status: MessageStatus::Sent,
        is_pinned: body.is_pinned,
        is_deleted: body.is_deleted,
        edited_at: body.edited_at,
        created_at: body.created_at,
        updated_at,
        correlation: body.client_token,
        error: None,
    })
}

pub fn decode_dm_channel(doc: &RemoteDocument) -> Result<DirectMessageChannel> {
    let kind = EntityKind::DirectMessageChannel;
    let body: DmChannelDoc = parse(kind, doc)?;

    let [a, b]: [UserId; 2] = body
        .participants
        .try_into()
        .map_err(|_| reject(kind, doc, "DM channel must have exactly two participants"))?;
    let expected = dm_channel_id(&a, &b);
    if expected.as_str() != doc.id {
        return Err(reject(
            kind,
            doc,
            format!("DM id does not match participants (expected {expected})"),
        ));
    }
    let participants = if a <= b { [a, b] } else { [b, a] };

    Ok(DirectMessageChannel {
        id: expected,
        participants,
        last_message: body.last_message,
        updated_at: body.updated_at.or(body.created_at).unwrap_or_default(),
    })
}

pub fn decode_user(doc: &RemoteDocument) -> Result<User> {
    let body: UserDoc = parse(EntityKind::User, doc)?;

    Ok(User {
        id: UserId::new(doc.id.clone()),
        name: body.name,
        role: body.role,
        department: body.department,
        status: body.status,
        last_seen: body.last_seen,
        updated_at: body.updated_at.or(body.last_seen).unwrap_or_default(),
    })
}

pub fn decode_notification(doc: &RemoteDocument) -> Result<Notification> {
    let body: NotificationDoc = parse(EntityKind::Notification, doc)?;

    Ok(Notification {
        id: NotificationId::new(doc.id.clone()),
        user_id: body.user_id,
        channel_id: body.channel_id,
        message_id: body.message_id,
        kind: body.kind,
        body: body.body,
        is_read: body.is_read,
        created_at: body.created_at,
    })
}

/// Typing documents are not store entities; malformed ones are reported
/// with the document id only.
pub fn decode_typing(doc: &RemoteDocument) -> Result<TypingEntry> {
    let body: TypingDoc = doc
        .decode()
        .map_err(|e| StoreError::MalformedTyping(doc.id.clone(), e.to_string()))?;

    Ok(TypingEntry {
        channel_id: body.channel_id,
        user_id: body.user_id,
        is_typing: body.is_typing,
        updated_at: body.updated_at,
    })
}
