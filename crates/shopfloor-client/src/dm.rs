//! Direct-message channel resolver.
//!
//! A DM channel's id is derived from its two participants, so every client
//! resolving the same pair lands on the same document. Two clients creating
//! the channel at the same moment both write identical content; the last
//! write wins and the result is still exactly one channel.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use shopfloor_shared::constants::DM_ID_SEPARATOR;
use shopfloor_shared::protocol::{dm_channel_id, Collection, DmChannelDoc, FeedKey, RemoteDocument};
use shopfloor_shared::{ChatError, UserId};
use shopfloor_store::decode::decode_dm_channel;
use shopfloor_store::DirectMessageChannel;

use crate::remote::RemoteStore;
use crate::sync::{FeedListener, Subscription, SyncManager};

#[derive(Clone)]
pub struct DmResolver {
    remote: Arc<dyn RemoteStore>,
    sync: SyncManager,
}

impl DmResolver {
    pub fn new(remote: Arc<dyn RemoteStore>, sync: SyncManager) -> Self {
        Self { remote, sync }
    }

    /// Return the DM channel between `a` and `b`, creating it if needed.
    pub async fn get_or_create(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<DirectMessageChannel, ChatError> {
        validate_pair(a, b)?;
        let id = dm_channel_id(a, b);
        let collection = Collection::DirectMessageChannels;

        if let Some(doc) = self.remote.get(&collection, id.as_str()).await? {
            debug!(channel_id = %id, "DM channel exists");
            return Ok(decode_dm_channel(&doc)?);
        }

        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let now = Utc::now();
        let body = DmChannelDoc {
            participants: vec![lo.clone(), hi.clone()],
            last_message: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        let doc = RemoteDocument::encode(id.as_str(), &body)?;
        self.remote.set(&collection, doc.clone()).await?;
        info!(channel_id = %id, "DM channel created");
        Ok(decode_dm_channel(&doc)?)
    }

    /// Resolve the DM channel and subscribe to its messages.
    pub async fn open(
        &self,
        a: &UserId,
        b: &UserId,
        listener: impl FeedListener + 'static,
    ) -> Result<(DirectMessageChannel, Subscription), ChatError> {
        let channel = self.get_or_create(a, b).await?;
        let subscription = self
            .sync
            .subscribe(FeedKey::Messages(channel.id.clone()), listener);
        Ok((channel, subscription))
    }
}

fn validate_pair(a: &UserId, b: &UserId) -> Result<(), ChatError> {
    for user in [a, b] {
        if user.as_str().is_empty() {
            return Err(ChatError::validation("empty user id"));
        }
        if user.as_str().contains(DM_ID_SEPARATOR) {
            return Err(ChatError::validation(format!(
                "user id {user} contains '{DM_ID_SEPARATOR}'"
            )));
        }
    }
    if a == b {
        return Err(ChatError::validation("cannot open a DM with oneself"));
    }
    Ok(())
}
