//! Optimistic update manager.
//!
//! Local edits are shown immediately and reconciled once the remote store
//! answers. A pending message lives under a provisional `tmp-` id and is
//! paired with its confirmation by correlation token only; the confirmed
//! record takes over the pending entry's list slot. Patches to existing
//! messages capture the previous record so a failed remote call can be
//! rolled back.

use tracing::{debug, warn};

use shopfloor_shared::{ChannelId, ChatError, CorrelationToken, MessageId, UserId};
use shopfloor_store::{Change, Effect, Message, MessagePatch, SharedStore};

/// How a confirmation was folded into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The pending entry was replaced in place.
    Replaced,
    /// The change feed delivered the confirmed record first.
    AlreadyConfirmed,
    /// The pending entry had been discarded; nothing was changed.
    Dropped,
}

/// Captured state needed to undo an optimistic patch.
#[derive(Debug, Clone)]
pub struct Rollback {
    previous: Message,
    patched_at: chrono::DateTime<chrono::Utc>,
}

impl Rollback {
    pub fn message_id(&self) -> &MessageId {
        &self.previous.id
    }
}

#[derive(Debug, Clone)]
pub struct OptimisticUpdates {
    store: SharedStore,
}

impl OptimisticUpdates {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Show a pending message at the end of its channel.
    pub fn insert_pending(&self, message: Message) -> Effect {
        debug!(temp_id = %message.id, channel_id = %message.channel_id, "pending message inserted");
        self.store.apply(Change::InsertProvisional(message))
    }

    /// Fold the stored message of `token` into the store. A discard wins
    /// over a feed delivery that already inserted the stored record.
    pub fn confirm(&self, token: CorrelationToken, confirmed: Message) -> Reconciliation {
        self.store.transact(|store| {
            if store.was_discarded(&token) {
                store.apply(Change::ConfirmProvisional {
                    token,
                    message: confirmed,
                });
                debug!(token = %token, "confirmation for discarded message dropped");
                Reconciliation::Dropped
            } else if store.provisional_for(&token).is_some() {
                store.apply(Change::ConfirmProvisional {
                    token,
                    message: confirmed,
                });
                Reconciliation::Replaced
            } else if store.message(&confirmed.id).is_some() {
                store.apply(Change::ConfirmProvisional {
                    token,
                    message: confirmed,
                });
                Reconciliation::AlreadyConfirmed
            } else {
                debug!(token = %token, "confirmation for discarded message dropped");
                Reconciliation::Dropped
            }
        })
    }

    /// Mark the pending entry of `token` as failed. Returns `false` when it
    /// is gone (discarded or already confirmed).
    pub fn fail(&self, token: CorrelationToken, error: &ChatError) -> bool {
        self.store
            .apply(Change::MarkFailed {
                token,
                error: error.to_string(),
            })
            .changed()
    }

    /// Remove a pending or failed entry.
    pub fn discard(&self, temp_id: &MessageId) -> Result<(), ChatError> {
        if !temp_id.is_provisional() {
            return Err(ChatError::validation(format!(
                "{temp_id} is not a provisional message"
            )));
        }
        match self.store.apply(Change::DiscardProvisional {
            id: temp_id.clone(),
        }) {
            Effect::Ignored => Err(ChatError::not_found(format!("message {temp_id}"))),
            _ => Ok(()),
        }
    }

    /// Apply `patch` locally and return what is needed to undo it.
    pub fn patch(&self, id: &MessageId, patch: MessagePatch) -> Result<Rollback, ChatError> {
        self.store.transact(|store| {
            let previous = store
                .message(id)
                .cloned()
                .ok_or_else(|| ChatError::not_found(format!("message {id}")))?;
            let patched_at = patch.updated_at;
            store.apply(Change::PatchMessage {
                id: id.clone(),
                patch,
            });
            Ok(Rollback {
                previous,
                patched_at,
            })
        })
    }

    /// Undo a patch, unless a newer remote update replaced it meanwhile.
    pub fn rollback(&self, rollback: Rollback) {
        self.store.transact(|store| {
            let untouched = store
                .message(&rollback.previous.id)
                .map(|m| m.updated_at == rollback.patched_at)
                .unwrap_or(true);
            if untouched {
                store.apply(Change::RestoreMessage(rollback.previous));
            } else {
                warn!(message_id = %rollback.previous.id, "rollback skipped, message changed remotely");
            }
        });
    }

    /// Reset the unread counter of `channel` for `user`.
    pub fn mark_read(&self, channel: &ChannelId, user: &UserId) {
        self.store.apply(Change::MarkRead {
            channel_id: channel.clone(),
            user_id: user.clone(),
        });
    }
}
