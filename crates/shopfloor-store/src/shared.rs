//! Thread-safe handle to the entity store.
//!
//! Every component of the client holds a clone of the same [`SharedStore`].
//! The lock is taken for the duration of one closure and never across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::change::Change;
use crate::store::{EntityStore, Effect};

#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<EntityStore>>,
}

impl SharedStore {
    pub fn new(store: EntityStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntityStore> {
        // A panic inside a closure cannot leave a change half applied, so a
        // poisoned lock still guards consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, change: Change) -> Effect {
        self.lock().apply(change)
    }

    /// Run `f` against a consistent view of the store.
    pub fn read<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with exclusive access, for read-then-apply sequences that
    /// must not interleave with other writers.
    pub fn transact<R>(&self, f: impl FnOnce(&mut EntityStore) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Records;
    use crate::test_support::sent_message;
    use shopfloor_shared::ChannelId;

    #[test]
    fn test_clones_share_state() {
        let store = SharedStore::default();
        let other = store.clone();
        other.apply(Change::Upsert(Records::Messages(vec![sent_message(
            "m1", "c1", "u1", "hi", 0,
        )])));
        let count = store.read(|s| s.select_by_channel(&ChannelId::new("c1")).len());
        assert_eq!(count, 1);
    }
}
