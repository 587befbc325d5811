//! # shopfloor-store
//!
//! Normalized in-memory cache of the chat entities.
//!
//! Every mutation is a named [`Change`] applied atomically to the
//! [`EntityStore`]. Remote documents enter the store only after strict
//! validation in [`decode`]; rejected documents are dropped with a warning
//! by the caller. Selectors in [`selectors`] derive the read views (channel
//! timelines, visible channels, unread counts, typing users).

pub mod change;
pub mod decode;
pub mod models;
pub mod selectors;
pub mod shared;
pub mod store;

mod error;

pub use change::{Change, Records};
pub use error::{Result, StoreError};
pub use models::*;
pub use selectors::EntityRecord;
pub use shared::SharedStore;
pub use store::{Effect, EntityStore};
