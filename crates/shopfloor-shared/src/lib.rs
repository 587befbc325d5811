//! # shopfloor-shared
//!
//! Types shared by the store and the client: ids and enums, the error
//! taxonomy, the role-based permission model, and the document shapes of
//! the remote store.

pub mod constants;
pub mod error;
pub mod permissions;
pub mod protocol;
pub mod types;

pub use error::ChatError;
pub use types::*;
