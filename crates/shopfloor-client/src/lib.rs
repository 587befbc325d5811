//! # shopfloor-client
//!
//! Real-time chat synchronization engine. Reconciles optimistic local edits
//! with the remote document store, shares live change feeds between
//! subscribers, and resolves direct-message channels.

pub mod actions;
pub mod admin;
pub mod client;
pub mod config;
pub mod dm;
pub mod memory;
pub mod optimistic;
pub mod queue;
pub mod remote;
pub mod session;
pub mod sync;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::ChatClient;
pub use config::ClientConfig;
pub use memory::InMemoryRemote;
pub use queue::{Draft, PendingSend, SendOutcome};
pub use remote::{FeedStream, RemoteStore};
pub use session::SessionUser;
pub use sync::{FeedListener, FeedStatus, FeedUpdate, Subscription, SyncManager};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it twice is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shopfloor_client=debug,shopfloor_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
