#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use shopfloor_client::sync::FeedUpdate;
use shopfloor_client::{ChatClient, ClientConfig, FeedListener, InMemoryRemote, SessionUser};
use shopfloor_shared::protocol::{Collection, RemoteDocument};
use shopfloor_shared::{ChannelId, ChatError, Role};
use shopfloor_shared::protocol::FeedKey;

pub fn remote() -> Arc<InMemoryRemote> {
    Arc::new(InMemoryRemote::new())
}

pub fn client(remote: &Arc<InMemoryRemote>, id: &str, role: Role) -> ChatClient {
    ChatClient::new(
        remote.clone(),
        SessionUser::new(id, id.to_uppercase(), role),
        ClientConfig::default(),
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached in time");
}

pub fn seed_category(remote: &InMemoryRemote, id: &str, position: i64) {
    remote.seed(
        Collection::Categories,
        RemoteDocument::new(id, json!({ "name": id, "position": position })),
    );
}

pub fn seed_channel(remote: &InMemoryRemote, id: &str, category: &str) {
    remote.seed(
        Collection::Channels,
        RemoteDocument::new(
            id,
            json!({ "name": id, "type": "text", "categoryId": category, "position": 0 }),
        ),
    );
}

/// Store a message authored by `author` directly in the remote store.
pub fn seed_message(remote: &InMemoryRemote, channel: &str, id: &str, author: &str, millis: i64) {
    remote.seed(
        Collection::Messages(ChannelId::new(channel)),
        RemoteDocument::new(
            id,
            json!({
                "content": format!("message {id}"),
                "authorId": author,
                "authorName": author,
                "type": "text",
                "createdAt": millis,
            }),
        ),
    );
}

/// Listener that records every update and error it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    pub updates: Arc<Mutex<Vec<FeedUpdate>>>,
    pub errors: Arc<Mutex<Vec<(FeedKey, ChatError)>>>,
}

impl Recorder {
    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl FeedListener for Recorder {
    fn on_update(&self, update: &FeedUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }

    fn on_error(&self, key: &FeedKey, error: &ChatError) {
        self.errors.lock().unwrap().push((key.clone(), error.clone()));
    }
}

pub fn ignore() -> impl FeedListener {
    |_: &FeedUpdate| {}
}
