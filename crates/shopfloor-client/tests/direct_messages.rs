mod common;

use std::time::Duration;

use futures::future::join_all;

use common::{client, remote, wait_until, Recorder};
use shopfloor_client::{Draft, SendOutcome};
use shopfloor_shared::protocol::{Collection, FeedKey};
use shopfloor_shared::{ChannelId, Role, UserId};

#[tokio::test]
async fn test_concurrent_resolution_yields_one_channel() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let bob = client(&remote, "bob", Role::Leader);
    let (alice_id, bob_id) = (UserId::new("alice"), UserId::new("bob"));

    let mut calls = Vec::new();
    for _ in 0..4 {
        calls.push(alice.get_or_create_dm(&bob_id));
        calls.push(bob.get_or_create_dm(&alice_id));
    }
    let results = join_all(calls).await;

    for result in &results {
        let dm = result.as_ref().unwrap();
        assert_eq!(dm.id, ChannelId::new("alice_bob"));
        assert_eq!(dm.participants, [alice_id.clone(), bob_id.clone()]);
    }
    assert_eq!(remote.documents(&Collection::DirectMessageChannels).len(), 1);
}

#[tokio::test]
async fn test_open_dm_subscribes_messages() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let bob = client(&remote, "bob", Role::Worker);

    let recorder = Recorder::default();
    let (dm, _sub) = alice
        .open_dm(&UserId::new("bob"), recorder.clone())
        .await
        .unwrap();
    assert_eq!(
        alice.sync().listener_count(&FeedKey::Messages(dm.id.clone())),
        1
    );
    wait_until(|| recorder.update_count() == 1).await;

    let outcome = bob.send_message(Draft::text(dm.id.clone(), "hi")).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent(_)));
    wait_until(|| alice.unread_count(&dm.id) == 1).await;
}

#[tokio::test]
async fn test_dm_list_follows_last_message() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let recorder = Recorder::default();
    let _sub = alice.subscribe(FeedKey::DirectMessages(UserId::new("alice")), recorder.clone());

    let with_bob = alice.get_or_create_dm(&UserId::new("bob")).await.unwrap();
    let with_carol = alice.get_or_create_dm(&UserId::new("carol")).await.unwrap();
    alice
        .send_message(Draft::text(with_bob.id.clone(), "first"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    alice
        .send_message(Draft::text(with_carol.id.clone(), "second"))
        .await
        .unwrap();

    // Initial snapshot, two creations, two lastMessage updates.
    wait_until(|| recorder.update_count() == 5).await;
    let order: Vec<ChannelId> = alice
        .store()
        .read(|s| s.dm_channels_for(&UserId::new("alice")))
        .into_iter()
        .map(|dm| dm.id)
        .collect();
    assert_eq!(order, vec![with_carol.id, with_bob.id]);
}
