mod common;

use std::time::Duration;

use common::{client, remote, seed_message, wait_until, Recorder};
use shopfloor_client::{Draft, SendOutcome};
use shopfloor_shared::protocol::Collection;
use shopfloor_shared::{ChannelId, ChatError, MessageId, MessageStatus, Role, UserId};

fn timeline(client: &shopfloor_client::ChatClient, channel: &str) -> Vec<(MessageId, MessageStatus)> {
    client.store().read(|s| {
        s.select_by_channel(&ChannelId::new(channel))
            .into_iter()
            .map(|m| (m.id, m.status))
            .collect()
    })
}

#[tokio::test]
async fn test_send_confirms_in_place() {
    let remote = remote();
    seed_message(&remote, "line-1", "earlier", "bob", 1_700_000_000_000);
    let alice = client(&remote, "alice", Role::Worker);
    let recorder = Recorder::default();
    let _sub = alice.subscribe_channel(&ChannelId::new("line-1"), recorder.clone());
    wait_until(|| recorder.update_count() >= 1).await;

    let pending = alice.enqueue_message(Draft::text("line-1", "hello")).unwrap();
    let temp_id = pending.temp_id().clone();
    assert_eq!(
        timeline(&alice, "line-1"),
        vec![
            (MessageId::new("earlier"), MessageStatus::Sent),
            (temp_id.clone(), MessageStatus::Pending),
        ]
    );

    let outcome = pending.dispatch().await;
    let SendOutcome::Sent(id) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    let expected = vec![
        (MessageId::new("earlier"), MessageStatus::Sent),
        (id.clone(), MessageStatus::Sent),
    ];
    assert_eq!(timeline(&alice, "line-1"), expected);

    // The feed echo of the same document changes nothing.
    wait_until(|| recorder.update_count() >= 2).await;
    assert_eq!(timeline(&alice, "line-1"), expected);
    assert!(alice.store().read(|s| s.message(&temp_id).is_none()));
}

#[tokio::test]
async fn test_feed_confirmation_before_send_response() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let recorder = Recorder::default();
    let _sub = alice.subscribe_channel(&ChannelId::new("line-1"), recorder.clone());
    wait_until(|| recorder.update_count() >= 1).await;

    remote.hold_responses();
    let pending = alice.enqueue_message(Draft::text("line-1", "hello")).unwrap();
    let send = tokio::spawn(pending.dispatch());

    wait_until(|| {
        let list = timeline(&alice, "line-1");
        list.len() == 1 && list[0].1 == MessageStatus::Sent
    })
    .await;

    remote.release_responses();
    let outcome = send.await.unwrap();
    assert!(matches!(outcome, SendOutcome::AlreadyConfirmed(_)), "{outcome:?}");
    assert_eq!(timeline(&alice, "line-1").len(), 1);
}

#[tokio::test]
async fn test_failed_send_then_manual_retry() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);

    remote.fail_next_writes(1);
    let outcome = alice.send_message(Draft::text("line-1", "hello")).await.unwrap();
    let SendOutcome::Failed { temp_id, .. } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(
        timeline(&alice, "line-1"),
        vec![(temp_id.clone(), MessageStatus::Failed)]
    );
    let failed = alice.store().read(|s| s.message(&temp_id).cloned()).unwrap();
    assert!(failed.error.is_some());

    let retried = alice.retry_message(&temp_id).await.unwrap();
    let SendOutcome::Sent(id) = retried else {
        panic!("unexpected outcome {retried:?}");
    };
    assert_eq!(
        timeline(&alice, "line-1"),
        vec![
            (temp_id.clone(), MessageStatus::Failed),
            (id.clone(), MessageStatus::Sent),
        ]
    );

    alice.discard_message(&temp_id).unwrap();
    assert_eq!(timeline(&alice, "line-1"), vec![(id, MessageStatus::Sent)]);
}

#[tokio::test]
async fn test_hung_send_stays_pending() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);

    remote.hold_sends();
    let pending = alice.enqueue_message(Draft::text("line-1", "hello")).unwrap();
    let send = tokio::spawn(pending.dispatch());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(timeline(&alice, "line-1")[0].1, MessageStatus::Pending);

    remote.release_sends();
    assert!(matches!(send.await.unwrap(), SendOutcome::Sent(_)));
}

#[tokio::test]
async fn test_sends_keep_submission_order() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);

    let first = alice.enqueue_message(Draft::text("line-1", "one")).unwrap();
    let second = alice.enqueue_message(Draft::text("line-1", "two")).unwrap();
    let (a, b) = tokio::join!(second.dispatch(), first.dispatch());
    assert!(!a.is_failed() && !b.is_failed());

    let contents: Vec<String> = alice.store().read(|s| {
        s.select_by_channel(&ChannelId::new("line-1"))
            .into_iter()
            .map(|m| m.content)
            .collect()
    });
    assert_eq!(contents, vec!["one", "two"]);
}

#[tokio::test]
async fn test_dm_send_updates_last_message() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);

    let dm = alice.get_or_create_dm(&UserId::new("bob")).await.unwrap();
    let outcome = alice
        .send_message(Draft::text(dm.id.clone(), "shift swap?"))
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent(_)));

    let doc = remote
        .document(&Collection::DirectMessageChannels, dm.id.as_str())
        .unwrap();
    let last = &doc.data["lastMessage"];
    assert_eq!(last["content"], "shift swap?");
    assert_eq!(last["senderId"], "alice");
    assert_eq!(last["isRead"], false);
}

#[tokio::test]
async fn test_message_actions_round_trip_through_feed() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Manager);
    let recorder = Recorder::default();
    let _sub = alice.subscribe_channel(&ChannelId::new("line-1"), recorder.clone());

    let SendOutcome::Sent(id) = alice.send_message(Draft::text("line-1", "hello")).await.unwrap()
    else {
        panic!("send failed");
    };
    alice.edit_message(&id, "hello all").await.unwrap();
    alice.pin_message(&id).await.unwrap();
    alice.toggle_reaction(&id, "👍").await.unwrap();

    // Initial snapshot, add, edit, pin, reaction.
    wait_until(|| recorder.update_count() >= 5).await;
    let message = alice.store().read(|s| s.message(&id).cloned()).unwrap();
    assert_eq!(message.content, "hello all");
    assert!(message.is_pinned);
    assert!(message.has_reacted("👍", &UserId::new("alice")));
    assert_eq!(alice.store().read(|s| s.pinned_messages(&ChannelId::new("line-1")).len()), 1);

    alice.delete_message(&id).await.unwrap();
    let message = alice.store().read(|s| s.message(&id).cloned()).unwrap();
    assert!(message.is_deleted);
    assert!(message.content.is_empty());
}

#[tokio::test]
async fn test_cannot_post_into_foreign_dm() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let carol = client(&remote, "carol", Role::Manager);
    let dm = alice.get_or_create_dm(&UserId::new("bob")).await.unwrap();

    let err = carol
        .send_message(Draft::text(dm.id.clone(), "snoop"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::PermissionDenied(_)));
    assert!(timeline(&carol, dm.id.as_str()).is_empty());
    assert!(remote
        .documents(&Collection::Messages(dm.id.clone()))
        .is_empty());
}

#[tokio::test]
async fn test_discard_while_send_in_flight() {
    let remote = remote();
    let alice = client(&remote, "alice", Role::Worker);
    let recorder = Recorder::default();
    let _sub = alice.subscribe_channel(&ChannelId::new("line-1"), recorder.clone());
    wait_until(|| recorder.update_count() >= 1).await;

    remote.hold_sends();
    let pending = alice.enqueue_message(Draft::text("line-1", "never mind")).unwrap();
    let temp_id = pending.temp_id().clone();
    let send = tokio::spawn(pending.dispatch());
    alice.discard_message(&temp_id).unwrap();
    assert!(timeline(&alice, "line-1").is_empty());

    remote.release_sends();
    let outcome = send.await.unwrap();
    let SendOutcome::Discarded(id) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    // The stored message still reaches the timeline through the feed.
    wait_until(|| timeline(&alice, "line-1") == vec![(id.clone(), MessageStatus::Sent)]).await;
}
