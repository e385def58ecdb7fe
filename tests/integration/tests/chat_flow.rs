//! End-to-end chat scenarios driven through real sessions, in process.

use chrono::Duration;
use parley_core::{MessageId, MessageKind, RoomKey, UserId, TOMBSTONE};
use parley_gateway::{ClientEvent, ErrorCode, Flow, RoomTarget, ServerEvent};
use parley_integration_tests::Harness;
use parley_store::{HistoryPage, MessageStore};

fn dm(receiver: UserId, body: &str) -> ClientEvent {
    ClientEvent::SendDirectMessage {
        receiver_id: receiver,
        body: body.into(),
        kind: MessageKind::Text,
    }
}

fn received_ids(events: &[ServerEvent]) -> Vec<MessageId> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::MessageReceived { message, .. } => Some(message.message.id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_offline_receiver_gets_no_backlog_but_future_events() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    assert_eq!(RoomKey::pair(a.id, b.id).to_string(), "pair:1:2");

    let mut alice = h.connect(&a).await;
    alice.send(dm(b.id, "hi")).await;
    assert_eq!(received_ids(&alice.events()).len(), 1);

    let stored = h
        .store
        .conversation_history(a.id, b.id, HistoryPage::latest(10))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].is_read);

    let mut bob = h.connect(&b).await;
    bob.send(ClientEvent::JoinRoom(RoomTarget::Peer { peer_id: a.id }))
        .await;
    let joined = bob.events();
    assert_eq!(
        joined,
        vec![ServerEvent::RoomJoined {
            room: RoomKey::pair(a.id, b.id)
        }]
    );

    alice.send(dm(b.id, "still there?")).await;
    let ids = received_ids(&bob.events());
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], stored[0].id);
}

#[tokio::test]
async fn test_group_admin_can_delete_but_member_cannot() {
    let h = Harness::new();
    let admin = h.user("admin").await;
    let author = h.user("author").await;
    let bystander = h.user("bystander").await;
    let group = h.group("team", &admin, &[&author, &bystander]).await;

    let mut author_client = h.connect(&author).await;
    author_client
        .send(ClientEvent::SendGroupMessage {
            group_id: group,
            body: "off topic".into(),
            kind: MessageKind::Text,
            reply_to_id: None,
        })
        .await;
    let id = received_ids(&author_client.events())[0];

    let mut bystander_client = h.connect(&bystander).await;
    bystander_client
        .send(ClientEvent::DeleteMessage {
            message_id: id,
            for_everyone: true,
        })
        .await;
    assert_eq!(bystander_client.errors(), vec![ErrorCode::Forbidden]);

    let mut admin_client = h.connect(&admin).await;
    admin_client
        .send(ClientEvent::JoinRoom(RoomTarget::Group { group_id: group }))
        .await;
    admin_client.events();
    admin_client
        .send(ClientEvent::DeleteMessage {
            message_id: id,
            for_everyone: true,
        })
        .await;
    assert_eq!(
        admin_client.events(),
        vec![ServerEvent::MessageDeleted {
            message_id: id,
            room: RoomKey::group(group)
        }]
    );

    let deleted = h.store.get_message(id).await.unwrap().unwrap();
    assert_eq!(deleted.body, TOMBSTONE);

    // Second delete is a silent success.
    admin_client
        .send(ClientEvent::DeleteMessage {
            message_id: id,
            for_everyone: true,
        })
        .await;
    assert!(admin_client.events().is_empty());
    let again = h.store.get_message(id).await.unwrap().unwrap();
    assert_eq!(again.deleted_at, deleted.deleted_at);
}

#[tokio::test]
async fn test_reaction_on_unreadable_message_is_forbidden() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let eve = h.user("eve").await;

    let mut alice = h.connect(&a).await;
    alice.send(dm(b.id, "secret")).await;
    let id = received_ids(&alice.events())[0];

    let mut eve_client = h.connect(&eve).await;
    eve_client
        .send(ClientEvent::React {
            message_id: id,
            kind: "like".into(),
        })
        .await;
    assert_eq!(eve_client.errors(), vec![ErrorCode::Forbidden]);
    assert!(h.store.reactions(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reaction_toggle_and_replace_laws() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;
    let mut bob = h.connect(&b).await;

    alice.send(dm(b.id, "lunch?")).await;
    let id = received_ids(&alice.events())[0];
    bob.events();

    let react = |kind: &str| ClientEvent::React {
        message_id: id,
        kind: kind.into(),
    };

    bob.send(react("like")).await;
    bob.send(react("like")).await;
    assert!(h.store.reactions(id).await.unwrap().is_empty());

    bob.send(react("like")).await;
    bob.send(react("love")).await;
    let rows = h.store.reactions(id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, "love");

    // Bob is not in the pair room, so he got each summary as a direct reply;
    // the last one is the full current state.
    let summaries: Vec<ServerEvent> = bob
        .events()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::ReactionSummary { .. }))
        .collect();
    assert_eq!(summaries.len(), 4);
    match summaries.last().unwrap() {
        ServerEvent::ReactionSummary {
            reactions,
            self_reacted,
            actor_id,
            ..
        } => {
            assert_eq!(reactions.len(), 1);
            assert_eq!(reactions[0].kind, "love");
            assert_eq!(reactions[0].count, 1);
            assert!(*self_reacted);
            assert_eq!(*actor_id, b.id);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_edit_window_boundaries() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;

    alice.send(dm(b.id, "first")).await;
    alice.send(dm(b.id, "second")).await;
    let ids = received_ids(&alice.events());

    h.clock
        .advance(Duration::hours(23) + Duration::minutes(59) + Duration::seconds(59));
    alice
        .send(ClientEvent::EditMessage {
            message_id: ids[0],
            body: "first (edited)".into(),
        })
        .await;
    let events = alice.events();
    assert!(matches!(
        &events[0],
        ServerEvent::MessageEdited { new_body, .. } if new_body == "first (edited)"
    ));

    h.clock.advance(Duration::seconds(2));
    alice
        .send(ClientEvent::EditMessage {
            message_id: ids[1],
            body: "too late".into(),
        })
        .await;
    assert_eq!(alice.errors(), vec![ErrorCode::Expired]);

    let edited = h.store.get_message(ids[0]).await.unwrap().unwrap();
    assert!(edited.is_edited());
    let untouched = h.store.get_message(ids[1]).await.unwrap().unwrap();
    assert_eq!(untouched.body, "second");
}

#[tokio::test(start_paused = true)]
async fn test_typing_is_edge_triggered() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;
    let mut bob = h.connect(&b).await;
    bob.send(ClientEvent::JoinRoom(RoomTarget::Peer { peer_id: a.id }))
        .await;
    bob.events();
    alice.events();

    for _ in 0..5 {
        alice
            .send(ClientEvent::Typing {
                peer_id: b.id,
                is_typing: true,
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }
    assert_eq!(
        bob.events(),
        vec![ServerEvent::TypingChanged {
            user_id: a.id,
            is_typing: true
        }]
    );
    assert!(alice.events().is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(3100)).await;
    assert_eq!(
        bob.events(),
        vec![ServerEvent::TypingChanged {
            user_id: a.id,
            is_typing: false
        }]
    );

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert!(bob.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_clears_typing() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;
    let mut bob = h.connect(&b).await;
    bob.send(ClientEvent::JoinRoom(RoomTarget::Peer { peer_id: a.id }))
        .await;
    bob.events();

    alice
        .send(ClientEvent::Typing {
            peer_id: b.id,
            is_typing: true,
        })
        .await;
    alice.disconnect();

    let events = bob.events();
    assert!(events.contains(&ServerEvent::TypingChanged {
        user_id: a.id,
        is_typing: false
    }));
    assert!(events.contains(&ServerEvent::PresenceChanged {
        user: a.clone(),
        online: false
    }));

    // The expiry timer was cancelled along with the signal.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    assert!(bob.events().is_empty());
}

#[tokio::test]
async fn test_presence_tracks_identity_not_connections() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut bob = h.connect(&b).await;

    let mut phone = h.connect(&a).await;
    let mut laptop = h.connect(&a).await;
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PresenceChanged {
            user: a.clone(),
            online: true
        }]
    );

    phone.disconnect();
    assert!(bob.events().is_empty());
    assert!(h.chat.presence().is_online(a.id));

    laptop.disconnect();
    laptop.disconnect();
    assert_eq!(
        bob.events(),
        vec![ServerEvent::PresenceChanged {
            user: a.clone(),
            online: false
        }]
    );
    assert!(!h.chat.presence().is_online(a.id));
}

#[tokio::test]
async fn test_new_client_receives_roster() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let _alice = h.connect(&a).await;

    let mut bob = h.client();
    bob.send(ClientEvent::Authenticate {
        credential: h.token(&b),
    })
    .await;
    let events = bob.events();
    assert_eq!(
        events[0],
        ServerEvent::Authenticated {
            identity: b.clone()
        }
    );
    assert_eq!(
        events[1],
        ServerEvent::PresenceRoster {
            users: vec![a.clone(), b.clone()]
        }
    );
}

#[tokio::test]
async fn test_store_outage_is_reported_and_session_survives() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;

    h.store.set_unavailable(true);
    let flow = alice.send(dm(b.id, "hello?")).await;
    assert_eq!(flow, Flow::Continue);
    let events = alice.events();
    assert!(matches!(
        &events[0],
        ServerEvent::OperationError {
            code: ErrorCode::StoreUnavailable,
            retryable: true,
            ..
        }
    ));

    h.store.set_unavailable(false);
    alice.send(dm(b.id, "hello again")).await;
    assert_eq!(received_ids(&alice.events()).len(), 1);
    assert_eq!(h.store.message_count().await, 1);
}

#[tokio::test]
async fn test_errors_go_only_to_the_originator() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let group = h.group("team", &a, &[&b]).await;
    let mut alice = h.connect(&a).await;
    let mut bob = h.connect(&b).await;
    alice
        .send(ClientEvent::JoinRoom(RoomTarget::Group { group_id: group }))
        .await;
    bob.send(ClientEvent::JoinRoom(RoomTarget::Group { group_id: group }))
        .await;
    alice.events();
    bob.events();

    bob.send(ClientEvent::SendGroupMessage {
        group_id: group,
        body: "   ".into(),
        kind: MessageKind::Text,
        reply_to_id: None,
    })
    .await;
    assert_eq!(bob.errors(), vec![ErrorCode::InvalidInput]);
    assert!(alice.events().is_empty());
}

#[tokio::test]
async fn test_mark_read_sends_receipt_to_sender() {
    let h = Harness::new();
    let a = h.user("alice").await;
    let b = h.user("bob").await;
    let mut alice = h.connect(&a).await;
    let mut bob = h.connect(&b).await;

    alice.send(dm(b.id, "one")).await;
    alice.send(dm(b.id, "two")).await;
    alice.events();
    bob.events();

    bob.send(ClientEvent::MarkRead { peer_id: a.id }).await;
    assert_eq!(
        alice.events(),
        vec![ServerEvent::ReadReceipt {
            reader_id: b.id,
            count: 2
        }]
    );

    bob.send(ClientEvent::MarkRead { peer_id: a.id }).await;
    assert!(alice.events().is_empty());
    assert!(bob.errors().is_empty());
}
