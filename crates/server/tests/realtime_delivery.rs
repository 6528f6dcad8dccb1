use convo_server::core::models::{Message, NewMessage};
use convo_server::core::store::{MemoryStore, MessageStore};
use convo_server::realtime::{ClientEvent, Hub, HubConfig, OutboundFrame};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

fn hub_with(store: &Arc<MemoryStore>, config: HubConfig) -> Hub {
    Hub::new(store.clone(), config)
}

fn setup() -> (Arc<MemoryStore>, Hub) {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation("c1", &["alice", "bob", "carol"]);
    let hub = hub_with(&store, HubConfig::default());
    (store, hub)
}

fn drain(rx: &mut Receiver<OutboundFrame>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame.to_value());
    }
    frames
}

fn events(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .filter_map(|f| f.get("event").and_then(Value::as_str))
        .collect()
}

fn join(conversation_id: &str) -> ClientEvent {
    ClientEvent::parse(&format!(
        r#"{{"event":"conversation:join","data":{{"conversationId":"{}"}}}}"#,
        conversation_id
    ))
    .unwrap()
}

fn typing_start(conversation_id: &str) -> ClientEvent {
    ClientEvent::parse(&format!(
        r#"{{"event":"typing:start","data":{{"conversationId":"{}"}}}}"#,
        conversation_id
    ))
    .unwrap()
}

async fn send(store: &MemoryStore, hub: &Hub, sender: &str, text: &str) -> Message {
    let message = store
        .create_message(
            "c1",
            sender,
            NewMessage {
                text: Some(text.to_string()),
                image_url: None,
            },
        )
        .await
        .unwrap();
    hub.notify_message_delivered(&message);
    message
}

#[tokio::test]
async fn test_multi_device_presence_fires_once_per_transition() {
    let (store, hub) = setup();
    let (_observer, mut carol_rx) = hub.open_session("carol");

    let (phone, _phone_rx) = hub.open_session("alice");
    let (laptop, _laptop_rx) = hub.open_session("alice");

    let frames = drain(&mut carol_rx);
    assert_eq!(events(&frames), vec!["user:online"]);
    assert_eq!(frames[0]["data"]["userId"], "alice");
    assert_eq!(hub.presence_of("alice").connections, 2);

    assert!(phone.close());
    assert!(drain(&mut carol_rx).is_empty());
    assert!(hub.is_online("alice"));

    assert!(laptop.close());
    let frames = drain(&mut carol_rx);
    assert_eq!(events(&frames), vec!["user:offline"]);
    assert!(frames[0]["data"]["lastActive"].is_string());
    assert!(!hub.is_online("alice"));

    hub.flush_side_effects().await;
    let (online, last_active) = store.presence_of("alice").unwrap();
    assert!(!online);
    assert!(last_active.is_some());
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (store, hub) = setup();
    let (bob, mut bob_rx) = hub.open_session("bob");
    hub.dispatch(&bob, join("c1")).await;

    let m1 = send(&store, &hub, "alice", "first").await;
    let m2 = send(&store, &hub, "alice", "second").await;

    let frames = drain(&mut bob_rx);
    assert_eq!(events(&frames), vec!["message:new", "message:new"]);
    assert_eq!(frames[0]["data"]["id"], m1.id.as_str());
    assert_eq!(frames[1]["data"]["id"], m2.id.as_str());
}

#[tokio::test]
async fn test_unread_counts_exclude_sender() {
    let (store, hub) = setup();

    send(&store, &hub, "alice", "hello").await;
    hub.flush_side_effects().await;

    assert_eq!(store.unread_count("alice", "c1"), 0);
    assert_eq!(store.unread_count("bob", "c1"), 1);
    assert_eq!(store.unread_count("carol", "c1"), 1);

    hub.conversation_viewed("bob", "c1");
    hub.flush_side_effects().await;
    assert_eq!(store.unread_count("bob", "c1"), 0);
    assert_eq!(store.unread_count("carol", "c1"), 1);
}

#[tokio::test]
async fn test_sending_a_message_does_not_touch_presence() {
    let (store, hub) = setup();
    let (bob, mut bob_rx) = hub.open_session("bob");
    hub.dispatch(&bob, join("c1")).await;
    let (_alice, _alice_rx) = hub.open_session("alice");
    drain(&mut bob_rx);

    send(&store, &hub, "alice", "hi").await;

    assert_eq!(events(&drain(&mut bob_rx)), vec!["message:new"]);
}

#[tokio::test]
async fn test_disconnect_leaves_every_room() {
    let (store, hub) = setup();
    store.add_conversation("c2", &["bob", "alice"]);
    let (bob, _bob_rx) = hub.open_session("bob");
    hub.dispatch(&bob, join("c1")).await;
    hub.dispatch(&bob, join("c2")).await;

    let connection_id = bob.connection_id();
    assert_eq!(hub.rooms_of(connection_id).len(), 2);

    drop(bob);

    assert!(hub.rooms_of(connection_id).is_empty());
    assert!(hub.members_of("c1").is_empty());
    assert!(hub.members_of("c2").is_empty());
    assert_eq!(hub.connection_count(), 0);
}

#[tokio::test]
async fn test_typing_skips_every_sender_device() {
    let (_store, hub) = setup();
    let (phone, mut phone_rx) = hub.open_session("alice");
    let (laptop, mut laptop_rx) = hub.open_session("alice");
    let (bob, mut bob_rx) = hub.open_session("bob");
    for session in [&phone, &laptop, &bob] {
        hub.dispatch(session, join("c1")).await;
    }
    drain(&mut phone_rx);
    drain(&mut laptop_rx);
    drain(&mut bob_rx);

    hub.dispatch(&phone, typing_start("c1")).await;

    let frames = drain(&mut bob_rx);
    assert_eq!(events(&frames), vec!["typing"]);
    assert_eq!(frames[0]["data"]["userId"], "alice");
    assert_eq!(frames[0]["data"]["isTyping"], true);
    assert!(drain(&mut phone_rx).is_empty());
    assert!(drain(&mut laptop_rx).is_empty());
}

#[tokio::test]
async fn test_last_disconnect_stops_typing() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation("c1", &["alice", "bob"]);
    let hub = hub_with(
        &store,
        HubConfig {
            typing_timeout: Some(Duration::from_secs(5)),
            ..HubConfig::default()
        },
    );
    let (alice, _alice_rx) = hub.open_session("alice");
    let (bob, mut bob_rx) = hub.open_session("bob");
    hub.dispatch(&alice, join("c1")).await;
    hub.dispatch(&bob, join("c1")).await;
    hub.dispatch(&alice, typing_start("c1")).await;
    drain(&mut bob_rx);

    alice.close();

    let frames = drain(&mut bob_rx);
    let typing = frames
        .iter()
        .find(|f| f["event"] == "typing")
        .expect("synthetic typing stop");
    assert_eq!(typing["data"]["isTyping"], false);
    assert!(events(&frames).contains(&"user:offline"));
}

#[tokio::test]
async fn test_unread_failure_does_not_block_delivery() {
    let (store, hub) = setup();
    let (bob, mut bob_rx) = hub.open_session("bob");
    hub.dispatch(&bob, join("c1")).await;

    store.fail_unread_increments(true);
    send(&store, &hub, "alice", "lost count").await;
    hub.flush_side_effects().await;

    assert_eq!(events(&drain(&mut bob_rx)), vec!["message:new"]);
    assert_eq!(store.unread_count("bob", "c1"), 0);

    store.fail_unread_increments(false);
    send(&store, &hub, "alice", "counted").await;
    hub.flush_side_effects().await;
    assert_eq!(store.unread_count("bob", "c1"), 1);
}

#[tokio::test]
async fn test_non_participant_join_is_ignored() {
    let (store, hub) = setup();
    let (mallory, mut mallory_rx) = hub.open_session("mallory");

    hub.dispatch(&mallory, join("c1")).await;
    assert!(hub.members_of("c1").is_empty());

    send(&store, &hub, "alice", "private").await;
    assert!(drain(&mut mallory_rx).is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_store, hub) = setup();
    let (_observer, mut carol_rx) = hub.open_session("carol");
    let (alice, _alice_rx) = hub.open_session("alice");
    drain(&mut carol_rx);

    assert!(alice.close());
    assert!(!alice.close());
    drop(alice);

    assert_eq!(events(&drain(&mut carol_rx)), vec!["user:offline"]);
}

#[tokio::test]
async fn test_stalled_recipient_does_not_block_others() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation("c1", &["alice", "bob", "carol"]);
    let hub = hub_with(
        &store,
        HubConfig {
            outbound_queue_capacity: 1,
            ..HubConfig::default()
        },
    );

    let (bob, mut bob_rx) = hub.open_session("bob");
    let (carol, mut carol_rx) = hub.open_session("carol");
    hub.dispatch(&bob, join("c1")).await;
    hub.dispatch(&carol, join("c1")).await;
    drain(&mut bob_rx);
    drain(&mut carol_rx);

    let mut received = 0;
    for i in 0..3 {
        send(&store, &hub, "alice", &format!("m{}", i)).await;
        received += drain(&mut carol_rx).len();
    }

    assert_eq!(received, 3);
    assert_eq!(drain(&mut bob_rx).len(), 1);
}

#[tokio::test]
async fn test_presence_write_failure_still_broadcasts() {
    let (store, hub) = setup();
    let (_observer, mut carol_rx) = hub.open_session("carol");
    hub.flush_side_effects().await;

    store.fail_presence_writes(true);
    let (alice, _alice_rx) = hub.open_session("alice");
    alice.close();
    hub.flush_side_effects().await;

    assert_eq!(
        events(&drain(&mut carol_rx)),
        vec!["user:online", "user:offline"]
    );
    assert_eq!(store.presence_of("alice"), Some((false, None)));

    // The worker keeps going after the failures
    store.fail_presence_writes(false);
    send(&store, &hub, "alice", "still counted").await;
    let (_alice, _alice_rx) = hub.open_session("alice");
    hub.flush_side_effects().await;

    assert_eq!(store.unread_count("carol", "c1"), 1);
    assert_eq!(store.presence_of("alice").map(|p| p.0), Some(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_racing_close_leaves_user_online() {
    let (store, hub) = setup();
    let (_observer, mut carol_rx) = hub.open_session("carol");

    for _ in 0..2_000 {
        let (first, _first_rx) = hub.open_session("alice");

        let closer = tokio::spawn(async move { drop(first) });
        let opener = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.open_session("alice") })
        };
        closer.await.unwrap();
        let (second, _second_rx) = opener.await.unwrap();

        let frames = drain(&mut carol_rx);
        let last = events(&frames)
            .into_iter()
            .filter(|e| e.starts_with("user:"))
            .last();
        assert_eq!(last, Some("user:online"));

        hub.flush_side_effects().await;
        assert_eq!(store.presence_of("alice").map(|p| p.0), Some(true));
        assert!(hub.is_online("alice"));

        drop(second);
        drain(&mut carol_rx);
    }
}

#[tokio::test]
async fn test_raw_emit_to_user_and_room() {
    let (_store, hub) = setup();
    let (phone, mut phone_rx) = hub.open_session("alice");
    let (_laptop, mut laptop_rx) = hub.open_session("alice");
    let (bob, mut bob_rx) = hub.open_session("bob");
    hub.dispatch(&bob, join("c1")).await;
    hub.dispatch(&phone, join("c1")).await;
    drain(&mut phone_rx);
    drain(&mut laptop_rx);
    drain(&mut bob_rx);

    let sent = hub.emit_raw_to_user("alice", "profile:updated", json!({ "name": "Alice" }));
    assert_eq!(sent, 2);
    for rx in [&mut phone_rx, &mut laptop_rx] {
        let frames = drain(rx);
        assert_eq!(events(&frames), vec!["profile:updated"]);
        assert_eq!(frames[0]["data"]["name"], "Alice");
    }
    assert!(drain(&mut bob_rx).is_empty());

    let sent = hub.emit_raw_to_room("c1", "conversation:renamed", json!({ "name": "friends" }));
    assert_eq!(sent, 2);
    assert_eq!(events(&drain(&mut bob_rx)), vec!["conversation:renamed"]);
    assert_eq!(events(&drain(&mut phone_rx)), vec!["conversation:renamed"]);
    assert!(drain(&mut laptop_rx).is_empty());

    assert_eq!(hub.emit_raw_to_user("nobody", "ping", Value::Null), 0);
}
