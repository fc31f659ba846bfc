//! End-to-end runtime tests over the in-memory transports.
//!
//! These exercise the full loop: commands in, directory calls and push
//! traffic out, events reconciled back into the view.

use std::sync::Arc;
use std::time::Duration;

use parley_app::{Command, Runtime};
use parley_client::{Directory, MemoryDirectory, OutgoingMessage, PairPushChannel};
use parley_core::{Message, Session, SessionHandle, TopicStatus, User};

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Duration::from_secs(2);
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(deadline, poll).await.expect("condition not reached in time");
}

/// Let in-flight events drain through the runtime's queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn session_for(user: &User) -> SessionHandle {
    SessionHandle::new(Session { user: user.clone(), token: "tok".into() })
}

fn seeded_directory() -> (Arc<MemoryDirectory>, User, String) {
    let directory = Arc::new(MemoryDirectory::new());
    let user = directory.add_user("ada");
    let room = directory.add_room("general", &[]);
    (directory, user, room.id)
}

#[tokio::test]
async fn offline_send_persists_and_refetches() {
    let (directory, user, room_id) = seeded_directory();
    let session = session_for(&user);
    let push = PairPushChannel::default();
    let probe = push.probe();

    let (runtime, handle) = Runtime::new(session, Arc::clone(&directory), push);
    let running = tokio::spawn(runtime.run());

    // Startup auto-selects the first room and subscribes to it.
    wait_until(|| probe.subscribed_room().as_deref() == Some(room_id.as_str())).await;

    assert!(handle.send(Command::Send { content: "hello".into(), tags: vec![] }).await);
    wait_until(|| directory.stored_messages().len() == 1).await;
    settle().await;

    handle.send(Command::Shutdown).await;
    let app = running.await.expect("runtime panicked");

    // Channel was down: nothing published, and the follow-up fetch
    // materialized the persisted message exactly once.
    assert!(probe.published().is_empty());
    let contents: Vec<&str> = app.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hello"]);
    assert!(!app.channel_connected());
}

#[tokio::test]
async fn online_send_publishes_and_materializes_only_the_echo() {
    let (directory, user, room_id) = seeded_directory();
    let session = session_for(&user);
    let push = PairPushChannel::connected();
    let probe = push.probe();

    let (runtime, handle) = Runtime::new(session, Arc::clone(&directory), push);
    let running = tokio::spawn(runtime.run());

    wait_until(|| probe.subscribed_room().as_deref() == Some(room_id.as_str())).await;

    assert!(handle.send(Command::Send { content: "hi".into(), tags: vec![] }).await);
    wait_until(|| probe.published().len() == 1).await;

    // Nothing went through the directory, and nothing was inserted locally.
    assert!(directory.stored_messages().is_empty());

    // The server echo is the only thing that lands in the view.
    let published = probe.published().remove(0);
    probe.deliver(Message {
        id: "m-echo".into(),
        from_user_id: published.from_user_id,
        room_id: published.room_id,
        topic_id: published.topic_id,
        content: published.content,
        tags: published.tags,
        sent_at: None,
    });
    settle().await;

    handle.send(Command::Shutdown).await;
    let app = running.await.expect("runtime panicked");

    let contents: Vec<&str> = app.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hi"]);
}

#[tokio::test]
async fn live_topic_message_counts_unread_in_flat_view() {
    let (directory, user, room_id) = seeded_directory();
    let topic = directory.add_topic(&room_id, "rollout", TopicStatus::Open);
    let session = session_for(&user);
    let push = PairPushChannel::connected();
    let probe = push.probe();

    let (runtime, handle) = Runtime::new(session, Arc::clone(&directory), push);
    let running = tokio::spawn(runtime.run());

    wait_until(|| probe.subscribed_room().as_deref() == Some(room_id.as_str())).await;

    probe.deliver(Message {
        id: "m1".into(),
        from_user_id: "u-someone".into(),
        room_id: room_id.clone(),
        topic_id: Some(topic.id.clone()),
        content: "filed update".into(),
        tags: vec![],
        sent_at: None,
    });
    settle().await;

    handle.send(Command::Shutdown).await;
    let app = running.await.expect("runtime panicked");

    assert!(app.messages().is_empty());
    assert_eq!(app.unread_count(&topic.id), 1);
}

#[tokio::test]
async fn unauthorized_response_invalidates_session_and_stops_runtime() {
    let (directory, user, _room_id) = seeded_directory();
    directory.set_auth_expired(true);
    let session = session_for(&user);

    let (runtime, _handle) =
        Runtime::new(session.clone(), Arc::clone(&directory), PairPushChannel::default());
    let running = tokio::spawn(runtime.run());

    // Startup's room listing fails with 401; the session dies and the
    // loop exits on its own.
    let app = tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("runtime did not stop")
        .expect("runtime panicked");

    assert!(session.is_invalidated());
    assert!(app.selected_room().is_none());
}

#[tokio::test]
async fn reconnect_triggers_scope_refetch() {
    let (directory, user, room_id) = seeded_directory();
    let session = session_for(&user);
    let push = PairPushChannel::connected();
    let probe = push.probe();

    let (runtime, handle) = Runtime::new(session, Arc::clone(&directory), push);
    let running = tokio::spawn(runtime.run());

    wait_until(|| probe.subscribed_room().as_deref() == Some(room_id.as_str())).await;

    // A message lands on the server while the channel is down.
    probe.set_connected(false);
    let sender = directory.add_user("bob");
    directory
        .send_message(
            &room_id,
            OutgoingMessage {
                from_user_id: sender.id,
                room_id: room_id.clone(),
                content: "missed while offline".into(),
                tags: vec![],
                topic_id: None,
            },
        )
        .await
        .expect("seed send failed");

    // Coming back up re-fetches the current scope.
    probe.set_connected(true);
    settle().await;

    handle.send(Command::Shutdown).await;
    let app = running.await.expect("runtime panicked");

    let contents: Vec<&str> = app.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["missed while offline"]);
}
