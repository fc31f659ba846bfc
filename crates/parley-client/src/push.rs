//! Push channel: live, server-to-client room event delivery.
//!
//! One connection per session, one active room subscription at a time.
//! The connection auto-reconnects with a fixed backoff. Connectivity
//! transitions are delivered on the subscription itself as
//! [`PushEvent::Connected`]/[`PushEvent::Disconnected`]; events missed
//! while disconnected are not individually recoverable, so the consumer
//! re-fetches its current scope through the pull path after each
//! `Connected`.
//!
//! [`WsPushChannel`] is the production WebSocket implementation: a spawned
//! I/O task owns the socket and is bridged to callers with channels.
//! [`PairPushChannel`] is an in-process double for deterministic tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parley_core::{Message, RoomId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::directory::OutgoingMessage;

/// Fixed delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Buffered events per subscription.
const EVENT_BUFFER: usize = 256;

/// Event delivered on a room subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A message was posted to the subscribed room. Topic scope is carried
    /// inside the message itself.
    Message(Message),

    /// The connection is up: delivered once when a subscription meets a
    /// live connection (at subscribe time or when the connection is
    /// established) and again after every reconnect. Events in between
    /// may be lost; the consumer must re-fetch its current scope.
    Connected,

    /// The connection dropped. Delivery pauses until a `Connected`
    /// follows.
    Disconnected,
}

/// Failure on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The channel is currently disconnected; the caller should fall back
    /// to the pull path.
    #[error("push channel not connected")]
    NotConnected,

    /// The channel is permanently gone.
    #[error("push channel closed: {0}")]
    Closed(String),
}

/// Handle to the active room subscription.
///
/// Dropping the subscription (or subscribing to another room) releases it;
/// the previous receiver stops yielding events before the new room's
/// subscription is established.
#[derive(Debug)]
pub struct Subscription {
    room_id: RoomId,
    events: mpsc::Receiver<PushEvent>,
}

impl Subscription {
    pub(crate) fn new(room_id: RoomId, events: mpsc::Receiver<PushEvent>) -> Self {
        Self { room_id, events }
    }

    /// The subscribed room.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Next event, or `None` once the subscription is released.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }
}

/// Live event subscription transport.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to a room's events, releasing any previous subscription
    /// first. The subscription receives [`PushEvent::Connected`] once the
    /// connection is up, including immediately when subscribing while
    /// already connected.
    async fn subscribe(&self, room_id: RoomId) -> Subscription;

    /// Publish a message through the live connection. Fails fast with
    /// [`PushError::NotConnected`] while the connection is down; the
    /// caller's own view is updated only by the echoed event, never
    /// locally.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), PushError>;

    /// `true` while the underlying connection is up.
    fn is_connected(&self) -> bool;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Frames the client sends upstream.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame<'a> {
    #[serde(rename_all = "camelCase")]
    Subscribe { room_id: &'a str },
    Publish { message: &'a OutgoingMessage },
}

enum Control {
    Subscribe { room_id: RoomId, events: mpsc::Sender<PushEvent> },
    Publish { message: OutgoingMessage, done: oneshot::Sender<Result<(), PushError>> },
}

/// Push channel over a WebSocket connection.
///
/// A spawned task owns the socket: it reconnects with a fixed backoff,
/// replays the room subscription after every reconnect, and forwards
/// incoming frames to the current [`Subscription`].
pub struct WsPushChannel {
    control: mpsc::Sender<Control>,
    connected: watch::Receiver<bool>,
}

impl WsPushChannel {
    /// Connect to the push endpoint at `url`.
    ///
    /// Returns immediately; the connection is established (and maintained)
    /// in the background. Poll [`PushChannel::is_connected`] or subscribe to
    /// observe liveness.
    pub fn connect(url: impl Into<String>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(EVENT_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);
        tokio::spawn(run_connection(url.into(), control_rx, connected_tx));
        Self { control: control_tx, connected: connected_rx }
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn subscribe(&self, room_id: RoomId) -> Subscription {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        // Replacing the forwarding sender inside the task releases the
        // previous subscription: its receiver stops yielding events.
        let _ = self.control.send(Control::Subscribe { room_id: room_id.clone(), events: events_tx }).await;
        Subscription::new(room_id, events_rx)
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), PushError> {
        // Fail fast while down so the caller can take the directory path
        // instead of queueing behind a reconnect of unknown duration.
        if !*self.connected.borrow() {
            return Err(PushError::NotConnected);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.control
            .send(Control::Publish { message, done: done_tx })
            .await
            .map_err(|_| PushError::Closed("connection task stopped".into()))?;
        done_rx.await.map_err(|_| PushError::Closed("connection task stopped".into()))?
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

/// Connection supervisor: connect, serve, reconnect.
async fn run_connection(
    url: String,
    mut control: mpsc::Receiver<Control>,
    connected: watch::Sender<bool>,
) {
    let mut current: Option<(RoomId, mpsc::Sender<PushEvent>)> = None;

    loop {
        if control.is_closed() {
            return;
        }

        let (ws, _) = match connect_async(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(error = %e, "push connect failed, retrying");
                if !serve_while_disconnected(&mut control, &mut current).await {
                    return;
                }
                continue;
            },
        };
        let (mut sink, mut stream) = ws.split();
        let _ = connected.send(true);

        // Replay the room subscription and tell the consumer the channel
        // is live so it can reconcile anything missed.
        if let Some((room_id, events)) = &current {
            if send_frame(&mut sink, &ClientFrame::Subscribe { room_id: room_id.as_str() })
                .await
                .is_err()
            {
                let _ = connected.send(false);
                continue;
            }
            let _ = events.try_send(PushEvent::Connected);
        }

        loop {
            tokio::select! {
                ctrl = control.recv() => match ctrl {
                    None => return,
                    Some(Control::Subscribe { room_id, events }) => {
                        // A fresh subscriber learns the current liveness.
                        let _ = events.try_send(PushEvent::Connected);
                        current = Some((room_id, events));
                        if let Some((room_id, _)) = &current
                            && send_frame(
                                &mut sink,
                                &ClientFrame::Subscribe { room_id: room_id.as_str() },
                            )
                            .await
                            .is_err()
                        {
                            break;
                        }
                    },
                    Some(Control::Publish { message, done }) => {
                        let sent = send_frame(&mut sink, &ClientFrame::Publish { message: &message }).await;
                        let failed = sent.is_err();
                        let _ = done.send(sent);
                        if failed {
                            break;
                        }
                    },
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => forward_event(text.as_str(), current.as_ref()),
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "push stream error");
                        break;
                    },
                    None => break,
                },
            }
        }

        let _ = connected.send(false);
        if let Some((_, events)) = &current {
            let _ = events.try_send(PushEvent::Disconnected);
        }
        if !serve_while_disconnected(&mut control, &mut current).await {
            return;
        }
    }
}

/// Keep answering control traffic for one backoff period while down:
/// publishes fail fast so senders fall back to the directory path, and
/// subscription swaps are recorded for replay on reconnect. Returns
/// `false` once the channel's owner is gone.
async fn serve_while_disconnected(
    control: &mut mpsc::Receiver<Control>,
    current: &mut Option<(RoomId, mpsc::Sender<PushEvent>)>,
) -> bool {
    let backoff = tokio::time::sleep(RECONNECT_DELAY);
    tokio::pin!(backoff);
    loop {
        tokio::select! {
            () = &mut backoff => return true,
            ctrl = control.recv() => match ctrl {
                None => return false,
                Some(Control::Subscribe { room_id, events }) => {
                    *current = Some((room_id, events));
                },
                Some(Control::Publish { done, .. }) => {
                    let _ = done.send(Err(PushError::NotConnected));
                },
            },
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &ClientFrame<'_>) -> Result<(), PushError>
where
    S: SinkExt<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(frame)
        .map_err(|e| PushError::Closed(format!("encode failed: {e}")))?;
    sink.send(WsMessage::Text(json.into())).await.map_err(|_| PushError::NotConnected)
}

/// Parse an incoming frame and forward it to the active subscription.
fn forward_event(text: &str, current: Option<&(RoomId, mpsc::Sender<PushEvent>)>) {
    let Some((room_id, events)) = current else {
        return;
    };
    match serde_json::from_str::<Message>(text) {
        Ok(message) if &message.room_id == room_id => {
            // try_send: a consumer this far behind is better served by the
            // reconnect/re-fetch path than by unbounded buffering.
            let _ = events.try_send(PushEvent::Message(message));
        },
        Ok(message) => {
            tracing::debug!(room_id = %message.room_id, "dropping event for unsubscribed room");
        },
        Err(e) => {
            tracing::warn!(error = %e, "malformed push frame");
        },
    }
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PairState {
    connected: bool,
    room: Option<RoomId>,
    events: Option<mpsc::Sender<PushEvent>>,
    published: Vec<OutgoingMessage>,
}

/// Deterministic in-process push channel for tests and simulation.
///
/// The "server side" is a [`PushProbe`], which injects events, toggles
/// connectivity, and records published messages.
#[derive(Debug, Clone, Default)]
pub struct PairPushChannel {
    state: Arc<Mutex<PairState>>,
}

impl PairPushChannel {
    /// A channel that starts connected.
    pub fn connected() -> Self {
        let channel = Self::default();
        channel.state_mut().connected = true;
        channel
    }

    /// The server-side probe for this channel.
    pub fn probe(&self) -> PushProbe {
        PushProbe { state: Arc::clone(&self.state) }
    }

    fn state_mut(&self) -> std::sync::MutexGuard<'_, PairState> {
        // Lock poisoning cannot happen: no panics while the guard is held.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PushChannel for PairPushChannel {
    async fn subscribe(&self, room_id: RoomId) -> Subscription {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let mut state = self.state_mut();
        if state.connected {
            let _ = events_tx.try_send(PushEvent::Connected);
        }
        state.room = Some(room_id.clone());
        state.events = Some(events_tx);
        drop(state);
        Subscription::new(room_id, events_rx)
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), PushError> {
        let mut state = self.state_mut();
        if !state.connected {
            return Err(PushError::NotConnected);
        }
        state.published.push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state_mut().connected
    }
}

/// Server-side control of a [`PairPushChannel`].
#[derive(Debug, Clone)]
pub struct PushProbe {
    state: Arc<Mutex<PairState>>,
}

impl PushProbe {
    fn state_mut(&self) -> std::sync::MutexGuard<'_, PairState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Deliver a message event to the active subscription, if the room
    /// matches. Events for other rooms are dropped, mirroring the per-room
    /// subscription contract.
    pub fn deliver(&self, message: Message) {
        let state = self.state_mut();
        if state.room.as_ref() == Some(&message.room_id)
            && let Some(events) = &state.events
        {
            let _ = events.try_send(PushEvent::Message(message));
        }
    }

    /// Toggle connectivity. Each transition is announced to the active
    /// subscription as [`PushEvent::Connected`] or
    /// [`PushEvent::Disconnected`].
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state_mut();
        let was_connected = state.connected;
        state.connected = connected;
        let notify = if connected == was_connected {
            None
        } else {
            state.events.clone().map(|events| {
                let event =
                    if connected { PushEvent::Connected } else { PushEvent::Disconnected };
                (events, event)
            })
        };
        drop(state);
        if let Some((events, event)) = notify {
            let _ = events.try_send(event);
        }
    }

    /// Messages published through the channel so far, in order.
    pub fn published(&self) -> Vec<OutgoingMessage> {
        self.state_mut().published.clone()
    }

    /// The room of the active subscription, if any.
    pub fn subscribed_room(&self) -> Option<RoomId> {
        self.state_mut().room.clone()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn message(room: &str, topic: Option<&str>) -> Message {
        Message {
            id: "m1".into(),
            from_user_id: "u1".into(),
            room_id: room.into(),
            topic_id: topic.map(Into::into),
            content: "hello".into(),
            tags: vec![],
            sent_at: None,
        }
    }

    fn outgoing(room: &str) -> OutgoingMessage {
        OutgoingMessage {
            from_user_id: "u1".into(),
            room_id: room.into(),
            content: "hi".into(),
            tags: vec![],
            topic_id: None,
        }
    }

    async fn next_event(sub: &mut Subscription) -> Option<PushEvent> {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("no event within timeout")
    }

    #[tokio::test]
    async fn delivers_only_to_subscribed_room() {
        let channel = PairPushChannel::connected();
        let probe = channel.probe();
        let mut sub = channel.subscribe("r1".into()).await;
        assert_eq!(sub.recv().await, Some(PushEvent::Connected));

        probe.deliver(message("r2", None));
        probe.deliver(message("r1", None));

        let event = sub.recv().await.unwrap();
        assert!(matches!(event, PushEvent::Message(m) if m.room_id == "r1"));
    }

    #[tokio::test]
    async fn resubscription_releases_previous_room() {
        let channel = PairPushChannel::connected();
        let probe = channel.probe();
        let mut old = channel.subscribe("r1".into()).await;
        let mut new = channel.subscribe("r2".into()).await;

        // Old receiver is released before the new room gets events.
        assert_eq!(old.recv().await, Some(PushEvent::Connected));
        assert_eq!(old.recv().await, None);

        assert_eq!(new.recv().await, Some(PushEvent::Connected));
        probe.deliver(message("r2", None));
        assert!(matches!(new.recv().await, Some(PushEvent::Message(_))));
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let channel = PairPushChannel::default();
        assert_eq!(channel.publish(outgoing("r1")).await, Err(PushError::NotConnected));

        let probe = channel.probe();
        probe.set_connected(true);
        channel.publish(outgoing("r1")).await.unwrap();
        assert_eq!(probe.published().len(), 1);
    }

    #[tokio::test]
    async fn connectivity_transitions_reach_the_subscription() {
        let channel = PairPushChannel::connected();
        let probe = channel.probe();
        let mut sub = channel.subscribe("r1".into()).await;
        assert_eq!(sub.recv().await, Some(PushEvent::Connected));

        probe.set_connected(false);
        assert_eq!(sub.recv().await, Some(PushEvent::Disconnected));

        probe.set_connected(true);
        assert_eq!(sub.recv().await, Some(PushEvent::Connected));
    }

    /// Accept one WebSocket connection and hold it open, draining client
    /// frames.
    async fn ws_server_hold_open(listener: TcpListener) {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(_)) = ws.next().await {}
    }

    #[tokio::test]
    async fn ws_subscription_learns_of_initial_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(ws_server_hold_open(listener));

        let channel = WsPushChannel::connect(format!("ws://{addr}"));
        let mut sub = channel.subscribe("r1".into()).await;

        // The consumer is told the channel is live, whether the socket
        // came up before or after the subscribe.
        assert_eq!(next_event(&mut sub).await, Some(PushEvent::Connected));
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn ws_publish_fails_fast_while_disconnected() {
        // Nothing listens here; the channel never comes up.
        let channel = WsPushChannel::connect("ws://127.0.0.1:1");

        let result = tokio::time::timeout(Duration::from_secs(1), channel.publish(outgoing("r1")))
            .await
            .expect("publish must not block while disconnected");
        assert_eq!(result, Err(PushError::NotConnected));
    }

    #[tokio::test]
    async fn ws_connection_drop_is_surfaced_to_the_subscription() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept, complete the handshake, read one frame, then drop.
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let _ = ws.next().await;
        });

        let channel = WsPushChannel::connect(format!("ws://{addr}"));
        let mut sub = channel.subscribe("r1".into()).await;

        assert_eq!(next_event(&mut sub).await, Some(PushEvent::Connected));
        assert_eq!(next_event(&mut sub).await, Some(PushEvent::Disconnected));
    }
}
