//! Async runtime for the view state machine.
//!
//! The runtime owns the [`App`] and serializes everything that mutates it
//! onto one logical queue: presentation-layer [`Command`]s, resolved
//! directory calls, and delivered push events. Directory calls run on
//! spawned tasks and post their results back as [`AppEvent`]s, so a slow
//! fetch never blocks command handling; the context tag carried by each
//! fetch makes late results safe to apply or discard.
//!
//! The runtime exits when the session is invalidated, when a
//! [`Command::Shutdown`] arrives, or when the command channel closes.

use std::sync::Arc;

use parley_client::{Directory, DirectoryError, HistoryFilter, PushChannel, PushEvent, Subscription};
use parley_core::{RoomId, SessionHandle, SyncError, TopicId, TopicStatus, UserId};
use tokio::sync::{mpsc, watch};

use crate::{App, AppAction, AppEvent, FetchContext, SearchMode, ViewMode};

/// Internal event channel depth.
const EVENT_BUFFER: usize = 256;

/// Presentation-layer commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select a room by id (from the cached room list).
    SelectRoom(RoomId),
    /// Select a topic by id (from the cached topic list).
    SelectTopic(TopicId),
    /// Switch display mode; re-invoking the current mode refreshes it.
    ToggleMode(ViewMode),
    /// Create a topic in the selected room.
    CreateTopic {
        /// Topic title.
        title: String,
    },
    /// Toggle the selected topic between open and closed.
    ToggleTopicStatus,
    /// Send a message into the active scope.
    Send {
        /// Message body.
        content: String,
        /// Tags attached by the author.
        tags: Vec<String>,
    },
    /// Update the search query.
    SetSearchQuery(String),
    /// Switch between content and tag search.
    SetSearchMode(SearchMode),
    /// Clear the search query.
    ClearSearch,
    /// Open (or create) the direct room with another user.
    OpenDirect {
        /// The other participant.
        other_id: UserId,
    },
    /// Create a group room.
    CreateRoom {
        /// Display name.
        name: String,
        /// Initial members, excluding the creator.
        member_ids: Vec<UserId>,
    },
    /// Export the selected topic as an issue draft.
    ExportDraft,
    /// Stop the runtime.
    Shutdown,
}

/// Presentation-layer handle to a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    render: watch::Receiver<u64>,
}

impl RuntimeHandle {
    /// Queue a command. Returns `false` once the runtime has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Observer for state-change notifications: the value increments on
    /// every render request.
    pub fn render_ticks(&self) -> watch::Receiver<u64> {
        self.render.clone()
    }
}

/// One input drained from the runtime's logical queue.
enum Input {
    Command(Command),
    Event(AppEvent),
    Push(Option<PushEvent>),
    Invalidated,
}

/// Orchestrates the [`App`] over a [`Directory`] and a [`PushChannel`].
pub struct Runtime<D, P> {
    app: App,
    session: SessionHandle,
    directory: Arc<D>,
    push: Arc<P>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<AppEvent>,
    events_rx: mpsc::Receiver<AppEvent>,
    subscription: Option<Subscription>,
    render: watch::Sender<u64>,
}

impl<D, P> Runtime<D, P>
where
    D: Directory + 'static,
    P: PushChannel,
{
    /// Create a runtime and its presentation-layer handle.
    pub fn new(session: SessionHandle, directory: Arc<D>, push: P) -> (Self, RuntimeHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (render_tx, render_rx) = watch::channel(0);

        let runtime = Self {
            app: App::new(session.user().clone()),
            session,
            directory,
            push: Arc::new(push),
            commands: commands_rx,
            events_tx,
            events_rx,
            subscription: None,
            render: render_tx,
        };
        let handle = RuntimeHandle { commands: commands_tx, render: render_rx };
        (runtime, handle)
    }

    /// Run the event loop until shutdown or session invalidation.
    ///
    /// Returns the final application state, which makes the runtime
    /// directly assertable in integration tests.
    pub async fn run(mut self) -> App {
        let mut invalidated = self.session.subscribe_invalidated();

        let actions = self.app.start();
        self.dispatch(actions).await;
        if self.push.is_connected() {
            let actions = self.app.handle(AppEvent::ChannelConnected);
            self.dispatch(actions).await;
        }

        loop {
            let input = tokio::select! {
                changed = invalidated.changed() => {
                    if changed.is_err() || *invalidated.borrow_and_update() {
                        Input::Invalidated
                    } else {
                        continue;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => Input::Command(Command::Shutdown),
                },
                event = self.events_rx.recv() => match event {
                    // Cannot close: the runtime holds a sender.
                    Some(event) => Input::Event(event),
                    None => continue,
                },
                push_event = next_push(&mut self.subscription) => Input::Push(push_event),
            };

            match input {
                Input::Invalidated | Input::Command(Command::Shutdown) => break,
                Input::Command(command) => {
                    let actions = self.apply(command);
                    self.dispatch(actions).await;
                },
                Input::Event(event) => {
                    self.note_auth(&event);
                    let actions = self.app.handle(event);
                    self.dispatch(actions).await;
                },
                Input::Push(Some(PushEvent::Message(message))) => {
                    let actions = self.app.handle(AppEvent::MessageArrived { message });
                    self.dispatch(actions).await;
                },
                Input::Push(Some(PushEvent::Connected)) => {
                    let actions = self.app.handle(AppEvent::ChannelConnected);
                    self.dispatch(actions).await;
                },
                Input::Push(Some(PushEvent::Disconnected)) => {
                    let actions = self.app.handle(AppEvent::ChannelDisconnected);
                    self.dispatch(actions).await;
                },
                Input::Push(None) => {
                    // Subscription released; stop polling it.
                    self.subscription = None;
                },
            }
        }

        self.app
    }

    /// Translate a command into App state-machine calls.
    fn apply(&mut self, command: Command) -> Vec<AppAction> {
        match command {
            Command::SelectRoom(room_id) => {
                match self.app.rooms().iter().find(|r| r.id == room_id).cloned() {
                    Some(room) => self.app.select_room(room),
                    None => vec![],
                }
            },
            Command::SelectTopic(topic_id) => self.app.select_topic(&topic_id),
            Command::ToggleMode(mode) => self.app.toggle_mode(mode),
            Command::CreateTopic { title } => self.app.create_topic(&title),
            Command::ToggleTopicStatus => self.app.toggle_topic_status(),
            Command::Send { content, tags } => self.app.send(&content, tags),
            Command::SetSearchQuery(query) => self.app.set_search_query(&query),
            Command::SetSearchMode(mode) => self.app.set_search_mode(mode),
            Command::ClearSearch => self.app.clear_search(),
            Command::OpenDirect { other_id } => self.app.open_direct(&other_id),
            Command::CreateRoom { name, member_ids } => self.app.create_room(&name, member_ids),
            Command::ExportDraft => self.app.export_draft(),
            Command::Shutdown => vec![],
        }
    }

    async fn dispatch(&mut self, actions: Vec<AppAction>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: AppAction) {
        match action {
            AppAction::Render => {
                self.render.send_modify(|tick| *tick = tick.wrapping_add(1));
            },
            AppAction::Subscribe { room_id } => {
                // Release the old room's subscription before establishing
                // the new one, so no event for an undisplayed room slips in.
                self.subscription = None;
                self.subscription = Some(self.push.subscribe(room_id).await);
            },
            AppAction::FetchHistory { ctx } => self.spawn_fetch(ctx),
            AppAction::RefreshTopics { room_id } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match directory.list_topics(&room_id, None).await {
                        Ok(topics) => AppEvent::TopicsLoaded { room_id, topics },
                        Err(e) => read_failure("load topics", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::CreateTopic { room_id, title } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match directory.create_topic(&room_id, &title).await {
                        Ok(topic) => AppEvent::TopicCreated { room_id, topic },
                        Err(e) => mutation_failure("create topic", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::SetTopicStatus { topic_id, status } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = match status {
                        TopicStatus::Closed => directory.close_topic(&topic_id).await,
                        TopicStatus::Open => directory.reopen_topic(&topic_id).await,
                    };
                    let event = match result {
                        Ok(topic) => AppEvent::TopicStatusChanged { topic },
                        Err(e) => mutation_failure("update topic", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::PublishMessage { message } => {
                if let Err(e) = self.push.publish(message).await {
                    tracing::warn!(error = %e, "publish failed");
                    let _ = self.events_tx.send(AppEvent::ChannelDisconnected).await;
                    let _ = self
                        .events_tx
                        .send(AppEvent::OperationFailed {
                            operation: "send",
                            error: SyncError::MutationRejected(e.to_string()),
                        })
                        .await;
                }
            },
            AppAction::SendAndRefetch { message, ctx } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                let user_id = self.session.user_id().clone();
                tokio::spawn(async move {
                    let room_id = message.room_id.clone();
                    if let Err(e) = directory.send_message(&room_id, message).await {
                        let _ = events.send(mutation_failure("send", e)).await;
                        return;
                    }
                    let event = fetch_history(directory.as_ref(), &user_id, ctx).await;
                    let _ = events.send(event).await;
                });
            },
            AppAction::CreateRoom { room } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match directory.create_room(room).await {
                        Ok(room) => AppEvent::RoomOpened { room },
                        Err(e) => mutation_failure("create room", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::OpenPrivateRoom { other_id } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                let user_id = self.session.user_id().clone();
                tokio::spawn(async move {
                    let event = match directory.private_room(&user_id, &other_id).await {
                        Ok(room) => AppEvent::RoomOpened { room },
                        Err(e) => mutation_failure("open direct chat", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::ExportDraft { room_id, topic_id } => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match directory.export_draft(&room_id, &topic_id).await {
                        Ok(draft) => AppEvent::DraftExported { draft },
                        Err(e) => mutation_failure("export draft", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::LoadRooms => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                let user_id = self.session.user_id().clone();
                tokio::spawn(async move {
                    let event = match directory.list_rooms(&user_id).await {
                        Ok(rooms) => AppEvent::RoomsLoaded { rooms },
                        Err(e) => read_failure("load rooms", e),
                    };
                    let _ = events.send(event).await;
                });
            },
            AppAction::LoadUsers => {
                let directory = Arc::clone(&self.directory);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match directory.list_users().await {
                        Ok(users) => AppEvent::UsersLoaded { users },
                        Err(e) => read_failure("load users", e),
                    };
                    let _ = events.send(event).await;
                });
            },
        }
    }

    fn spawn_fetch(&self, ctx: FetchContext) {
        let directory = Arc::clone(&self.directory);
        let events = self.events_tx.clone();
        let user_id = self.session.user_id().clone();
        tokio::spawn(async move {
            let event = fetch_history(directory.as_ref(), &user_id, ctx).await;
            let _ = events.send(event).await;
        });
    }

    /// Any unauthorized response invalidates the whole session, regardless
    /// of which call produced it.
    fn note_auth(&self, event: &AppEvent) {
        let error = match event {
            AppEvent::HistoryFailed { error, .. } | AppEvent::OperationFailed { error, .. } => {
                error
            },
            _ => return,
        };
        if error.is_auth_expired() {
            tracing::info!("session invalidated by unauthorized response");
            self.session.invalidate();
        }
    }
}

async fn next_push(subscription: &mut Option<Subscription>) -> Option<PushEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn fetch_history<D: Directory + ?Sized>(
    directory: &D,
    user_id: &UserId,
    ctx: FetchContext,
) -> AppEvent {
    let filter = match (&ctx.topic_id, &ctx.tag) {
        (Some(topic_id), _) => HistoryFilter::topic(topic_id.clone()),
        (None, Some(tag)) => HistoryFilter::tagged(tag.clone()),
        (None, None) => HistoryFilter::flat(),
    };
    match directory.fetch_history(&ctx.room_id, user_id, &filter).await {
        Ok(messages) => AppEvent::HistoryLoaded { ctx, messages },
        Err(e) => AppEvent::HistoryFailed { ctx, error: e.into_read_error() },
    }
}

fn read_failure(operation: &'static str, error: DirectoryError) -> AppEvent {
    AppEvent::OperationFailed { operation, error: error.into_read_error() }
}

fn mutation_failure(operation: &'static str, error: DirectoryError) -> AppEvent {
    AppEvent::OperationFailed { operation, error: error.into_mutation_error() }
}
