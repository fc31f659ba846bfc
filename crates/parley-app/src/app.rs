//! View state machine.
//!
//! [`App`] is the single source of truth for what the user currently sees:
//! selected room, selected topic, display mode, the materialized message
//! list, and per-topic unread counters. It is a pure state machine, fully
//! decoupled from I/O: commands and [`crate::AppEvent`] inputs go in,
//! [`crate::AppAction`] instructions for the runtime come out.
//!
//! # Consistency rules
//!
//! - Only this type mutates the materialized list and the unread map.
//! - Every history fetch is issued with a [`FetchContext`] snapshot; a
//!   resolved fetch is applied only if its context still equals the live
//!   one, so stale results from abandoned views are silently discarded.
//! - Switching rooms or toggling mode clears the materialized list and
//!   resets search; data is never carried across scopes.

use std::collections::HashMap;

use parley_client::{NewRoom, OutgoingMessage};
use parley_core::{IssueDraft, Message, Room, RoomId, Topic, TopicId, User, UserId};

use crate::{AppAction, AppEvent, FetchContext, Search, SearchMode, ViewMode, search};

/// View state machine.
///
/// Pure: no I/O dependencies, fully testable without a runtime.
#[derive(Debug, Clone)]
pub struct App {
    /// Authenticated session user; stamps every outgoing message.
    user: User,
    /// Cached room list, fetched once and appended to on creation.
    rooms: Vec<Room>,
    /// Cached user directory.
    users: Vec<User>,
    /// Topic cache for the selected room, most-recently-active first.
    topics: Vec<Topic>,
    /// Currently selected room.
    selected_room: Option<Room>,
    /// What the selected room is showing.
    mode: ViewMode,
    /// Selected topic; only meaningful in [`ViewMode::Topics`].
    selected_topic: Option<Topic>,
    /// The materialized message list for the active scope.
    messages: Vec<Message>,
    /// Events received for topics while they were not the active view.
    /// Entries exist only for topics with a nonzero count.
    unread: HashMap<TopicId, u32>,
    /// Current search settings.
    search: Search,
    /// Monotonic fetch counter; stamped into every issued [`FetchContext`].
    generation: u64,
    /// Push channel liveness, as last reported by the runtime.
    channel_connected: bool,
    /// Transient status message for the presentation layer.
    status_message: Option<String>,
    /// Most recent topic export.
    latest_draft: Option<IssueDraft>,
}

impl App {
    /// Create the state machine for an authenticated user.
    pub fn new(user: User) -> Self {
        Self {
            user,
            rooms: Vec::new(),
            users: Vec::new(),
            topics: Vec::new(),
            selected_room: None,
            mode: ViewMode::Chat,
            selected_topic: None,
            messages: Vec::new(),
            unread: HashMap::new(),
            search: Search::empty(),
            generation: 0,
            channel_connected: false,
            status_message: None,
            latest_draft: None,
        }
    }

    /// Initial actions: load the room list and the user directory.
    pub fn start(&self) -> Vec<AppAction> {
        vec![AppAction::LoadRooms, AppAction::LoadUsers]
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    /// Select a room: clear all per-room state, reset to chat mode,
    /// re-subscribe the push channel, and fetch the flat history.
    pub fn select_room(&mut self, room: Room) -> Vec<AppAction> {
        self.messages.clear();
        self.unread.clear();
        self.topics.clear();
        self.selected_topic = None;
        self.mode = ViewMode::Chat;
        self.search = Search::empty();
        self.selected_room = Some(room.clone());

        let mut actions = vec![AppAction::Subscribe { room_id: room.id }];
        if let Some(ctx) = self.next_context() {
            actions.push(AppAction::FetchHistory { ctx });
        }
        actions.push(AppAction::Render);
        actions
    }

    /// Select a topic from the cached list: reset its unread count and
    /// fetch its history. The room subscription is unchanged; topic
    /// filtering is client-side.
    pub fn select_topic(&mut self, topic_id: &TopicId) -> Vec<AppAction> {
        if !self.in_group_room() {
            return vec![];
        }
        let Some(topic) = self.topics.iter().find(|t| &t.id == topic_id).cloned() else {
            return vec![];
        };

        self.unread.remove(topic_id);
        self.mode = ViewMode::Topics;
        self.selected_topic = Some(topic);
        self.messages.clear();

        let mut actions = Vec::new();
        if let Some(ctx) = self.next_context() {
            actions.push(AppAction::FetchHistory { ctx });
        }
        actions.push(AppAction::Render);
        actions
    }

    /// Switch between chat and topics mode. Re-invoking the current mode
    /// is an explicit refresh of the current scope, so a user can force
    /// reconciliation after a missed event.
    pub fn toggle_mode(&mut self, new_mode: ViewMode) -> Vec<AppAction> {
        if !self.in_group_room() {
            return vec![];
        }

        if new_mode == self.mode {
            let mut actions = self.refresh_scope();
            actions.push(AppAction::Render);
            return actions;
        }

        self.mode = new_mode;
        self.messages.clear();
        self.selected_topic = None;
        self.search = Search::empty();

        let mut actions = self.refresh_scope();
        actions.push(AppAction::Render);
        actions
    }

    /// Create a topic in the selected room.
    pub fn create_topic(&mut self, title: &str) -> Vec<AppAction> {
        if !self.in_group_room() {
            return vec![];
        }
        let title = title.trim();
        if title.is_empty() {
            self.status_message = Some("Topic title must not be empty".into());
            return vec![AppAction::Render];
        }
        let Some(room) = &self.selected_room else {
            return vec![];
        };
        vec![
            AppAction::CreateTopic { room_id: room.id.clone(), title: title.to_string() },
            AppAction::Render,
        ]
    }

    /// Toggle the selected topic between open and closed.
    pub fn toggle_topic_status(&self) -> Vec<AppAction> {
        let Some(topic) = &self.selected_topic else {
            return vec![];
        };
        vec![
            AppAction::SetTopicStatus {
                topic_id: topic.id.clone(),
                status: topic.status.toggled(),
            },
            AppAction::Render,
        ]
    }

    /// Send a message into the active scope.
    ///
    /// Rejected without any network call when the content is blank, no
    /// room is selected, the active scope is a closed topic, or topics
    /// mode has no topic selected. Otherwise the message goes out on the
    /// push channel when it is up (the sender's view is updated only by
    /// the echoed event), or through the directory service followed by a
    /// re-fetch when it is not.
    pub fn send(&mut self, content: &str, tags: Vec<String>) -> Vec<AppAction> {
        let content = content.trim();
        if content.is_empty() {
            return vec![];
        }
        let Some(room) = &self.selected_room else {
            return vec![];
        };

        let topic_id = match (self.mode, &self.selected_topic) {
            (ViewMode::Chat, _) => None,
            (ViewMode::Topics, Some(topic)) => {
                if topic.is_closed() {
                    self.status_message = Some("Topic is closed".into());
                    return vec![AppAction::Render];
                }
                Some(topic.id.clone())
            },
            // Topic list view has no message scope to send into.
            (ViewMode::Topics, None) => return vec![],
        };

        let message = OutgoingMessage {
            from_user_id: self.user.id.clone(),
            room_id: room.id.clone(),
            content: content.to_string(),
            tags,
            topic_id,
        };

        if self.channel_connected {
            vec![AppAction::PublishMessage { message }]
        } else {
            match self.next_context() {
                Some(ctx) => vec![AppAction::SendAndRefetch { message, ctx }],
                None => vec![],
            }
        }
    }

    /// Update the search query. In chat mode with tag search the filter
    /// runs server-side, so the change forces a re-fetch; otherwise it is
    /// a purely local projection.
    pub fn set_search_query(&mut self, query: &str) -> Vec<AppAction> {
        let was_server_side = self.server_tag_filter().is_some();
        self.search.query = query.to_string();
        self.search_changed(was_server_side)
    }

    /// Switch between content and tag search.
    pub fn set_search_mode(&mut self, mode: SearchMode) -> Vec<AppAction> {
        let was_server_side = self.server_tag_filter().is_some();
        self.search.mode = mode;
        self.search_changed(was_server_side)
    }

    /// Clear the search query, restoring the unfiltered view.
    pub fn clear_search(&mut self) -> Vec<AppAction> {
        let was_server_side = self.server_tag_filter().is_some();
        self.search.query.clear();
        self.search_changed(was_server_side)
    }

    fn search_changed(&mut self, was_server_side: bool) -> Vec<AppAction> {
        let mut actions = Vec::new();
        if (was_server_side || self.server_tag_filter().is_some())
            && let Some(ctx) = self.next_context()
        {
            actions.push(AppAction::FetchHistory { ctx });
        }
        actions.push(AppAction::Render);
        actions
    }

    /// Open (or create) the direct room with another user.
    pub fn open_direct(&self, other_id: &UserId) -> Vec<AppAction> {
        vec![AppAction::OpenPrivateRoom { other_id: other_id.clone() }]
    }

    /// Create a group room with the given members.
    pub fn create_room(&mut self, name: &str, member_ids: Vec<UserId>) -> Vec<AppAction> {
        let name = name.trim();
        if name.is_empty() {
            self.status_message = Some("Room name must not be empty".into());
            return vec![AppAction::Render];
        }
        vec![AppAction::CreateRoom {
            room: NewRoom {
                name: name.to_string(),
                creator_id: self.user.id.clone(),
                member_ids,
            },
        }]
    }

    /// Export the selected topic as an issue draft.
    pub fn export_draft(&self) -> Vec<AppAction> {
        let (Some(room), Some(topic)) = (&self.selected_room, &self.selected_topic) else {
            return vec![];
        };
        vec![AppAction::ExportDraft { room_id: room.id.clone(), topic_id: topic.id.clone() }]
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    /// Process an event and return actions.
    pub fn handle(&mut self, event: AppEvent) -> Vec<AppAction> {
        match event {
            AppEvent::MessageArrived { message } => self.route_message(message),
            AppEvent::ChannelConnected => {
                self.channel_connected = true;
                // Events may have been missed while down; reconcile.
                let mut actions = self.refresh_scope();
                actions.push(AppAction::Render);
                actions
            },
            AppEvent::ChannelDisconnected => {
                self.channel_connected = false;
                vec![AppAction::Render]
            },
            AppEvent::HistoryLoaded { ctx, messages } => {
                if self.current_context().as_ref() != Some(&ctx) {
                    tracing::debug!(generation = ctx.generation, "discarding stale history");
                    return vec![];
                }
                self.messages = messages;
                vec![AppAction::Render]
            },
            AppEvent::HistoryFailed { ctx, error } => {
                if self.current_context().as_ref() != Some(&ctx) {
                    tracing::debug!(generation = ctx.generation, "discarding stale fetch failure");
                    return vec![];
                }
                // Stale-but-present data beats blanking the view.
                tracing::warn!(%error, "history fetch failed");
                self.status_message = Some(format!("Could not load messages: {error}"));
                vec![AppAction::Render]
            },
            AppEvent::TopicsLoaded { room_id, topics } => {
                if self.selected_room.as_ref().map(|r| &r.id) != Some(&room_id) {
                    return vec![];
                }
                self.topics = topics;
                search::sort_topics(&mut self.topics);
                vec![AppAction::Render]
            },
            AppEvent::TopicCreated { room_id, topic } => self.topic_created(room_id, topic),
            AppEvent::TopicStatusChanged { topic } => {
                if let Some(cached) = self.topics.iter_mut().find(|t| t.id == topic.id) {
                    *cached = topic.clone();
                }
                if self.selected_topic.as_ref().map(|t| &t.id) == Some(&topic.id) {
                    self.selected_topic = Some(topic);
                }
                vec![AppAction::Render]
            },
            AppEvent::RoomsLoaded { rooms } => {
                self.rooms = rooms;
                if self.selected_room.is_none()
                    && let Some(first) = self.rooms.first().cloned()
                {
                    return self.select_room(first);
                }
                vec![AppAction::Render]
            },
            AppEvent::UsersLoaded { users } => {
                self.users = users;
                vec![AppAction::Render]
            },
            AppEvent::RoomOpened { room } => {
                if !self.rooms.iter().any(|r| r.id == room.id) {
                    self.rooms.push(room.clone());
                }
                self.select_room(room)
            },
            AppEvent::DraftExported { draft } => {
                self.status_message = Some(format!("Draft exported: {}", draft.title));
                self.latest_draft = Some(draft);
                vec![AppAction::Render]
            },
            AppEvent::OperationFailed { operation, error } => {
                tracing::warn!(operation, %error, "operation failed");
                self.status_message = Some(format!("{operation} failed: {error}"));
                vec![AppAction::Render]
            },
        }
    }

    /// Route one delivered push event, in arrival order.
    ///
    /// A message matching the active scope appends to the materialized
    /// list. A topic-scoped message outside the active scope increments
    /// that topic's unread count. A flat-scope message while viewing a
    /// topic is dropped: only filed conversations need a return-to-later
    /// signal.
    fn route_message(&mut self, message: Message) -> Vec<AppAction> {
        let Some(room) = &self.selected_room else {
            return vec![];
        };
        if message.room_id != room.id {
            tracing::debug!(room_id = %message.room_id, "event for unsubscribed room");
            return vec![];
        }

        let scope_matches = match (self.mode, &self.selected_topic) {
            (ViewMode::Chat, _) => message.topic_id.is_none(),
            (ViewMode::Topics, Some(topic)) => message.topic_id.as_ref() == Some(&topic.id),
            (ViewMode::Topics, None) => false,
        };

        if let Some(topic_id) = &message.topic_id {
            self.note_topic_activity(topic_id, &message);
            if !scope_matches {
                *self.unread.entry(topic_id.clone()).or_insert(0) += 1;
                return vec![AppAction::Render];
            }
        } else if !scope_matches {
            return vec![];
        }

        self.messages.push(message);
        vec![AppAction::Render]
    }

    /// Keep the cached topic's activity fields in step with live events.
    fn note_topic_activity(&mut self, topic_id: &TopicId, message: &Message) {
        if let Some(topic) = self.topics.iter_mut().find(|t| &t.id == topic_id) {
            topic.message_count += 1;
            if message.sent_at.is_some() {
                topic.last_message_at = message.sent_at;
            }
            search::sort_topics(&mut self.topics);
        }
    }

    fn topic_created(&mut self, room_id: RoomId, topic: Topic) -> Vec<AppAction> {
        if self.selected_room.as_ref().map(|r| &r.id) != Some(&room_id) {
            return vec![];
        }
        self.status_message = Some(format!("Topic created: {}", topic.title));
        self.topics.retain(|t| t.id != topic.id);
        self.topics.push(topic.clone());
        search::sort_topics(&mut self.topics);

        // Jump straight into the new topic.
        self.mode = ViewMode::Topics;
        self.unread.remove(&topic.id);
        self.selected_topic = Some(topic);
        self.messages.clear();

        let mut actions = vec![AppAction::RefreshTopics { room_id }];
        if let Some(ctx) = self.next_context() {
            actions.push(AppAction::FetchHistory { ctx });
        }
        actions.push(AppAction::Render);
        actions
    }

    // -----------------------------------------------------------------
    // Fetch contexts
    // -----------------------------------------------------------------

    /// The context a resolving fetch must match to be applied. `None`
    /// when the current view has no message scope (no room, or topic
    /// list view), in which case every resolving fetch is stale.
    pub fn current_context(&self) -> Option<FetchContext> {
        let room = self.selected_room.as_ref()?;
        let topic_id = match (self.mode, &self.selected_topic) {
            (ViewMode::Chat, _) => None,
            (ViewMode::Topics, Some(topic)) => Some(topic.id.clone()),
            (ViewMode::Topics, None) => return None,
        };
        Some(FetchContext {
            generation: self.generation,
            room_id: room.id.clone(),
            mode: self.mode,
            topic_id,
            tag: self.server_tag_filter(),
        })
    }

    /// Context for a fetch issued now. Bumping the generation invalidates
    /// every earlier in-flight fetch, including ones for the same scope.
    fn next_context(&mut self) -> Option<FetchContext> {
        self.generation += 1;
        self.current_context()
    }

    /// Actions that reconcile the current scope with the server.
    fn refresh_scope(&mut self) -> Vec<AppAction> {
        let Some(room) = &self.selected_room else {
            return vec![];
        };
        if self.mode == ViewMode::Topics && self.selected_topic.is_none() {
            return vec![AppAction::RefreshTopics { room_id: room.id.clone() }];
        }
        match self.next_context() {
            Some(ctx) => vec![AppAction::FetchHistory { ctx }],
            None => vec![],
        }
    }

    /// Tag forwarded to the server on flat-history fetches. Topic history
    /// is never tag-filtered server-side.
    fn server_tag_filter(&self) -> Option<String> {
        if self.mode == ViewMode::Chat
            && self.search.mode == SearchMode::Tag
            && !self.search.query.is_empty()
        {
            Some(self.search.query.clone())
        } else {
            None
        }
    }

    fn in_group_room(&self) -> bool {
        self.selected_room.as_ref().is_some_and(|r| !r.direct)
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The session user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Cached room list.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Cached user directory.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Topic cache for the selected room, most-recently-active first.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Currently selected room.
    pub fn selected_room(&self) -> Option<&Room> {
        self.selected_room.as_ref()
    }

    /// Current display mode.
    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Currently selected topic.
    pub fn selected_topic(&self) -> Option<&Topic> {
        self.selected_topic.as_ref()
    }

    /// The canonical materialized message list for the active scope.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages to display: the materialized list projected through the
    /// current search settings, in send order. Never mutates the canonical
    /// list, which keeps arrival order.
    pub fn visible_messages(&self) -> Vec<&Message> {
        search::sorted_for_display(&self.messages, &self.search)
    }

    /// Topics to display, filtered by the current query.
    pub fn visible_topics(&self) -> Vec<&Topic> {
        search::filter_topics(&self.topics, &self.search.query, None)
    }

    /// Unread count for a topic; zero when no events accumulated.
    pub fn unread_count(&self, topic_id: &TopicId) -> u32 {
        self.unread.get(topic_id).copied().unwrap_or(0)
    }

    /// The full unread map. Entries exist only for nonzero counts.
    pub fn unread(&self) -> &HashMap<TopicId, u32> {
        &self.unread
    }

    /// Current search settings.
    pub fn search(&self) -> &Search {
        &self.search
    }

    /// Push channel liveness, as last reported.
    pub fn channel_connected(&self) -> bool {
        self.channel_connected
    }

    /// Transient status message. `None` if no message.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Most recent topic export.
    pub fn latest_draft(&self) -> Option<&IssueDraft> {
        self.latest_draft.as_ref()
    }
}
