//! Property-based tests for the view state machine.
//!
//! Invariants are checked under arbitrary command/event interleavings,
//! with history fetches resolved lazily so stale results occur naturally.

use std::collections::HashMap;

use parley_app::{App, AppAction, AppEvent, FetchContext, Search, SearchMode, ViewMode, search};
use parley_core::{Message, Room, Topic, TopicId, TopicStatus, User};
use proptest::prelude::*;

const ROOMS: usize = 2;
const TOPICS_PER_ROOM: usize = 2;

fn session_user() -> User {
    User {
        id: "u1".into(),
        username: "ada".into(),
        first_name: None,
        last_name: None,
        online: true,
    }
}

fn room(index: usize) -> Room {
    Room { id: format!("r{index}"), name: format!("room {index}"), direct: false }
}

fn topic_id(room_index: usize, topic_index: usize) -> TopicId {
    format!("r{room_index}-t{topic_index}")
}

fn topics_for(room_index: usize) -> Vec<Topic> {
    (0..TOPICS_PER_ROOM)
        .map(|t| Topic {
            id: topic_id(room_index, t),
            title: format!("topic {t}"),
            status: TopicStatus::Open,
            message_count: 0,
            last_message_at: None,
        })
        .collect()
}

/// One step of a simulated session.
#[derive(Debug, Clone)]
enum Op {
    SelectRoom(usize),
    SelectTopic(usize),
    ToggleMode(bool),
    Deliver { room: usize, topic: Option<usize> },
    ResolveOldestFetch,
    ResolveAllFetches,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => (0..ROOMS).prop_map(Op::SelectRoom),
        2 => (0..TOPICS_PER_ROOM).prop_map(Op::SelectTopic),
        2 => any::<bool>().prop_map(Op::ToggleMode),
        3 => (0..ROOMS, prop::option::of(0..TOPICS_PER_ROOM))
            .prop_map(|(room, topic)| Op::Deliver { room, topic }),
        2 => Just(Op::ResolveOldestFetch),
        1 => Just(Op::ResolveAllFetches),
    ]
}

/// Drives the app the way the runtime would, but with explicit control
/// over when each in-flight fetch resolves.
struct Sim {
    app: App,
    pending: Vec<FetchContext>,
    next_message: u64,
}

impl Sim {
    fn new() -> Self {
        Self { app: App::new(session_user()), pending: Vec::new(), next_message: 0 }
    }

    fn absorb(&mut self, actions: Vec<AppAction>) {
        for action in actions {
            match action {
                AppAction::FetchHistory { ctx } => self.pending.push(ctx),
                AppAction::RefreshTopics { room_id } => {
                    let index = room_id
                        .strip_prefix('r')
                        .and_then(|s| s.parse::<usize>().ok())
                        .unwrap_or(0);
                    let follow_up = self
                        .app
                        .handle(AppEvent::TopicsLoaded { room_id, topics: topics_for(index) });
                    self.absorb(follow_up);
                },
                _ => {},
            }
        }
    }

    /// Resolve a pending fetch with a payload that matches its context's
    /// scope exactly, the way a correct server would answer.
    fn resolve(&mut self, ctx: FetchContext) {
        self.next_message += 1;
        let payload = Message {
            id: format!("m{}", self.next_message),
            from_user_id: "u2".into(),
            room_id: ctx.room_id.clone(),
            topic_id: ctx.topic_id.clone(),
            content: "history".into(),
            tags: ctx.tag.clone().into_iter().collect(),
            sent_at: None,
        };
        let actions =
            self.app.handle(AppEvent::HistoryLoaded { ctx, messages: vec![payload] });
        self.absorb(actions);
    }

    fn step(&mut self, op: Op) {
        match op {
            Op::SelectRoom(index) => {
                let actions = self.app.select_room(room(index));
                self.absorb(actions);
                let follow_up = self.app.handle(AppEvent::TopicsLoaded {
                    room_id: room(index).id,
                    topics: topics_for(index),
                });
                self.absorb(follow_up);
            },
            Op::SelectTopic(index) => {
                let Some(room) = self.app.selected_room() else { return };
                let room_index = room.id.strip_prefix('r').and_then(|s| s.parse().ok());
                let Some(room_index) = room_index else { return };
                let actions = self.app.select_topic(&topic_id(room_index, index));
                self.absorb(actions);
            },
            Op::ToggleMode(chat) => {
                let mode = if chat { ViewMode::Chat } else { ViewMode::Topics };
                let actions = self.app.toggle_mode(mode);
                self.absorb(actions);
            },
            Op::Deliver { room: room_index, topic } => {
                self.next_message += 1;
                let message = Message {
                    id: format!("m{}", self.next_message),
                    from_user_id: "u2".into(),
                    room_id: room(room_index).id,
                    topic_id: topic.map(|t| topic_id(room_index, t)),
                    content: "live".into(),
                    tags: vec![],
                    sent_at: None,
                };
                let actions = self.app.handle(AppEvent::MessageArrived { message });
                self.absorb(actions);
            },
            Op::ResolveOldestFetch => {
                if !self.pending.is_empty() {
                    let ctx = self.pending.remove(0);
                    self.resolve(ctx);
                }
            },
            Op::ResolveAllFetches => {
                for ctx in std::mem::take(&mut self.pending) {
                    self.resolve(ctx);
                }
            },
        }
    }

    /// Every materialized message matches the current view scope.
    fn scope_holds(&self) -> bool {
        let Some(room) = self.app.selected_room() else {
            return self.app.messages().is_empty();
        };
        self.app.messages().iter().all(|m| {
            m.room_id == room.id
                && match (self.app.mode(), self.app.selected_topic()) {
                    (ViewMode::Chat, _) => m.topic_id.is_none(),
                    (ViewMode::Topics, Some(t)) => m.topic_id.as_ref() == Some(&t.id),
                    (ViewMode::Topics, None) => false,
                }
        })
    }
}

proptest! {
    /// No message ever leaks across rooms, topics, or modes, no matter
    /// how commands interleave with late-resolving fetches.
    #[test]
    fn prop_materialized_messages_match_view_scope(
        ops in prop::collection::vec(op_strategy(), 0..60)
    ) {
        let mut sim = Sim::new();
        for op in ops {
            sim.step(op);
            prop_assert!(sim.scope_holds());
        }
    }

    /// Unread counts are exact: one per topic event delivered outside the
    /// active scope, reset to zero on selection.
    #[test]
    fn prop_unread_counts_are_exact(
        deliveries in prop::collection::vec(0..TOPICS_PER_ROOM, 0..40)
    ) {
        let mut sim = Sim::new();
        sim.step(Op::SelectRoom(0));

        let mut expected: HashMap<TopicId, u32> = HashMap::new();
        for (n, topic) in deliveries.iter().enumerate() {
            sim.step(Op::Deliver { room: 0, topic: Some(*topic) });
            *expected.entry(topic_id(0, *topic)).or_insert(0) += 1;
            prop_assert_eq!(&expected, sim.app.unread(), "after delivery {}", n);
        }

        for topic in 0..TOPICS_PER_ROOM {
            sim.step(Op::SelectTopic(topic));
            prop_assert_eq!(sim.app.unread_count(&topic_id(0, topic)), 0);
        }
    }

    /// Search is a pure projection: the filtered view is a subsequence of
    /// the canonical list, and an empty query is the identity.
    #[test]
    fn prop_search_is_non_destructive(
        contents in prop::collection::vec("[a-z ]{0,12}", 0..20),
        query in "[a-z]{0,4}",
    ) {
        let messages: Vec<Message> = contents
            .iter()
            .enumerate()
            .map(|(i, content)| Message {
                id: format!("m{i}"),
                from_user_id: "u2".into(),
                room_id: "r0".into(),
                topic_id: None,
                content: content.clone(),
                tags: vec![],
                sent_at: None,
            })
            .collect();

        let filtered = search::visible(
            &messages,
            &Search { query: query.clone(), mode: SearchMode::Message },
        );

        // Subsequence of the canonical list, order preserved.
        let mut cursor = messages.iter();
        for hit in &filtered {
            prop_assert!(cursor.any(|m| std::ptr::eq(m, *hit)));
        }

        // Clearing the query restores the exact original list.
        let cleared = search::visible(&messages, &Search::empty());
        prop_assert_eq!(cleared.len(), messages.len());
        for (original, shown) in messages.iter().zip(cleared) {
            prop_assert!(std::ptr::eq(original, shown));
        }
    }
}
