//! In-memory directory service double.
//!
//! Backs integration tests and offline simulation with the same contract
//! the real service enforces: closed topics reject sends, topics must
//! belong to the queried room, and history reads are scoped exactly one
//! way (flat, by-topic, or by-tag). Fault injection knobs cover the two
//! failure classes the sync engine must tolerate.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use parley_core::{
    IssueDraft, Message, Room, RoomId, Topic, TopicId, TopicStatus, User, UserId,
};

use crate::directory::{Directory, DirectoryError, HistoryFilter, NewRoom, OutgoingMessage};

#[derive(Debug, Clone)]
struct RoomRecord {
    room: Room,
    /// Empty means visible to everyone (convenient for tests).
    members: Vec<UserId>,
}

#[derive(Debug, Clone)]
struct TopicRecord {
    id: TopicId,
    room_id: RoomId,
    title: String,
    status: TopicStatus,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    rooms: Vec<RoomRecord>,
    topics: Vec<TopicRecord>,
    messages: Vec<Message>,
    next_id: u64,
    auth_expired: bool,
    read_failures: bool,
}

/// Directory service held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a user.
    pub fn add_user(&self, username: &str) -> User {
        let mut state = self.lock();
        let id = format!("u-{}", next(&mut state));
        let user = User {
            id,
            username: username.to_string(),
            first_name: None,
            last_name: None,
            online: true,
        };
        state.users.push(user.clone());
        user
    }

    /// Register a group room. An empty member list makes the room visible
    /// to every user.
    pub fn add_room(&self, name: &str, member_ids: &[UserId]) -> Room {
        let mut state = self.lock();
        let id = format!("r-{}", next(&mut state));
        let room = Room { id, name: name.to_string(), direct: false };
        state.rooms.push(RoomRecord { room: room.clone(), members: member_ids.to_vec() });
        room
    }

    /// Register a topic with a given status.
    pub fn add_topic(&self, room_id: &RoomId, title: &str, status: TopicStatus) -> Topic {
        let mut state = self.lock();
        let id = format!("t-{}", next(&mut state));
        let record = TopicRecord {
            id,
            room_id: room_id.clone(),
            title: title.to_string(),
            status,
        };
        let view = topic_view(&record, &state.messages);
        state.topics.push(record);
        view
    }

    /// Make every subsequent call fail with [`DirectoryError::AuthExpired`].
    pub fn set_auth_expired(&self, expired: bool) {
        self.lock().auth_expired = expired;
    }

    /// Make every subsequent read fail with a transport error. Mutations
    /// are unaffected.
    pub fn set_read_failures(&self, failing: bool) {
        self.lock().read_failures = failing;
    }

    /// Snapshot of all stored messages, in send order.
    pub fn stored_messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }
}

fn next(state: &mut State) -> u64 {
    state.next_id += 1;
    state.next_id
}

fn rejected(status: u16, message: &str) -> DirectoryError {
    DirectoryError::Rejected { status, message: message.to_string() }
}

fn check_gate(state: &State, read: bool) -> Result<(), DirectoryError> {
    if state.auth_expired {
        return Err(DirectoryError::AuthExpired);
    }
    if read && state.read_failures {
        return Err(DirectoryError::Transport("simulated network failure".into()));
    }
    Ok(())
}

/// Project a topic record into its wire form, computing message counts.
fn topic_view(record: &TopicRecord, messages: &[Message]) -> Topic {
    let filed: Vec<&Message> =
        messages.iter().filter(|m| m.topic_id.as_ref() == Some(&record.id)).collect();
    Topic {
        id: record.id.clone(),
        title: record.title.clone(),
        status: record.status,
        message_count: filed.len() as u64,
        last_message_at: filed.iter().filter_map(|m| m.sent_at).max(),
    }
}

fn find_topic<'a>(
    state: &'a State,
    topic_id: &TopicId,
) -> Result<&'a TopicRecord, DirectoryError> {
    state
        .topics
        .iter()
        .find(|t| &t.id == topic_id)
        .ok_or_else(|| rejected(404, "Topic not found"))
}

fn require_room(state: &State, room_id: &RoomId) -> Result<(), DirectoryError> {
    if state.rooms.iter().any(|r| &r.room.id == room_id) {
        Ok(())
    } else {
        Err(rejected(404, "Room not found"))
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_users(&self) -> Result<Vec<User>, DirectoryError> {
        let state = self.lock();
        check_gate(&state, true)?;
        Ok(state.users.clone())
    }

    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>, DirectoryError> {
        let state = self.lock();
        check_gate(&state, true)?;
        Ok(state
            .rooms
            .iter()
            .filter(|r| r.members.is_empty() || r.members.contains(user_id))
            .map(|r| r.room.clone())
            .collect())
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, DirectoryError> {
        let mut state = self.lock();
        check_gate(&state, false)?;
        if room.name.trim().is_empty() {
            return Err(rejected(400, "Room name must not be blank"));
        }
        let id = format!("r-{}", next(&mut state));
        let created = Room { id, name: room.name, direct: false };
        let mut members = room.member_ids;
        members.push(room.creator_id);
        state.rooms.push(RoomRecord { room: created.clone(), members });
        Ok(created)
    }

    async fn private_room(
        &self,
        user_id: &UserId,
        other_id: &UserId,
    ) -> Result<Room, DirectoryError> {
        let mut state = self.lock();
        check_gate(&state, false)?;

        if let Some(existing) = state.rooms.iter().find(|r| {
            r.room.direct && r.members.contains(user_id) && r.members.contains(other_id)
        }) {
            return Ok(existing.room.clone());
        }

        let name_of = |state: &State, id: &UserId| {
            state
                .users
                .iter()
                .find(|u| &u.id == id)
                .map_or_else(|| id.clone(), |u| u.username.clone())
        };
        let name = format!("{} & {}", name_of(&state, user_id), name_of(&state, other_id));
        let id = format!("r-{}", next(&mut state));
        let room = Room { id, name, direct: true };
        state.rooms.push(RoomRecord {
            room: room.clone(),
            members: vec![user_id.clone(), other_id.clone()],
        });
        Ok(room)
    }

    async fn list_topics(
        &self,
        room_id: &RoomId,
        status: Option<TopicStatus>,
    ) -> Result<Vec<Topic>, DirectoryError> {
        let state = self.lock();
        check_gate(&state, true)?;
        require_room(&state, room_id)?;
        Ok(state
            .topics
            .iter()
            .filter(|t| &t.room_id == room_id)
            .filter(|t| status.is_none_or(|s| t.status == s))
            .map(|t| topic_view(t, &state.messages))
            .collect())
    }

    async fn create_topic(&self, room_id: &RoomId, title: &str) -> Result<Topic, DirectoryError> {
        let mut state = self.lock();
        check_gate(&state, false)?;
        let room = state
            .rooms
            .iter()
            .find(|r| &r.room.id == room_id)
            .ok_or_else(|| rejected(404, "Room not found"))?;
        if room.room.direct {
            return Err(rejected(400, "Direct rooms cannot have topics"));
        }
        if title.trim().is_empty() {
            return Err(rejected(400, "Topic title must not be blank"));
        }
        let id = format!("t-{}", next(&mut state));
        let record = TopicRecord {
            id,
            room_id: room_id.clone(),
            title: title.trim().to_string(),
            status: TopicStatus::Open,
        };
        let view = topic_view(&record, &state.messages);
        state.topics.push(record);
        Ok(view)
    }

    async fn close_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError> {
        self.set_status(topic_id, TopicStatus::Closed)
    }

    async fn reopen_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError> {
        self.set_status(topic_id, TopicStatus::Open)
    }

    async fn fetch_history(
        &self,
        room_id: &RoomId,
        _user_id: &UserId,
        filter: &HistoryFilter,
    ) -> Result<Vec<Message>, DirectoryError> {
        let state = self.lock();
        check_gate(&state, true)?;
        require_room(&state, room_id)?;

        if let Some(topic_id) = &filter.topic_id {
            let topic = find_topic(&state, topic_id)?;
            if &topic.room_id != room_id {
                return Err(rejected(400, "Topic room mismatch"));
            }
            return Ok(state
                .messages
                .iter()
                .filter(|m| &m.room_id == room_id && m.topic_id.as_ref() == Some(topic_id))
                .cloned()
                .collect());
        }

        Ok(state
            .messages
            .iter()
            .filter(|m| &m.room_id == room_id && m.topic_id.is_none())
            .filter(|m| filter.tag.as_ref().is_none_or(|tag| m.tags.contains(tag)))
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        message: OutgoingMessage,
    ) -> Result<Message, DirectoryError> {
        let mut state = self.lock();
        check_gate(&state, false)?;
        require_room(&state, room_id)?;
        if message.content.trim().is_empty() {
            return Err(rejected(400, "Content must not be blank"));
        }

        if let Some(topic_id) = &message.topic_id {
            let topic = find_topic(&state, topic_id)?;
            if &topic.room_id != room_id {
                return Err(rejected(400, "Topic room mismatch"));
            }
            if topic.status == TopicStatus::Closed {
                return Err(rejected(409, "Topic is closed"));
            }
        }

        let id = format!("m-{}", next(&mut state));
        let stored = Message {
            id,
            from_user_id: message.from_user_id,
            room_id: room_id.clone(),
            topic_id: message.topic_id,
            content: message.content,
            tags: message.tags,
            sent_at: Some(Utc::now()),
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn export_draft(
        &self,
        room_id: &RoomId,
        topic_id: &TopicId,
    ) -> Result<IssueDraft, DirectoryError> {
        let state = self.lock();
        check_gate(&state, false)?;
        let topic = find_topic(&state, topic_id)?;
        if &topic.room_id != room_id {
            return Err(rejected(400, "Topic room mismatch"));
        }

        let filed: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.topic_id.as_ref() == Some(topic_id))
            .collect();

        let username = |id: &UserId| {
            state
                .users
                .iter()
                .find(|u| &u.id == id)
                .map_or_else(|| id.clone(), |u| u.username.clone())
        };
        let body = filed
            .iter()
            .map(|m| format!("{}: {}", username(&m.from_user_id), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut labels: Vec<String> = Vec::new();
        for message in &filed {
            for tag in message.display_tags() {
                if !labels.iter().any(|l| l == tag) {
                    labels.push(tag.to_string());
                }
            }
        }

        Ok(IssueDraft { title: topic.title.clone(), body, labels })
    }
}

impl MemoryDirectory {
    fn set_status(
        &self,
        topic_id: &TopicId,
        status: TopicStatus,
    ) -> Result<Topic, DirectoryError> {
        let mut state = self.lock();
        check_gate(&state, false)?;
        let record = state
            .topics
            .iter_mut()
            .find(|t| &t.id == topic_id)
            .ok_or_else(|| rejected(404, "Topic not found"))?;
        record.status = status;
        let record = record.clone();
        Ok(topic_view(&record, &state.messages))
    }
}
