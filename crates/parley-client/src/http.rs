//! HTTP implementation of the directory service client.
//!
//! A thin REST wrapper: one method per endpoint, bearer auth from the
//! session on every request, JSON bodies. All protocol decisions (what to
//! fetch, when, what to do on failure) live in `parley-app`.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{
    IssueDraft, Message, Room, RoomId, SessionHandle, Topic, TopicId, TopicStatus, User, UserId,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::directory::{Directory, DirectoryError, HistoryFilter, NewRoom, OutgoingMessage};

/// Request timeout for directory calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory service client over HTTP.
pub struct HttpDirectory {
    base: String,
    session: SessionHandle,
    http: reqwest::Client,
}

impl HttpDirectory {
    /// Create a client for the service at `base` (no trailing slash),
    /// authenticating as the given session.
    pub fn new(base: impl Into<String>, session: SessionHandle) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        Ok(Self { base: base.into(), session, http })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base))
            .bearer_auth(self.session.token())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, DirectoryError> {
        let response =
            request.send().await.map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DirectoryError::AuthExpired);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Rejected { status: status.as_u16(), message });
        }

        response.json().await.map_err(|e| DirectoryError::Transport(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DirectoryError> {
        self.execute(self.request(Method::GET, path).query(query)).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DirectoryError> {
        self.execute(self.request(Method::POST, path).json(body)).await
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str) -> Result<T, DirectoryError> {
        self.execute(self.request(Method::PATCH, path)).await
    }
}

fn status_param(status: TopicStatus) -> &'static str {
    match status {
        TopicStatus::Open => "OPEN",
        TopicStatus::Closed => "CLOSED",
    }
}

#[derive(Serialize)]
struct CreateTopicBody<'a> {
    title: &'a str,
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn list_users(&self) -> Result<Vec<User>, DirectoryError> {
        self.get("/user/users", &[]).await
    }

    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<Room>, DirectoryError> {
        self.get("/rooms", &[("userId", user_id.as_str())]).await
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, DirectoryError> {
        self.post("/rooms", &room).await
    }

    async fn private_room(
        &self,
        user_id: &UserId,
        other_id: &UserId,
    ) -> Result<Room, DirectoryError> {
        self.get("/rooms/private", &[("userId", user_id.as_str()), ("otherId", other_id.as_str())])
            .await
    }

    async fn list_topics(
        &self,
        room_id: &RoomId,
        status: Option<TopicStatus>,
    ) -> Result<Vec<Topic>, DirectoryError> {
        let path = format!("/rooms/{room_id}/topics");
        match status {
            Some(status) => self.get(&path, &[("status", status_param(status))]).await,
            None => self.get(&path, &[]).await,
        }
    }

    async fn create_topic(&self, room_id: &RoomId, title: &str) -> Result<Topic, DirectoryError> {
        self.post(&format!("/rooms/{room_id}/topics"), &CreateTopicBody { title }).await
    }

    async fn close_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError> {
        self.patch(&format!("/topics/{topic_id}/close")).await
    }

    async fn reopen_topic(&self, topic_id: &TopicId) -> Result<Topic, DirectoryError> {
        self.patch(&format!("/topics/{topic_id}/reopen")).await
    }

    async fn fetch_history(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        filter: &HistoryFilter,
    ) -> Result<Vec<Message>, DirectoryError> {
        let mut query: Vec<(&str, &str)> = vec![("userId", user_id.as_str())];
        if let Some(topic_id) = &filter.topic_id {
            query.push(("topicId", topic_id.as_str()));
        }
        if let Some(tag) = &filter.tag {
            query.push(("tag", tag.as_str()));
        }
        self.get(&format!("/rooms/{room_id}/messages"), &query).await
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        message: OutgoingMessage,
    ) -> Result<Message, DirectoryError> {
        self.post(&format!("/rooms/{room_id}/messages"), &message).await
    }

    async fn export_draft(
        &self,
        room_id: &RoomId,
        topic_id: &TopicId,
    ) -> Result<IssueDraft, DirectoryError> {
        // Export takes no body; the server derives everything from the topic.
        self.post(&format!("/rooms/{room_id}/topics/{topic_id}/export/draft"), &()).await
    }
}
