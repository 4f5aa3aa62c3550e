use std::fmt;

use tracing::{debug, instrument};

use crate::{
    backend::{Query, SharedBackend},
    db::{check_key, room_messages_path, Message, NewMessage, ServerTimestamp, CREATED_AT},
    profiles::UserService,
    AppResult, ChatError,
};

use super::LiveList;

/// Opens per-room message channels for the signed-in user.
#[derive(Clone)]
pub struct MessageChannel {
    users: UserService,
}

impl MessageChannel {
    pub fn new(users: UserService) -> Self {
        MessageChannel { users }
    }

    /// Starts following a room's messages, oldest first by server time.
    #[instrument(skip(self))]
    pub async fn open(&self, room_id: &str) -> AppResult<Channel> {
        let path = room_messages_path(room_id)?;
        let backend = self.users.auth().backend().clone();
        let sub = backend
            .listen(Query::children(path.clone()).order_by_child(CREATED_AT))
            .await?;
        Ok(Channel {
            room_id: room_id.to_owned(),
            path,
            backend,
            users: self.users.clone(),
            messages: LiveList::follow(sub, Some(CREATED_AT.to_owned())),
        })
    }
}

/// One open room. Dropping it stops the message listener.
pub struct Channel {
    room_id: String,
    path: String,
    backend: SharedBackend,
    users: UserService,
    messages: LiveList<Message>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("room_id", &self.room_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn messages(&self) -> &LiveList<Message> {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.snapshot()
    }

    pub async fn loaded(&self) -> AppResult<()> {
        self.messages.loaded().await
    }

    /// Appends a message from the current profile and returns its id.
    /// Blank content is refused before anything is written.
    #[instrument(skip(self, content), fields(room_id = %self.room_id))]
    pub async fn send(&self, content: &str) -> AppResult<String> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidArgument("message content is empty".to_owned()))?;
        }
        let profile = self.users.require_profile().await?;
        let message = NewMessage {
            sender_username: &profile.username,
            sender_email: &profile.email,
            content,
            created_at: ServerTimestamp,
        };
        let id = self.backend.push(&self.path, serde_json::to_value(&message)?).await?;
        debug!(%id, "message added");
        Ok(id)
    }

    /// Deletes `message` by id; resolves once the backend confirms.
    #[instrument(skip_all, fields(room_id = %self.room_id, id = %message.id))]
    pub async fn remove(&self, message: &Message) -> AppResult<()> {
        let id = check_key(&message.id)?;
        self.backend.remove(&format!("{}/{id}", self.path)).await?;
        debug!("message removed");
        Ok(())
    }

    pub fn dispose(self) {}
}
