use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{AppResult, ChatError};

pub const ROOMS: &str = "rooms";
pub const ROOM_MESSAGES: &str = "room-messages";
pub const USERS: &str = "users";
pub const CREATED_AT: &str = "createdAt";

/// Placeholder the backend replaces with its own clock on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerTimestamp;

impl ServerTimestamp {
    pub fn placeholder() -> Value {
        serde_json::json!({ ".sv": "timestamp" })
    }

    pub fn is_placeholder(value: &Value) -> bool {
        value.get(".sv").and_then(Value::as_str) == Some("timestamp")
    }
}

impl Serialize for ServerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Self::placeholder().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl From<&NewUser> for Credentials {
    fn from(user: &NewUser) -> Self {
        Credentials {
            email: user.email.clone(),
            password: user.password.clone(),
        }
    }
}

/// What a successful sign-in hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    pub uid: String,
    pub provider: String,
    pub email: Option<String>,
    pub id_token: Option<String>,
    /// The OAuth provider's own token, for social logins.
    pub access_token: Option<String>,
}

/// A profile for a sign-in with no user record, e.g. a first social login.
/// The username is the email's local part, or the uid without an email.
impl From<&AuthData> for UserProfile {
    fn from(auth: &AuthData) -> Self {
        let email = auth.email.clone().unwrap_or_default();
        let username = match email.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_owned(),
            _ => auth.uid.clone(),
        };
        UserProfile { id: auth.uid.clone(), email, username }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewMessage<'a> {
    pub sender_username: &'a str,
    pub sender_email: &'a str,
    pub content: &'a str,
    #[serde(rename = "createdAt")]
    pub created_at: ServerTimestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "ownerId", default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Projection of the room's latest message; never written back.
    #[serde(skip)]
    pub last_message_content: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Room {
    pub fn named(name: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_owned(), Value::String(name.to_owned()));
        Room { fields, ..Room::default() }
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

/// A record read out of a keyed collection.
pub trait Record: serde::de::DeserializeOwned + Clone + Send + Sync + 'static {
    fn with_key(self, key: &str) -> Self;
}

impl Record for Message {
    fn with_key(mut self, key: &str) -> Self {
        self.id = key.to_owned();
        self
    }
}

impl Record for Room {
    fn with_key(mut self, key: &str) -> Self {
        self.id = key.to_owned();
        self
    }
}

/// Rejects keys the backend would refuse in a path segment.
pub fn check_key(key: &str) -> AppResult<&str> {
    let bad = key.is_empty()
        || key.len() > 768
        || key.chars().any(|c| matches!(c, '.' | '$' | '#' | '[' | ']' | '/') || c.is_control());
    if bad {
        return Err(ChatError::InvalidArgument(format!("{key:?} is not a valid key")))?;
    }
    Ok(key)
}

pub fn room_messages_path(room_id: &str) -> AppResult<String> {
    Ok(format!("{ROOM_MESSAGES}/{}", check_key(room_id)?))
}

pub fn room_path(room_id: &str) -> AppResult<String> {
    Ok(format!("{ROOMS}/{}", check_key(room_id)?))
}

pub fn user_path(uid: &str) -> AppResult<String> {
    Ok(format!("{USERS}/{}", check_key(uid)?))
}

pub fn presence_path(uid: &str) -> AppResult<String> {
    Ok(format!("{}/connected", user_path(uid)?))
}
