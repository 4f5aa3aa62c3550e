//! The capability surface the chat services need from the hosted backend.
//!
//! Components only ever talk to [`Backend`]: ordered child listening with an
//! optional last-N window, add/remove/set, a connectivity signal, on-disconnect
//! cleanup, and password/IdP authentication.

mod firebase;
mod memory;
mod push_id;
mod sse;
pub(crate) mod tree;
pub(crate) mod window;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::{auth::ClientProvider, db::AuthData, AbortOnDrop, AppResult};

pub use firebase::FirebaseBackend;
pub use memory::{MemoryBackend, Op};

pub type SharedBackend = Arc<dyn Backend>;

/// A listen request: the children of `path`, ordered by `order_by` (or key),
/// keeping only the last `limit_to_last` of them when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub path: String,
    pub order_by: Option<String>,
    pub limit_to_last: Option<usize>,
}

impl Query {
    pub fn children(path: impl Into<String>) -> Self {
        Query { path: path.into(), order_by: None, limit_to_last: None }
    }

    pub fn order_by_child(mut self, child: &str) -> Self {
        self.order_by = Some(child.to_owned());
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_to_last = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Added(Snapshot),
    Changed(Snapshot),
    Removed(String),
    /// Every child present when the listener attached has been delivered.
    Ready,
}

/// A live listener. Dropping it detaches the listener from the backend.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChildEvent>,
    _pump: Option<AbortOnDrop>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChildEvent>) -> Self {
        Subscription { rx, _pump: None }
    }

    pub(crate) fn with_pump(rx: mpsc::UnboundedReceiver<ChildEvent>, pump: AbortOnDrop) -> Self {
        Subscription { rx, _pump: Some(pump) }
    }

    /// Next event, or `None` once the backend stops the listener.
    pub async fn next(&mut self) -> Option<ChildEvent> {
        self.rx.recv().await
    }

    /// An event that has already arrived, without waiting.
    pub fn try_next(&mut self) -> Option<ChildEvent> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn create_user(&self, email: &str, password: &str) -> AppResult<AuthData>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthData>;
    async fn sign_in_with_idp(&self, provider: ClientProvider, access_token: &str) -> AppResult<AuthData>;
    async fn sign_out(&self) -> AppResult<()>;

    async fn get(&self, path: &str) -> AppResult<Option<Value>>;
    async fn set(&self, path: &str, value: Value) -> AppResult<()>;
    /// Appends under a fresh, time-ordered key and returns that key.
    async fn push(&self, path: &str, value: Value) -> AppResult<String>;
    async fn remove(&self, path: &str) -> AppResult<()>;
    async fn listen(&self, query: Query) -> AppResult<Subscription>;

    fn connected(&self) -> watch::Receiver<bool>;
    /// Registers a removal the backend performs once this client disconnects.
    async fn on_disconnect_remove(&self, path: &str) -> AppResult<()>;
    async fn go_offline(&self) -> AppResult<()>;
    async fn go_online(&self) -> AppResult<()>;
}
