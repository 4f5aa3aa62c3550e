use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::ClientProvider, db::AuthData, AppResult, ChatError};

use super::{push_id::PushIds, tree, window::Window, Backend, ChildEvent, Query, Subscription};

/// A write as the backend received it, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Set(String),
    Push(String),
    Remove(String),
    OnDisconnectRemove(String),
}

struct Account {
    uid: String,
    password: String,
}

struct Listener {
    path: Vec<String>,
    window: Window,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    listeners: Vec<Listener>,
    accounts: HashMap<String, Account>,
    idp_users: HashMap<String, String>,
    current: Option<AuthData>,
    push_ids: PushIds,
    clock: i64,
    on_disconnect: Vec<String>,
    denied: Vec<String>,
    ops: Vec<Op>,
}

impl Inner {
    /// Server clock in milliseconds, strictly increasing across writes.
    fn tick(&mut self) -> i64 {
        let now = (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn check_allowed(&self, path: &str) -> AppResult<()> {
        let segs = tree::segments(path);
        let denied = self.denied.iter().any(|prefix| {
            let prefix = tree::segments(prefix);
            prefix.len() <= segs.len() && tree::overlaps(&prefix, &segs)
        });
        if denied {
            return Err(ChatError::Rejected {
                path: path.to_owned(),
                reason: "PERMISSION_DENIED".to_owned(),
            })?;
        }
        Ok(())
    }

    fn write(&mut self, path: &str, mut value: Value) {
        let now = self.tick();
        tree::resolve_server_values(&mut value, now);
        let segs = tree::segments(path);
        tree::set_at(&mut self.root, &segs, value);
        self.notify(&segs);
    }

    fn notify(&mut self, written: &[&str]) {
        let root = &self.root;
        self.listeners.retain_mut(|listener| {
            if listener.tx.is_closed() {
                return false;
            }
            let path: Vec<&str> = listener.path.iter().map(String::as_str).collect();
            if !tree::overlaps(written, &path) {
                return true;
            }
            let location = tree::get_at(root, &path);
            listener
                .window
                .update(location)
                .into_iter()
                .all(|event| listener.tx.send(event).is_ok())
        });
    }
}

/// An in-process backend with the same observable behavior as the hosted
/// one: ordered child listeners, push ids, server timestamps, password and
/// IdP accounts, presence cleanup on disconnect. Used offline and in tests.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    connected: watch::Sender<bool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::new(Inner::default()),
            connected: watch::Sender::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuses every write at or below `prefix`, like a security rule would.
    pub fn deny_writes(&self, prefix: &str) {
        self.lock().denied.push(prefix.to_owned());
    }

    /// Every write received so far.
    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    /// The whole tree, for assertions.
    pub fn dump(&self) -> Value {
        self.lock().root.clone()
    }

    pub fn current_user(&self) -> Option<AuthData> {
        self.lock().current.clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn create_user(&self, email: &str, password: &str) -> AppResult<AuthData> {
        let mut inner = self.lock();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(ChatError::Auth("INVALID_EMAIL".to_owned()))?;
        }
        if password.len() < 6 {
            return Err(ChatError::Auth("WEAK_PASSWORD : Password should be at least 6 characters".to_owned()))?;
        }
        if inner.accounts.contains_key(email) {
            return Err(ChatError::Auth("EMAIL_EXISTS".to_owned()))?;
        }
        let uid = Uuid::now_v7().simple().to_string();
        inner.accounts.insert(email.to_owned(), Account { uid: uid.clone(), password: password.to_owned() });
        debug!(%uid, "account created");
        Ok(AuthData {
            uid,
            provider: "password".to_owned(),
            email: Some(email.to_owned()),
            id_token: None,
            access_token: None,
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthData> {
        let mut inner = self.lock();
        let Some(account) = inner.accounts.get(email) else {
            return Err(ChatError::Auth("EMAIL_NOT_FOUND".to_owned()))?;
        };
        if account.password != password {
            return Err(ChatError::Auth("INVALID_PASSWORD".to_owned()))?;
        }
        let auth = AuthData {
            uid: account.uid.clone(),
            provider: "password".to_owned(),
            email: Some(email.to_owned()),
            id_token: Some(Uuid::now_v7().to_string()),
            access_token: None,
        };
        inner.current = Some(auth.clone());
        Ok(auth)
    }

    async fn sign_in_with_idp(&self, provider: ClientProvider, access_token: &str) -> AppResult<AuthData> {
        if access_token.is_empty() {
            return Err(ChatError::Auth("INVALID_IDP_RESPONSE".to_owned()))?;
        }
        let mut inner = self.lock();
        let uid = inner
            .idp_users
            .entry(format!("{}:{access_token}", provider.id()))
            .or_insert_with(|| Uuid::now_v7().simple().to_string())
            .clone();
        let auth = AuthData {
            uid,
            provider: provider.id().to_owned(),
            email: None,
            id_token: Some(Uuid::now_v7().to_string()),
            access_token: Some(access_token.to_owned()),
        };
        inner.current = Some(auth.clone());
        Ok(auth)
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.lock().current = None;
        Ok(())
    }

    async fn get(&self, path: &str) -> AppResult<Option<Value>> {
        let inner = self.lock();
        Ok(tree::get_at(&inner.root, &tree::segments(path)).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> AppResult<()> {
        let mut inner = self.lock();
        inner.check_allowed(path)?;
        inner.ops.push(Op::Set(path.to_owned()));
        inner.write(path, value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> AppResult<String> {
        let mut inner = self.lock();
        inner.check_allowed(path)?;
        let now = inner.tick();
        let key = inner.push_ids.next(now);
        let child = format!("{}/{key}", path.trim_end_matches('/'));
        inner.ops.push(Op::Push(child.clone()));
        inner.write(&child, value);
        Ok(key)
    }

    async fn remove(&self, path: &str) -> AppResult<()> {
        let mut inner = self.lock();
        inner.check_allowed(path)?;
        inner.ops.push(Op::Remove(path.to_owned()));
        inner.write(path, Value::Null);
        Ok(())
    }

    async fn listen(&self, query: Query) -> AppResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let path: Vec<String> = tree::segments(&query.path).into_iter().map(str::to_owned).collect();
        let segs: Vec<&str> = path.iter().map(String::as_str).collect();
        let mut window = Window::new(&query);
        for event in window.update(tree::get_at(&inner.root, &segs)) {
            let _ = tx.send(event);
        }
        let _ = tx.send(ChildEvent::Ready);
        inner.listeners.push(Listener { path, window, tx });
        Ok(Subscription::new(rx))
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn on_disconnect_remove(&self, path: &str) -> AppResult<()> {
        let mut inner = self.lock();
        inner.ops.push(Op::OnDisconnectRemove(path.to_owned()));
        inner.on_disconnect.push(path.to_owned());
        Ok(())
    }

    async fn go_offline(&self) -> AppResult<()> {
        {
            let mut inner = self.lock();
            let pending = std::mem::take(&mut inner.on_disconnect);
            for path in pending {
                debug!(%path, "running on-disconnect removal");
                inner.ops.push(Op::Remove(path.clone()));
                inner.write(&path, Value::Null);
            }
        }
        self.connected.send_replace(false);
        Ok(())
    }

    async fn go_online(&self) -> AppResult<()> {
        self.connected.send_replace(true);
        Ok(())
    }
}
