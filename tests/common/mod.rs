#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use serde_json::Value;

use chatfire::{
    backend::{Backend, MemoryBackend},
    db::{NewUser, UserProfile},
    profiles::LocalStore,
    Auth, UserService,
};

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub auth: Auth,
    pub store: LocalStore,
    pub users: UserService,
}

pub async fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let auth = Auth::with_backend(backend.clone());
    let store = LocalStore::in_memory().await.unwrap();
    let users = UserService::new(auth.clone(), store.clone());
    Harness { backend, auth, store, users }
}

pub fn new_user(name: &str) -> NewUser {
    NewUser {
        email: format!("{name}@example.com"),
        password: "correct horse".to_owned(),
        username: name.to_owned(),
    }
}

impl Harness {
    pub async fn signed_up(&self, name: &str) -> UserProfile {
        self.users.create_user(&new_user(name)).await.unwrap();
        self.users.get_profile().await.unwrap()
    }
}

pub async fn within<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("timed out")
}

/// Polls `path` until it holds `expected`.
pub async fn wait_for_value(backend: &MemoryBackend, path: &str, expected: Option<Value>) {
    within(async {
        while backend.get(path).await.unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
