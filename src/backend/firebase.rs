use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header::ACCEPT, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{auth::ClientProvider, db::AuthData, AbortOnDrop, AppError, AppResult, ChatError, GetField};

use super::{sse::SseDecoder, tree, window::Window, Backend, ChildEvent, Query, Subscription};

const IDENTITY_TOOLKIT: &str = "https://identitytoolkit.googleapis.com/v1/accounts";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: String,
    return_idp_credential: bool,
    return_secure_token: bool,
}

#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

/// Talks to a Firebase Realtime Database over REST and server-sent events,
/// and to Identity Toolkit for accounts.
///
/// REST clients get no server-side on-disconnect hook, so registered
/// removals run when [`Backend::go_offline`] is called.
pub struct FirebaseBackend {
    http: reqwest::Client,
    database_url: Url,
    identity_url: String,
    api_key: Option<String>,
    id_token: RwLock<Option<String>>,
    connected: Arc<watch::Sender<bool>>,
    on_disconnect: Mutex<Vec<String>>,
}

impl FirebaseBackend {
    pub fn new(database_url: &str, api_key: Option<String>) -> AppResult<Self> {
        let mut database_url = Url::parse(database_url)?;
        if !database_url.path().ends_with('/') {
            let path = format!("{}/", database_url.path());
            database_url.set_path(&path);
        }
        Ok(FirebaseBackend {
            http: reqwest::Client::new(),
            database_url,
            identity_url: IDENTITY_TOOLKIT.to_owned(),
            api_key,
            id_token: RwLock::new(None),
            connected: Arc::new(watch::Sender::new(false)),
            on_disconnect: Mutex::new(Vec::new()),
        })
    }

    /// Points account calls at another Identity Toolkit `accounts` base.
    pub fn with_identity_url(mut self, url: impl Into<String>) -> Self {
        self.identity_url = url.into();
        self
    }

    fn token(&self) -> Option<String> {
        self.id_token.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn store_token(&self, token: Option<String>) {
        *self.id_token.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn location(&self, path: &str, query: Option<&Query>) -> AppResult<Url> {
        let mut url = self.database_url.join(&format!("{}.json", path.trim_matches('/')))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(token) = self.token() {
                pairs.append_pair("auth", &token);
            }
            if let Some(query) = query {
                if let Some(child) = &query.order_by {
                    pairs.append_pair("orderBy", &format!("\"{child}\""));
                } else if query.limit_to_last.is_some() {
                    pairs.append_pair("orderBy", "\"$key\"");
                }
                if let Some(n) = query.limit_to_last {
                    pairs.append_pair("limitToLast", &n.to_string());
                }
            }
        }
        Ok(url)
    }

    fn unavailable(&self, err: reqwest::Error) -> AppError {
        self.connected.send_replace(false);
        ChatError::Unavailable(err.to_string()).into()
    }

    async fn check(&self, path: &str, response: Response) -> AppResult<Response> {
        self.connected.send_replace(true);
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let reason = body.get_str_field("error").unwrap_or_else(|_| status.to_string());
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ChatError::Rejected { path: path.to_owned(), reason })?
            }
            _ => Err(ChatError::Unavailable(reason))?,
        }
    }

    async fn identity<B: Serialize + Sync>(&self, endpoint: &str, body: &B) -> AppResult<Value> {
        let Some(key) = &self.api_key else {
            return Err(ChatError::Auth("no API key configured".to_owned()))?;
        };
        let response = self.http
            .post(format!("{}:{endpoint}?key={key}", self.identity_url))
            .json(body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body
                .get_obj_field("error")
                .and_then(|e| e.get_str_field("message"))
                .unwrap_or_else(|_| status.to_string());
            return Err(ChatError::Auth(message))?;
        }
        Ok(body)
    }

    fn auth_data(body: &Value, provider: &str, access_token: Option<String>) -> AppResult<AuthData> {
        Ok(AuthData {
            uid: body.get_str_field("localId")?,
            provider: provider.to_owned(),
            email: body.get_str_field("email").ok(),
            id_token: body.get_str_field("idToken").ok(),
            access_token,
        })
    }
}

/// Applies one `put`/`patch` payload to the listener's copy of its location.
fn apply(location: &mut Value, event: &str, payload: StreamPayload) {
    let base = tree::segments(&payload.path);
    match (event, payload.data) {
        ("patch", Value::Object(children)) => {
            for (rel, value) in children {
                let mut path = base.clone();
                path.extend(tree::segments(&rel));
                tree::set_at(location, &path, value);
            }
        }
        (_, data) => tree::set_at(location, &base, data),
    }
}

#[async_trait]
impl Backend for FirebaseBackend {
    async fn create_user(&self, email: &str, password: &str) -> AppResult<AuthData> {
        let body = self.identity("signUp", &PasswordRequest { email, password, return_secure_token: true }).await?;
        info!(email, "account created");
        let auth = Self::auth_data(&body, "password", None)?;
        // The new account's token authorizes writing its own user record.
        self.store_token(auth.id_token.clone());
        Ok(auth)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<AuthData> {
        let body = self.identity("signInWithPassword", &PasswordRequest { email, password, return_secure_token: true }).await?;
        let auth = Self::auth_data(&body, "password", None)?;
        self.store_token(auth.id_token.clone());
        Ok(auth)
    }

    async fn sign_in_with_idp(&self, provider: ClientProvider, access_token: &str) -> AppResult<AuthData> {
        let body = self.identity("signInWithIdp", &IdpRequest {
            post_body: format!("access_token={access_token}&providerId={}", provider.id()),
            request_uri: "http://localhost/".to_owned(),
            return_idp_credential: true,
            return_secure_token: true,
        }).await?;
        let auth = Self::auth_data(&body, provider.id(), Some(access_token.to_owned()))?;
        self.store_token(auth.id_token.clone());
        Ok(auth)
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.store_token(None);
        Ok(())
    }

    async fn get(&self, path: &str) -> AppResult<Option<Value>> {
        let response = self.http.get(self.location(path, None)?).send().await.map_err(|e| self.unavailable(e))?;
        let value: Value = self.check(path, response).await?.json().await?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    async fn set(&self, path: &str, value: Value) -> AppResult<()> {
        let response = self.http.put(self.location(path, None)?).json(&value).send().await.map_err(|e| self.unavailable(e))?;
        self.check(path, response).await?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> AppResult<String> {
        let response = self.http.post(self.location(path, None)?).json(&value).send().await.map_err(|e| self.unavailable(e))?;
        let body: Value = self.check(path, response).await?.json().await?;
        body.get_str_field("name")
    }

    async fn remove(&self, path: &str) -> AppResult<()> {
        let response = self.http.delete(self.location(path, None)?).send().await.map_err(|e| self.unavailable(e))?;
        self.check(path, response).await?;
        Ok(())
    }

    async fn listen(&self, query: Query) -> AppResult<Subscription> {
        let response = self.http
            .get(self.location(&query.path, Some(&query))?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        let response = self.check(&query.path, response).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = self.connected.clone();
        let pump = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut location = Value::Null;
            let mut window = Window::new(&query);
            let mut ready = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(path = %query.path, "stream failed: {e}");
                        connected.send_replace(false);
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    match event.event.as_str() {
                        "put" | "patch" => {
                            let payload: StreamPayload = match serde_json::from_str(&event.data) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(path = %query.path, "unreadable stream payload: {e}");
                                    continue;
                                }
                            };
                            apply(&mut location, &event.event, payload);
                            for child in window.update(Some(&location)) {
                                let _ = tx.send(child);
                            }
                            if !ready {
                                ready = true;
                                let _ = tx.send(ChildEvent::Ready);
                            }
                        }
                        "keep-alive" => {}
                        "cancel" | "auth_revoked" => {
                            warn!(path = %query.path, reason = %event.data, "listener stopped by backend");
                            return;
                        }
                        other => debug!(event = other, "ignoring stream event"),
                    }
                }
                if tx.is_closed() {
                    return;
                }
            }
        });
        Ok(Subscription::with_pump(rx, AbortOnDrop(pump)))
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    async fn on_disconnect_remove(&self, path: &str) -> AppResult<()> {
        self.on_disconnect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.to_owned());
        Ok(())
    }

    async fn go_offline(&self) -> AppResult<()> {
        let pending = std::mem::take(&mut *self.on_disconnect.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for path in pending {
            if let Err(e) = self.remove(&path).await {
                warn!(%path, "on-disconnect removal failed: {e}");
            }
        }
        self.connected.send_replace(false);
        Ok(())
    }

    async fn go_online(&self) -> AppResult<()> {
        let mut url = self.location("", None)?;
        url.query_pairs_mut().append_pair("shallow", "true");
        self.http.get(url).send().await.map_err(|e| self.unavailable(e))?;
        self.connected.send_replace(true);
        Ok(())
    }
}
