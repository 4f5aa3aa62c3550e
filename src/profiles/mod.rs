mod store;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    auth::Auth,
    backend::SharedBackend,
    db::{presence_path, user_path, AuthData, Credentials, NewUser, UserProfile},
    AbortOnDrop, AppResult, ChatError,
};

pub use store::LocalStore;

/// Local store key holding the signed-in user's profile as JSON.
pub const PROFILE_KEY: &str = "chat.current_user";

/// Accounts, sign-in, the locally remembered profile, and presence.
#[derive(Clone)]
pub struct UserService {
    auth: Auth,
    store: LocalStore,
}

impl UserService {
    pub fn new(auth: Auth, store: LocalStore) -> Self {
        UserService { auth, store }
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Creates the account, records the profile remotely and locally, then
    /// signs in. If sign-in fails the account still exists.
    #[instrument(skip_all, fields(email = %user.email))]
    pub async fn create_user(&self, user: &NewUser) -> AppResult<AuthData> {
        let created = match self.auth.create_user(&user.email, &user.password).await {
            Ok(created) => created,
            Err(e) => {
                warn!("sign up failed: {e}");
                return Err(e);
            }
        };

        let profile = UserProfile {
            id: created.uid,
            email: user.email.clone(),
            username: user.username.clone(),
        };
        self.auth
            .backend()
            .set(&user_path(&profile.id)?, serde_json::to_value(&profile)?)
            .await?;
        self.save_profile(&profile).await?;
        info!(uid = %profile.id, "account created");

        self.login(&Credentials::from(user)).await
    }

    #[instrument(skip_all, fields(email = %user.email))]
    pub async fn login(&self, user: &Credentials) -> AppResult<AuthData> {
        let auth = match self.auth.auth_with_password(&user.email, &user.password).await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("authentication failed: {e}");
                return Err(e);
            }
        };
        self.remember_signed_in(&auth).await?;
        info!(uid = %auth.uid, "signed in");
        Ok(auth)
    }

    /// Points the remembered profile at the account behind `auth`: its user
    /// record when one can be read, else the stored profile if it is already
    /// this account's, else one built from the sign-in.
    pub(crate) async fn remember_signed_in(&self, auth: &AuthData) -> AppResult<UserProfile> {
        let record = match self.auth.backend().get(&user_path(&auth.uid)?).await {
            Ok(record) => record,
            Err(e) => {
                warn!(uid = %auth.uid, "user record unavailable: {e}");
                None
            }
        };
        let profile = match record.map(serde_json::from_value::<UserProfile>) {
            Some(Ok(profile)) => UserProfile { id: auth.uid.clone(), ..profile },
            Some(Err(e)) => {
                warn!(uid = %auth.uid, "ignoring malformed user record: {e}");
                self.stored_or_built(auth).await
            }
            None => self.stored_or_built(auth).await,
        };
        self.save_profile(&profile).await?;
        Ok(profile)
    }

    async fn stored_or_built(&self, auth: &AuthData) -> UserProfile {
        match self.get_profile().await {
            Some(stored) if stored.id == auth.uid => stored,
            _ => UserProfile::from(auth),
        }
    }

    pub async fn logout(&self) -> AppResult<()> {
        self.auth.unauth().await?;
        self.store.remove_item(PROFILE_KEY).await
    }

    pub async fn save_profile(&self, profile: &UserProfile) -> AppResult<()> {
        self.store.set_item(PROFILE_KEY, &serde_json::to_string(profile)?).await
    }

    /// The remembered profile. Missing, unreadable, or corrupt entries all read as `None`.
    pub async fn get_profile(&self) -> Option<UserProfile> {
        let raw = match self.store.get_item(PROFILE_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("local store unavailable: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("ignoring corrupt stored profile: {e}");
                None
            }
        }
    }

    pub(crate) async fn require_profile(&self) -> AppResult<UserProfile> {
        Ok(self.get_profile().await.ok_or(ChatError::NotSignedIn)?)
    }

    /// Publishes `users/{id}/connected = true` whenever the backend reports a
    /// connection, registering its removal on disconnect first.
    #[instrument(skip_all)]
    pub async fn track_presence(&self) -> AppResult<PresenceTracker> {
        let profile = self.require_profile().await?;
        let path = presence_path(&profile.id)?;
        let backend = self.auth.backend().clone();
        let mut connected = backend.connected();

        let task = tokio::spawn(async move {
            let mut online = false;
            loop {
                let now = *connected.borrow_and_update();
                if now && !online {
                    match publish_presence(&backend, &path).await {
                        Ok(()) => info!(%path, "presence published"),
                        Err(e) => warn!(%path, "presence not published: {e}"),
                    }
                }
                online = now;
                if connected.changed().await.is_err() {
                    break;
                }
            }
        });
        Ok(PresenceTracker { _task: AbortOnDrop(task) })
    }
}

async fn publish_presence(backend: &SharedBackend, path: &str) -> AppResult<()> {
    backend.on_disconnect_remove(path).await?;
    backend.set(path, Value::Bool(true)).await
}

/// Keeps presence published until dropped.
#[derive(Debug)]
pub struct PresenceTracker {
    _task: AbortOnDrop,
}

impl PresenceTracker {
    pub fn stop(self) {}
}
