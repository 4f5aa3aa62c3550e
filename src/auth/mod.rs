mod clients;
mod lockin;
mod login;
mod popup;
mod social;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, instrument};

use crate::{
    backend::{FirebaseBackend, MemoryBackend, SharedBackend},
    db::AuthData,
    AppResult, Config,
};

pub use clients::{ClientProvider, Clients};
pub use popup::{Launcher, LogLauncher, LoopbackPopup, OAuthPopup};
pub use social::{FailureCleanup, SocialLogin};

/// Session handle bound to one backend endpoint. Cheap to clone; every
/// clone shares the same backend connection and auth state.
#[derive(Clone)]
pub struct Auth {
    backend: SharedBackend,
    state: Arc<watch::Sender<Option<AuthData>>>,
}

impl Auth {
    #[instrument(skip_all, fields(url = %config.database_url))]
    pub fn obtain(config: &Config) -> AppResult<Auth> {
        let backend: SharedBackend = if config.is_memory() {
            Arc::new(MemoryBackend::new())
        } else {
            Arc::new(FirebaseBackend::new(&config.database_url, config.api_key.clone())?)
        };
        info!("backend session ready");
        Ok(Auth::with_backend(backend))
    }

    pub fn with_backend(backend: SharedBackend) -> Auth {
        Auth {
            backend,
            state: Arc::new(watch::Sender::new(None)),
        }
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Creates a password account. Does not sign in.
    pub async fn create_user(&self, email: &str, password: &str) -> AppResult<AuthData> {
        self.backend.create_user(email, password).await
    }

    pub async fn auth_with_password(&self, email: &str, password: &str) -> AppResult<AuthData> {
        let auth = self.backend.sign_in_with_password(email, password).await?;
        self.state.send_replace(Some(auth.clone()));
        Ok(auth)
    }

    /// Exchanges an OAuth provider access token for a backend session.
    pub async fn auth_with_oauth_token(&self, provider: ClientProvider, access_token: &str) -> AppResult<AuthData> {
        let auth = self.backend.sign_in_with_idp(provider, access_token).await?;
        self.state.send_replace(Some(auth.clone()));
        Ok(auth)
    }

    pub async fn unauth(&self) -> AppResult<()> {
        self.backend.sign_out().await?;
        self.state.send_replace(None);
        Ok(())
    }

    pub fn auth_data(&self) -> Option<AuthData> {
        self.state.borrow().clone()
    }

    /// Follows sign-ins and sign-outs; a UI routes to its main view on `Some`.
    pub fn on_auth(&self) -> watch::Receiver<Option<AuthData>> {
        self.state.subscribe()
    }
}
