use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{db::AuthData, profiles::{LocalStore, UserService, PROFILE_KEY}, AppResult};

use super::{popup::OAuthPopup, Auth, ClientProvider};

/// What a failed social login wipes from the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureCleanup {
    /// Only the remembered profile.
    #[default]
    Profile,
    /// Every local key.
    ClearAll,
}

/// Login through a third-party provider's consent popup.
pub struct SocialLogin {
    auth: Auth,
    store: LocalStore,
    popup: Arc<dyn OAuthPopup>,
    provider: ClientProvider,
    scopes: Vec<String>,
    cleanup: FailureCleanup,
}

impl SocialLogin {
    pub fn new(auth: Auth, store: LocalStore, popup: Arc<dyn OAuthPopup>, provider: ClientProvider) -> Self {
        SocialLogin {
            auth,
            store,
            popup,
            provider,
            scopes: provider.default_scopes().iter().map(|s| s.to_string()).collect(),
            cleanup: FailureCleanup::default(),
        }
    }

    /// Facebook with `email` and `public_profile`.
    pub fn facebook(auth: Auth, store: LocalStore, popup: Arc<dyn OAuthPopup>) -> Self {
        Self::new(auth, store, popup, ClientProvider::Facebook)
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cleanup(mut self, cleanup: FailureCleanup) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Each call runs its own flow and resolves exactly once, success or failure.
    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn login(&self) -> AppResult<AuthData> {
        match self.attempt().await {
            Ok(auth) => {
                info!(uid = %auth.uid, "social login succeeded");
                Ok(auth)
            }
            Err(e) => {
                warn!("social login failed: {e}");
                let cleared = match self.cleanup {
                    FailureCleanup::Profile => self.store.remove_item(PROFILE_KEY).await,
                    FailureCleanup::ClearAll => self.store.clear().await,
                };
                if let Err(clear_err) = cleared {
                    warn!("local state not cleared: {clear_err}");
                }
                Err(e)
            }
        }
    }

    async fn attempt(&self) -> AppResult<AuthData> {
        let access_token = self.popup.authorize(self.provider, &self.scopes).await?;
        let auth = self.auth.auth_with_oauth_token(self.provider, &access_token).await?;
        UserService::new(self.auth.clone(), self.store.clone())
            .remember_signed_in(&auth)
            .await?;
        Ok(auth)
    }
}
