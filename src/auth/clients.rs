use std::{fmt, path::Path};

use oauth2::{basic::BasicClient, AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RedirectUrl, TokenUrl};
use serde::Deserialize;
use serde_json::Value;

use crate::{AppResult, GetField};

pub(crate) type HappyClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientProvider {
    Facebook,
    Google,
    Github,
}

impl ClientProvider {
    /// Provider id as the identity service knows it.
    pub fn id(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Facebook => "facebook.com",
            Google => "google.com",
            Github => "github.com",
        }
    }

    /// Path segment of the loopback callback route.
    pub fn slug(&self) -> &'static str {
        use ClientProvider::*;
        match self {
            Facebook => "facebook",
            Google => "google",
            Github => "github",
        }
    }

    pub fn default_scopes(&self) -> &'static [&'static str] {
        use ClientProvider::*;
        match self {
            Facebook => &["email", "public_profile"],
            Google => &["openid", "email", "profile"],
            Github => &["read:user", "user:email"],
        }
    }

    fn endpoints(&self) -> (&'static str, &'static str) {
        use ClientProvider::*;
        match self {
            Facebook => (
                "https://www.facebook.com/v19.0/dialog/oauth",
                "https://graph.facebook.com/v19.0/oauth/access_token",
            ),
            Google => (
                "https://accounts.google.com/o/oauth2/auth",
                "https://oauth2.googleapis.com/token",
            ),
            Github => (
                "https://github.com/login/oauth/authorize",
                "https://github.com/login/oauth/access_token",
            ),
        }
    }
}

impl fmt::Display for ClientProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
struct ClientKeys {
    client_id: String,
    client_secret: Option<String>,
    auth_uri: String,
    token_uri: String,
}

impl ClientKeys {
    fn from_json(provider: ClientProvider, json: &Value) -> AppResult<Self> {
        let (auth_uri, token_uri) = provider.endpoints();
        Ok(ClientKeys {
            client_id: json.get_str_field("client_id")?,
            client_secret: json.get_str_field("client_secret").ok(),
            auth_uri: json.get_str_field("auth_uri").unwrap_or_else(|_| auth_uri.to_owned()),
            token_uri: json.get_str_field("token_uri").unwrap_or_else(|_| token_uri.to_owned()),
        })
    }
}

/// OAuth client registrations, one per provider, read from a JSON file of
/// the form `{"facebook": {"client_id": "...", "client_secret": "..."}}`.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    facebook: Option<ClientKeys>,
    google: Option<ClientKeys>,
    github: Option<ClientKeys>,
}

impl Clients {
    pub fn from_json(json: Value) -> AppResult<Clients> {
        let keys = |provider: ClientProvider| -> AppResult<Option<ClientKeys>> {
            match json.get(provider.slug()) {
                Some(entry) => Ok(Some(ClientKeys::from_json(provider, entry)?)),
                None => Ok(None),
            }
        };
        Ok(
            Clients {
                facebook: keys(ClientProvider::Facebook)?,
                google: keys(ClientProvider::Google)?,
                github: keys(ClientProvider::Github)?,
            }
        )
    }

    pub fn from_file(path: &Path) -> AppResult<Clients> {
        let json: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::from_json(json)
    }

    pub fn has(&self, provider: ClientProvider) -> bool {
        self.keys(provider).is_some()
    }

    fn keys(&self, provider: ClientProvider) -> Option<&ClientKeys> {
        use ClientProvider::*;
        match provider {
            Facebook => self.facebook.as_ref(),
            Google => self.google.as_ref(),
            Github => self.github.as_ref(),
        }
    }

    pub(crate) fn get_client(&self, provider: ClientProvider, redirect_url: RedirectUrl) -> AppResult<HappyClient> {
        let keys = self
            .keys(provider)
            .ok_or(format!("OAuth provider {provider} keys not supplied"))?;

        let mut client = BasicClient::new(ClientId::new(keys.client_id.clone()))
            .set_auth_uri(AuthUrl::new(keys.auth_uri.clone())?)
            .set_token_uri(TokenUrl::new(keys.token_uri.clone())?)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = &keys.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        Ok(client)
    }
}
