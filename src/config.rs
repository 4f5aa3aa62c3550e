use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{AppResult, ChatError};

pub const DEFAULT_LOCAL_STORE: &str = "sqlite://chat_local.db?mode=rwc";
pub const DEFAULT_OAUTH_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 120;

/// Everything the services need to reach the backend, read from the
/// environment (and a `.env` file when present).
#[derive(Debug, Clone)]
pub struct Config {
    /// `https://<db>.firebaseio.com` or `memory://<name>`.
    pub database_url: String,
    pub api_key: Option<String>,
    pub local_store: String,
    pub oauth_clients: Option<PathBuf>,
    pub oauth_bind: SocketAddr,
    pub oauth_timeout: Duration,
}

impl Config {
    pub fn new(database_url: impl Into<String>) -> Self {
        Config {
            database_url: database_url.into(),
            api_key: None,
            local_store: DEFAULT_LOCAL_STORE.to_owned(),
            oauth_clients: None,
            oauth_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            oauth_timeout: Duration::from_secs(DEFAULT_OAUTH_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let database_url = dotenv::var("CHAT_DATABASE_URL")
            .map_err(|_| ChatError::InvalidArgument("CHAT_DATABASE_URL is not set".to_owned()))?;
        let oauth_bind = dotenv::var("CHAT_OAUTH_BIND")
            .unwrap_or_else(|_| DEFAULT_OAUTH_BIND.to_owned())
            .parse()
            .map_err(|e| ChatError::InvalidArgument(format!("CHAT_OAUTH_BIND: {e}")))?;
        let oauth_timeout = match dotenv::var("CHAT_OAUTH_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse()
                    .map_err(|e| ChatError::InvalidArgument(format!("CHAT_OAUTH_TIMEOUT_SECS: {e}")))?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_OAUTH_TIMEOUT_SECS),
        };

        Ok(Config {
            database_url,
            api_key: dotenv::var("CHAT_API_KEY").ok(),
            local_store: dotenv::var("CHAT_LOCAL_STORE").unwrap_or_else(|_| DEFAULT_LOCAL_STORE.to_owned()),
            oauth_clients: dotenv::var("CHAT_OAUTH_CLIENTS").ok().map(PathBuf::from),
            oauth_bind,
            oauth_timeout,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.database_url.starts_with("memory://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::new("memory://test");
        assert!(config.is_memory());
        assert_eq!(config.oauth_bind, DEFAULT_OAUTH_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(config.oauth_timeout, Duration::from_secs(120));
        assert!(!Config::new("https://chat.firebaseio.com").is_memory());
    }
}
