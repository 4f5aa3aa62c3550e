use std::{net::SocketAddr, sync::{Arc, Mutex}, time::Duration};

use async_trait::async_trait;
use axum::{routing::get, Router};
use oauth2::RedirectUrl;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, instrument, warn};

use crate::{AppResult, ChatError, Config};

use super::{clients::{ClientProvider, Clients}, lockin, login};

/// Runs a provider's consent screen and yields the provider access token.
#[async_trait]
pub trait OAuthPopup: Send + Sync {
    async fn authorize(&self, provider: ClientProvider, scopes: &[String]) -> AppResult<String>;
}

/// Shows the user an authorize URL, usually by opening a browser.
pub trait Launcher: Send + Sync {
    fn open(&self, url: &str) -> AppResult<()>;
}

/// Logs the URL for the user to open by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLauncher;

impl Launcher for LogLauncher {
    fn open(&self, url: &str) -> AppResult<()> {
        info!("open this URL to sign in: {url}");
        Ok(())
    }
}

/// The native popup: a one-shot loopback callback server the provider
/// redirects back to.
pub struct LoopbackPopup {
    clients: Clients,
    bind: SocketAddr,
    timeout: Duration,
    launcher: Arc<dyn Launcher>,
}

impl LoopbackPopup {
    pub fn new(clients: Clients, bind: SocketAddr, timeout: Duration, launcher: Arc<dyn Launcher>) -> Self {
        LoopbackPopup { clients, bind, timeout, launcher }
    }

    pub fn from_config(config: &Config, launcher: Arc<dyn Launcher>) -> AppResult<Self> {
        let clients = match &config.oauth_clients {
            Some(path) => Clients::from_file(path)?,
            None => Clients::default(),
        };
        Ok(Self::new(clients, config.oauth_bind, config.oauth_timeout, launcher))
    }
}

#[async_trait]
impl OAuthPopup for LoopbackPopup {
    #[instrument(skip(self, scopes))]
    async fn authorize(&self, provider: ClientProvider, scopes: &[String]) -> AppResult<String> {
        let listener = TcpListener::bind(self.bind).await?;
        let addr = listener.local_addr()?;
        let redirect_url = RedirectUrl::new(format!("http://{addr}/lockin/{}", provider.slug()))?;
        let client = self.clients.get_client(provider, redirect_url)?;
        let (authorize_url, pending) = login::authorize_url(client, scopes);

        let (tx, rx) = oneshot::channel();
        let state = lockin::LockinState {
            provider,
            flow: Arc::new(Mutex::new(Some((pending, tx)))),
        };
        let app = Router::new()
            .route("/lockin/{provider}", get(lockin::lockin))
            .with_state(state);
        // Dropping `_stop` lets the server finish the page it is serving, then exit.
        let (_stop, stop) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop.await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                warn!("callback server stopped: {e}");
            }
        });

        self.launcher.open(authorize_url.as_str())?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::Auth("login popup closed".to_owned()))?,
            Err(_) => Err(ChatError::Auth("login popup timed out".to_owned()))?,
        }
    }
}
