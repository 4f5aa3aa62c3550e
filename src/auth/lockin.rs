use std::sync::{Arc, Mutex};

use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, response::Html};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::{res, AppResult, ChatError};

use super::{clients::ClientProvider, login::Pending};

#[derive(Deserialize)]
pub(crate) struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub(crate) type TokenSender = oneshot::Sender<AppResult<String>>;

/// The single login a callback server is waiting on.
#[derive(Clone)]
pub(crate) struct LockinState {
    pub(crate) provider: ClientProvider,
    pub(crate) flow: Arc<Mutex<Option<(Pending, TokenSender)>>>,
}

#[debug_handler]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(query): Query<LockinQuery>,
    State(state): State<LockinState>,
) -> AppResult<(StatusCode, Html<String>)> {
    let flow = state.flow.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    let Some((pending, tx)) = flow else {
        return Err("no login in progress")?;
    };

    let result = exchange(provider, state.provider, query, pending).await;
    let response = match &result {
        Ok(_) => {
            info!(%provider, "provider accepted login");
            (StatusCode::OK, Html(res::lockin_page(true, "Signed in. You can close this window.")))
        }
        Err(e) => {
            warn!(%provider, "provider login failed: {e}");
            (StatusCode::BAD_REQUEST, Html(res::lockin_page(false, &e.to_string())))
        }
    };
    let _ = tx.send(result);
    Ok(response)
}

async fn exchange(
    provider: ClientProvider,
    expected: ClientProvider,
    LockinQuery { state, code, error, error_description }: LockinQuery,
    pending: Pending,
) -> AppResult<String> {
    if provider != expected {
        return Err(ChatError::Auth(format!("callback for {provider}, expected {expected}")))?;
    }
    if let Some(error) = error {
        return Err(ChatError::Auth(error_description.unwrap_or(error)))?;
    }

    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);
    if state.secret().as_str() != pending.csrf_state.as_str() {
        return Err(ChatError::Auth("csrf tokens don't match".to_owned()))?;
    }

    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = pending.client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
        .request_async(&http_client)
        .await
        .map_err(|e| ChatError::Auth(format!("token exchange failed: {e}")))?;

    Ok(token_result.access_token().secret().clone())
}
