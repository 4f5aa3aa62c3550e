mod common;

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{http::StatusCode, routing::post, Form, Json, Router};
use chatfire::{
    auth::{ClientProvider, Clients, FailureCleanup, Launcher, LoopbackPopup, OAuthPopup},
    db::UserProfile,
    profiles::PROFILE_KEY,
    AppResult, ChatError, SocialLogin,
};
use common::{harness, within};
use serde_json::json;
use tokio::net::TcpListener;

/// Plays back canned popup outcomes, one per call.
struct ScriptedPopup {
    outcomes: Mutex<VecDeque<AppResult<String>>>,
}

impl ScriptedPopup {
    fn new(outcomes: Vec<AppResult<String>>) -> Arc<Self> {
        Arc::new(ScriptedPopup { outcomes: Mutex::new(outcomes.into()) })
    }
}

#[async_trait]
impl OAuthPopup for ScriptedPopup {
    async fn authorize(&self, _provider: ClientProvider, _scopes: &[String]) -> AppResult<String> {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::Auth("popup blocked".to_owned()).into()))
    }
}

fn remembered() -> String {
    serde_json::to_string(&UserProfile {
        id: "u1".to_owned(),
        email: "ann@example.com".to_owned(),
        username: "ann".to_owned(),
    })
    .unwrap()
}

#[tokio::test]
async fn successful_login_signs_in_with_the_provider_token() {
    let h = harness().await;
    let popup = ScriptedPopup::new(vec![Ok("fb-token".to_owned())]);
    let auth = SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup).login().await.unwrap();

    assert_eq!(auth.provider, "facebook.com");
    assert_eq!(auth.access_token.as_deref(), Some("fb-token"));
    assert_eq!(h.users.get_profile().await.map(|p| p.id), Some(auth.uid.clone()));
    assert_eq!(h.auth.auth_data(), Some(auth));
}

#[tokio::test]
async fn social_login_replaces_another_users_profile() {
    let h = harness().await;
    h.store.set_item(PROFILE_KEY, &remembered()).await.unwrap();

    let popup = ScriptedPopup::new(vec![Ok("fb-token".to_owned())]);
    let auth = SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup).login().await.unwrap();

    let profile = h.users.get_profile().await.unwrap();
    assert_eq!(profile.id, auth.uid);
    assert_ne!(profile.username, "ann");
}

#[tokio::test]
async fn failure_forgets_only_the_profile_by_default() {
    let h = harness().await;
    h.store.set_item(PROFILE_KEY, &remembered()).await.unwrap();
    h.store.set_item("theme", "dark").await.unwrap();

    let popup = ScriptedPopup::new(vec![Err(ChatError::Auth("user cancelled".to_owned()).into())]);
    let err = SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup).login().await.unwrap_err();

    assert_eq!(err.kind(), Some(&ChatError::Auth("user cancelled".to_owned())));
    assert_eq!(h.store.get_item(PROFILE_KEY).await.unwrap(), None);
    assert_eq!(h.store.get_item("theme").await.unwrap().as_deref(), Some("dark"));
    assert!(h.auth.auth_data().is_none());
}

#[tokio::test]
async fn clear_all_wipes_every_local_key() {
    let h = harness().await;
    h.store.set_item(PROFILE_KEY, &remembered()).await.unwrap();
    h.store.set_item("theme", "dark").await.unwrap();

    let popup = ScriptedPopup::new(vec![]);
    SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup)
        .with_cleanup(FailureCleanup::ClearAll)
        .login()
        .await
        .unwrap_err();

    assert!(h.store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn every_attempt_resolves() {
    let h = harness().await;
    let popup = ScriptedPopup::new(vec![
        Err(ChatError::Auth("user cancelled".to_owned()).into()),
        Err(ChatError::Auth("user cancelled".to_owned()).into()),
        Ok("fb-token".to_owned()),
    ]);
    let login = SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup);

    assert!(within(login.login()).await.is_err());
    assert!(within(login.login()).await.is_err());
    assert!(within(login.login()).await.is_ok());
}

#[tokio::test]
async fn empty_provider_tokens_are_rejected() {
    let h = harness().await;
    let popup = ScriptedPopup::new(vec![Ok(String::new())]);
    let err = SocialLogin::facebook(h.auth.clone(), h.store.clone(), popup).login().await.unwrap_err();
    assert!(matches!(err.kind(), Some(ChatError::Auth(_))));
}

/// Stands in for the user's browser: follows the authorize URL straight
/// back to the redirect, approving or denying.
struct Browser {
    approve: bool,
    seen: Mutex<Option<HashMap<String, String>>>,
}

impl Launcher for Browser {
    fn open(&self, url: &str) -> AppResult<()> {
        let url = reqwest::Url::parse(url)?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let mut callback = reqwest::Url::parse(&params["redirect_uri"])?;
        {
            let mut query = callback.query_pairs_mut();
            if self.approve {
                query.append_pair("code", "good-code");
            } else {
                query.append_pair("error", "access_denied").append_pair("error_description", "Permissions error");
            }
            query.append_pair("state", &params["state"]);
        }
        *self.seen.lock().unwrap() = Some(params);
        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
        Ok(())
    }
}

/// A provider token endpoint that only honors `good-code` with a PKCE verifier.
async fn token_endpoint() -> String {
    let app = Router::new().route(
        "/token",
        post(|Form(form): Form<HashMap<String, String>>| async move {
            let valid = form.get("code").map(String::as_str) == Some("good-code")
                && form.contains_key("code_verifier");
            if valid {
                (StatusCode::OK, Json(json!({ "access_token": "fb-access", "token_type": "bearer", "expires_in": 3600 })))
            } else {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}/token")
}

async fn loopback(browser: Arc<Browser>, timeout: Duration) -> LoopbackPopup {
    let clients = Clients::from_json(json!({
        "facebook": {
            "client_id": "fb-client",
            "client_secret": "fb-secret",
            "auth_uri": "http://127.0.0.1:9/dialog/oauth",
            "token_uri": token_endpoint().await,
        }
    }))
    .unwrap();
    LoopbackPopup::new(clients, "127.0.0.1:0".parse().unwrap(), timeout, browser)
}

#[tokio::test]
async fn loopback_popup_exchanges_the_code() {
    let h = harness().await;
    let browser = Arc::new(Browser { approve: true, seen: Mutex::new(None) });
    let popup = loopback(browser.clone(), Duration::from_secs(5)).await;

    let auth = within(SocialLogin::facebook(h.auth.clone(), h.store.clone(), Arc::new(popup)).login())
        .await
        .unwrap();
    assert_eq!(auth.access_token.as_deref(), Some("fb-access"));

    let seen = browser.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen["client_id"], "fb-client");
    assert_eq!(seen["scope"], "email public_profile");
    assert_eq!(seen["code_challenge_method"], "S256");
    assert!(seen["redirect_uri"].ends_with("/lockin/facebook"));
}

#[tokio::test]
async fn loopback_popup_reports_denied_consent() {
    let h = harness().await;
    let browser = Arc::new(Browser { approve: false, seen: Mutex::new(None) });
    let popup = loopback(browser, Duration::from_secs(5)).await;

    let err = within(SocialLogin::facebook(h.auth.clone(), h.store.clone(), Arc::new(popup)).login())
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), Some(ChatError::Auth(_))));
    assert!(h.auth.auth_data().is_none());
}

struct Ignored;

impl Launcher for Ignored {
    fn open(&self, _url: &str) -> AppResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn abandoned_popups_time_out() {
    let h = harness().await;
    let clients = Clients::from_json(json!({
        "facebook": { "client_id": "fb-client", "client_secret": "fb-secret" }
    }))
    .unwrap();
    let popup = LoopbackPopup::new(clients, "127.0.0.1:0".parse().unwrap(), Duration::from_millis(100), Arc::new(Ignored));

    let err = within(SocialLogin::facebook(h.auth.clone(), h.store.clone(), Arc::new(popup)).login())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(&ChatError::Auth("login popup timed out".to_owned())));
}

#[tokio::test]
async fn unconfigured_providers_fail_fast() {
    let h = harness().await;
    let popup = LoopbackPopup::new(Clients::default(), "127.0.0.1:0".parse().unwrap(), Duration::from_secs(5), Arc::new(Ignored));
    let result = within(SocialLogin::facebook(h.auth.clone(), h.store.clone(), Arc::new(popup)).login()).await;
    assert!(result.is_err());
}
