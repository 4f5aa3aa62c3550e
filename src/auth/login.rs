use oauth2::{url::Url, CsrfToken, PkceCodeChallenge, Scope};

use super::clients::HappyClient;

/// What the callback needs to finish the flow started by [`authorize_url`].
pub(crate) struct Pending {
    pub(crate) client: HappyClient,
    pub(crate) csrf_state: String,
    pub(crate) pkce_verifier: String,
}

/// Builds the provider's authorize URL with a fresh PKCE challenge and CSRF state.
pub(crate) fn authorize_url(client: HappyClient, scopes: &[String]) -> (Url, Pending) {
    let (pkce_code_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (authorize_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().cloned().map(Scope::new))
        .set_pkce_challenge(pkce_code_challenge)
        .url();

    let pending = Pending {
        client,
        csrf_state: csrf_state.secret().clone(),
        pkce_verifier: pkce_verifier.secret().clone(),
    };
    (authorize_url, pending)
}
