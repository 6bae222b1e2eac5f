//! Popup-based OAuth sign-in.
//!
//! Opening a popup is a host concern (browser window, system browser, web
//! view), so it sits behind `PopupLauncher`. The provider prepares a
//! `PopupRequest`, the launcher drives the federated provider's consent screen
//! and hands back either the resulting credential or a cancellation.

use crate::client::pkce;
use crate::client::provider::BoxFuture;

/// Everything a launcher needs to run one popup sign-in.
#[derive(Clone, Debug)]
pub struct PopupRequest {
    /// Federated provider, e.g. "google.com" or "github.com".
    pub provider_id: String,
    /// Where the federated provider sends the user back to.
    pub redirect_uri: String,
    /// CSRF state; the launcher must echo it back unchanged.
    pub state: String,
    /// PKCE verifier for launchers that exchange an authorization code.
    pub code_verifier: String,
    /// S256 challenge derived from `code_verifier`.
    pub code_challenge: String,
}

impl PopupRequest {
    pub fn new(provider_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        Self {
            provider_id: provider_id.into(),
            redirect_uri: redirect_uri.into(),
            state: pkce::generate_state(),
            code_verifier,
            code_challenge,
        }
    }

    /// Authorization URL for the federated provider's consent screen.
    pub fn authorization_url(&self, authorize_endpoint: &str, client_id: &str, scope: &str) -> String {
        pkce::build_authorization_url(
            authorize_endpoint,
            client_id,
            &self.redirect_uri,
            &self.code_challenge,
            &self.state,
            scope,
        )
    }
}

/// Credential returned by the federated provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdpCredential {
    /// State echoed back from the request.
    pub state: String,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

impl IdpCredential {
    /// Encodes the credential as the `postBody` of an IdP sign-in call.
    ///
    /// Returns `None` when the credential carries no token at all.
    pub fn post_body(&self, provider_id: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(id_token) = &self.id_token {
            parts.push(format!("id_token={}", urlencoding::encode(id_token)));
        }
        if let Some(access_token) = &self.access_token {
            parts.push(format!("access_token={}", urlencoding::encode(access_token)));
        }
        if parts.is_empty() {
            return None;
        }
        parts.push(format!("providerId={}", urlencoding::encode(provider_id)));
        Some(parts.join("&"))
    }
}

/// How a popup ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopupOutcome {
    Completed(IdpCredential),
    /// Closed by the user or refused by the federated provider.
    Cancelled,
}

/// Host hook that opens the popup and waits for it to finish.
pub trait PopupLauncher: Send + Sync {
    fn launch<'a>(&'a self, request: &'a PopupRequest) -> BoxFuture<'a, PopupOutcome>;
}
