//! Identity provider backed by the Identity Toolkit REST API.
//!
//! Sign-in, sign-up and federated (popup) sign-in are `accounts:*` calls on
//! the configured identity endpoint; ID tokens are refreshed through the
//! secure token endpoint. The session is mirrored into a `TokenStore` and
//! restored on the first subscription, refreshing an expired ID token when a
//! refresh token is available.
//!
//! # Example
//!
//! ```rust,ignore
//! use authgate::client::{FileTokenStore, RestIdentityProvider};
//!
//! let provider = RestIdentityProvider::builder(IdentityConfig::from_env_or_panic())
//!     .token_store(Arc::new(FileTokenStore::new("session.json")))
//!     .popup_launcher(Arc::new(MyBrowserPopup))
//!     .build();
//! let store = SessionStore::new(Arc::new(provider), SessionOptions::default());
//! ```

use crate::client::jwt::decode_id_token_to_user;
use crate::client::popup::{PopupLauncher, PopupOutcome, PopupRequest};
use crate::client::provider::{
    BoxFuture, IdentityProvider, ProviderEvent, ProviderSubscription, Subscribers,
};
use crate::client::token_storage::{MemoryTokenStore, StoredTokens, TokenStore};
use crate::{AuthError, IdentityConfig, User};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

/// ID token lifetime assumed when the provider omits `expiresIn`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Response of `accounts:signInWithPassword`, `accounts:signUp` and
/// `accounts:signInWithIdp`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    id_token: String,
    refresh_token: Option<String>,
    expires_in: Option<String>,
    email: Option<String>,
    email_verified: Option<bool>,
    display_name: Option<String>,
    photo_url: Option<String>,
    /// IdP sign-in only: the email belongs to an account with another method.
    need_confirmation: Option<bool>,
    /// IdP sign-in only: soft failure reported with a 200 status.
    error_message: Option<String>,
}

/// Response of the secure token refresh call.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum RestoreState {
    #[default]
    NotStarted,
    Running,
    Done,
}

/// Result of reading the persisted session at start-up.
enum Restored {
    Missing,
    /// Usable as stored.
    Kept(StoredTokens),
    /// Refreshed; storage needs the new tokens.
    Refreshed(StoredTokens),
    /// Expired for good; storage needs clearing.
    Rejected,
}

#[derive(Default)]
struct RestState {
    restore: RestoreState,
    /// Bumped on every sign-in and sign-out; lets slow restores and refreshes
    /// detect that they were overtaken.
    generation: u64,
    tokens: Option<StoredTokens>,
}

struct RestShared {
    config: IdentityConfig,
    http: reqwest::Client,
    storage: Arc<dyn TokenStore>,
    popup: Option<Arc<dyn PopupLauncher>>,
    state: Mutex<RestState>,
    subscribers: Subscribers,
}

/// Builder for `RestIdentityProvider`.
pub struct RestProviderBuilder {
    config: IdentityConfig,
    http: Option<reqwest::Client>,
    storage: Option<Arc<dyn TokenStore>>,
    popup: Option<Arc<dyn PopupLauncher>>,
}

impl RestProviderBuilder {
    /// Persists the session here. Defaults to `MemoryTokenStore`.
    pub fn token_store(mut self, storage: Arc<dyn TokenStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Enables popup sign-in. Without a launcher every popup sign-in is denied.
    pub fn popup_launcher(mut self, launcher: Arc<dyn PopupLauncher>) -> Self {
        self.popup = Some(launcher);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> RestIdentityProvider {
        RestIdentityProvider {
            shared: Arc::new(RestShared {
                config: self.config,
                http: self.http.unwrap_or_default(),
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryTokenStore::new())),
                popup: self.popup,
                state: Mutex::new(RestState::default()),
                subscribers: Subscribers::new(),
            }),
        }
    }
}

/// Identity provider speaking the Identity Toolkit REST protocol.
pub struct RestIdentityProvider {
    shared: Arc<RestShared>,
}

impl RestIdentityProvider {
    pub fn new(config: IdentityConfig, storage: Arc<dyn TokenStore>) -> Self {
        Self::builder(config).token_store(storage).build()
    }

    pub fn builder(config: IdentityConfig) -> RestProviderBuilder {
        RestProviderBuilder {
            config,
            http: None,
            storage: None,
            popup: None,
        }
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.shared.config
    }

    /// Signed-in user as last recorded by this provider.
    pub fn current_user(&self) -> Option<User> {
        self.shared.state.lock().tokens.as_ref().map(|t| t.user.clone())
    }

    /// Returns a usable ID token for calling backends, refreshing it first
    /// if it has expired.
    ///
    /// Returns `Ok(None)` without a session. If the provider rejects the
    /// refresh token (revoked, user disabled) the session is dropped and
    /// subscribers are told the user signed out.
    pub async fn id_token(&self) -> Result<Option<String>, AuthError> {
        let (tokens, generation) = {
            let state = self.shared.state.lock();
            (state.tokens.clone(), state.generation)
        };
        let Some(tokens) = tokens else {
            return Ok(None);
        };
        if tokens.is_valid() {
            return Ok(Some(tokens.id_token));
        }

        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            self.shared.drop_session(generation, "ID token expired and no refresh token");
            return Ok(None);
        };

        match self.shared.refresh(refresh_token, &tokens.user).await {
            Ok(refreshed) => {
                let id_token = refreshed.id_token.clone();
                self.shared.replace_tokens(generation, refreshed);
                Ok(Some(id_token))
            }
            Err(AuthError::InvalidCredential) => {
                self.shared.drop_session(generation, "refresh token rejected");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl RestShared {
    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, AuthError> {
        let response = self.http.post(url).json(body).send().await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AuthError> {
        let status = response.status();
        tracing::trace!("Identity provider responded with {}", status);

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                tracing::error!("Failed to parse provider response: {}", e);
                AuthError::Unknown(format!("unexpected response from identity provider: {}", e))
            });
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => {
                tracing::debug!("Identity provider rejected request: {}", body.error.message);
                Err(map_provider_message(&body.error.message))
            }
            Err(_) if status.is_server_error() => {
                tracing::warn!("Identity provider unavailable: {}", status);
                Err(AuthError::NetworkUnavailable(format!(
                    "identity provider returned {}",
                    status
                )))
            }
            Err(_) => Err(AuthError::Unknown(format!(
                "identity provider returned {}",
                status
            ))),
        }
    }

    /// Exchanges a refresh token for a new ID token.
    async fn refresh(&self, refresh_token: &str, previous: &User) -> Result<StoredTokens, AuthError> {
        tracing::trace!("Refreshing ID token");
        let response = self
            .http
            .post(self.config.refresh_url())
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;
        let refreshed: RefreshResponse = Self::read(response).await?;

        let user = match decode_id_token_to_user(&refreshed.id_token) {
            Ok(user) => merge_profile(user, previous),
            Err(err) => {
                tracing::warn!("Refreshed ID token unreadable, keeping previous profile: {}", err);
                previous.clone()
            }
        };

        Ok(StoredTokens::new(
            refreshed.id_token,
            Some(refreshed.refresh_token),
            parse_expires_in(Some(&refreshed.expires_in)),
            user,
        ))
    }

    /// Records a fresh sign-in and tells subscribers.
    fn establish(&self, response: AccountResponse) -> Result<User, AuthError> {
        if response.need_confirmation == Some(true) {
            return Err(AuthError::AccountExists);
        }
        if let Some(message) = response.error_message.as_deref() {
            return Err(map_provider_message(message));
        }

        let user = user_from_response(&response);
        let tokens = StoredTokens::new(
            response.id_token,
            response.refresh_token,
            parse_expires_in(response.expires_in.as_deref()),
            user.clone(),
        );
        if let Err(err) = self.storage.save(&tokens) {
            tracing::warn!("Signed in but could not persist session: {}", err);
        }

        let mut state = self.state.lock();
        state.generation += 1;
        state.tokens = Some(tokens);
        if state.restore == RestoreState::Done {
            self.subscribers.broadcast(&ProviderEvent::SignedIn(user.clone()));
        }
        tracing::debug!("Signed in as {}", user.id);
        Ok(user)
    }

    /// Stores refreshed tokens unless a sign-in or sign-out happened meanwhile.
    fn replace_tokens(&self, generation: u64, tokens: StoredTokens) {
        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::trace!("Session changed during refresh, discarding refreshed tokens");
            return;
        }
        if let Err(err) = self.storage.save(&tokens) {
            tracing::warn!("Could not persist refreshed tokens: {}", err);
        }

        let profile_changed = state.tokens.as_ref().map(|t| &t.user) != Some(&tokens.user);
        let user = tokens.user.clone();
        state.tokens = Some(tokens);
        if profile_changed && state.restore == RestoreState::Done {
            self.subscribers.broadcast(&ProviderEvent::SignedIn(user));
        }
    }

    /// Forgets the session unless it was replaced meanwhile.
    fn drop_session(&self, generation: u64, reason: &str) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        tracing::info!("Session ended: {}", reason);
        if let Err(err) = self.storage.clear() {
            tracing::warn!("Could not clear persisted session: {}", err);
        }
        state.generation += 1;
        state.tokens = None;
        if state.restore == RestoreState::Done {
            self.subscribers.broadcast(&ProviderEvent::SignedOut);
        }
    }

    /// Brings back the persisted session, then reports it to subscribers.
    ///
    /// Storage is only written if no sign-in or sign-out happened while the
    /// restore was running.
    async fn restore(self: Arc<Self>) {
        let generation = self.state.lock().generation;
        let outcome = self.load_persisted().await;

        let mut state = self.state.lock();
        if state.generation == generation {
            state.tokens = match outcome {
                Restored::Missing => None,
                Restored::Kept(tokens) => Some(tokens),
                Restored::Refreshed(tokens) => {
                    if let Err(err) = self.storage.save(&tokens) {
                        tracing::warn!("Could not persist refreshed tokens: {}", err);
                    }
                    Some(tokens)
                }
                Restored::Rejected => {
                    self.clear_storage();
                    None
                }
            };
        } else {
            tracing::trace!("Session changed during restore, keeping the newer one");
        }
        state.restore = RestoreState::Done;

        let event = match &state.tokens {
            Some(tokens) => ProviderEvent::SignedIn(tokens.user.clone()),
            None => ProviderEvent::SignedOut,
        };
        tracing::debug!("Persisted session restored: {:?}", event.user().map(|u| &u.id));
        self.subscribers.broadcast(&event);
    }

    /// Reads the persisted session and refreshes it if needed. Never writes
    /// to storage.
    async fn load_persisted(&self) -> Restored {
        let stored = match self.storage.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::trace!("No persisted session");
                return Restored::Missing;
            }
            Err(err) => {
                tracing::warn!("Could not read persisted session: {}", err);
                return Restored::Missing;
            }
        };

        if stored.is_valid() {
            tracing::trace!("Persisted ID token still valid");
            return Restored::Kept(stored);
        }

        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            tracing::debug!("Persisted ID token expired and cannot be refreshed");
            return Restored::Rejected;
        };

        match self.refresh(refresh_token, &stored.user).await {
            Ok(refreshed) => Restored::Refreshed(refreshed),
            Err(err) if err.is_retryable() => {
                // Offline start: keep the user signed in, refresh on next use.
                tracing::warn!("Could not refresh persisted session, keeping it: {}", err);
                Restored::Kept(stored)
            }
            Err(err) => {
                tracing::info!("Persisted session rejected by provider: {}", err);
                Restored::Rejected
            }
        }
    }

    fn clear_storage(&self) {
        if let Err(err) = self.storage.clear() {
            tracing::warn!("Could not clear persisted session: {}", err);
        }
    }
}

impl IdentityProvider for RestIdentityProvider {
    fn subscribe(&self) -> ProviderSubscription {
        let mut state = self.shared.state.lock();
        match state.restore {
            RestoreState::Done => {
                let initial = match &state.tokens {
                    Some(tokens) => ProviderEvent::SignedIn(tokens.user.clone()),
                    None => ProviderEvent::SignedOut,
                };
                self.shared.subscribers.add(Some(initial))
            }
            RestoreState::Running => self.shared.subscribers.add(None),
            RestoreState::NotStarted => {
                state.restore = RestoreState::Running;
                let rx = self.shared.subscribers.add(None);
                drop(state);
                tokio::spawn(self.shared.clone().restore());
                rx
            }
        }
    }

    fn sign_in_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            let body = json!({
                "email": email,
                "password": password.expose_secret(),
                "returnSecureToken": true,
            });
            let url = self.shared.config.accounts_url("signInWithPassword");
            let response: AccountResponse = self.shared.post_json(&url, &body).await?;
            self.shared.establish(response)
        })
    }

    fn create_user_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            let body = json!({
                "email": email,
                "password": password.expose_secret(),
                "returnSecureToken": true,
            });
            let url = self.shared.config.accounts_url("signUp");
            let response: AccountResponse = self.shared.post_json(&url, &body).await?;
            self.shared.establish(response)
        })
    }

    fn sign_in_with_popup_provider<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            let Some(launcher) = self.shared.popup.clone() else {
                tracing::warn!("Popup sign-in with {} requested but no launcher configured", provider_id);
                return Err(AuthError::ProviderDenied);
            };

            let request = PopupRequest::new(provider_id, self.shared.config.popup_redirect_uri());
            let credential = match launcher.launch(&request).await {
                PopupOutcome::Completed(credential) => credential,
                PopupOutcome::Cancelled => {
                    tracing::debug!("Popup sign-in with {} cancelled", provider_id);
                    return Err(AuthError::ProviderDenied);
                }
            };

            if credential.state != request.state {
                tracing::error!("Popup state mismatch for {}, rejecting credential", provider_id);
                return Err(AuthError::ProviderDenied);
            }
            let Some(post_body) = credential.post_body(provider_id) else {
                tracing::warn!("Popup for {} returned no token", provider_id);
                return Err(AuthError::ProviderDenied);
            };

            let body = json!({
                "postBody": post_body,
                "requestUri": request.redirect_uri,
                "returnIdpCredential": true,
                "returnSecureToken": true,
            });
            let url = self.shared.config.accounts_url("signInWithIdp");
            let response: AccountResponse = self.shared.post_json(&url, &body).await?;
            self.shared.establish(response)
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthError>> {
        Box::pin(async move {
            self.shared.clear_storage();

            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.tokens = None;
            if state.restore == RestoreState::Done {
                self.shared.subscribers.broadcast(&ProviderEvent::SignedOut);
            }
            tracing::debug!("Signed out");
            Ok(())
        })
    }
}

/// Maps an Identity Toolkit error message onto `AuthError`.
///
/// Messages look like `"INVALID_PASSWORD"` or
/// `"WEAK_PASSWORD : Password should be at least 6 characters"`.
fn map_provider_message(message: &str) -> AuthError {
    let (code, detail) = match message.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (message.trim(), None),
    };

    match code {
        "EMAIL_NOT_FOUND"
        | "INVALID_PASSWORD"
        | "INVALID_LOGIN_CREDENTIALS"
        | "INVALID_EMAIL"
        | "MISSING_EMAIL"
        | "MISSING_PASSWORD"
        | "USER_DISABLED"
        | "USER_NOT_FOUND"
        | "INVALID_REFRESH_TOKEN"
        | "TOKEN_EXPIRED"
        | "INVALID_ID_TOKEN" => AuthError::InvalidCredential,
        "EMAIL_EXISTS" | "FEDERATED_USER_ID_ALREADY_LINKED" => AuthError::AccountExists,
        "WEAK_PASSWORD" => {
            AuthError::WeakPassword(detail.unwrap_or("password rejected").to_string())
        }
        "INVALID_IDP_RESPONSE" | "OPERATION_NOT_ALLOWED" | "INVALID_PROVIDER_ID" => {
            AuthError::ProviderDenied
        }
        _ => AuthError::Unknown(message.to_string()),
    }
}

/// Identity from the ID token, topped up with the response's profile fields.
fn user_from_response(response: &AccountResponse) -> User {
    let fallback = User {
        id: response.local_id.clone(),
        email: response.email.clone(),
        email_verified: response.email_verified.unwrap_or(false),
        name: response.display_name.clone(),
        picture: response.photo_url.clone(),
    };

    match decode_id_token_to_user(&response.id_token) {
        Ok(user) => merge_profile(user, &fallback),
        Err(err) => {
            tracing::warn!("ID token unreadable, using response profile: {}", err);
            fallback
        }
    }
}

fn merge_profile(mut user: User, known: &User) -> User {
    if user.email.is_none() {
        user.email = known.email.clone();
        user.email_verified = known.email_verified;
    }
    if user.name.is_none() {
        user.name = known.name.clone();
    }
    if user.picture.is_none() {
        user.picture = known.picture.clone();
    }
    user
}

fn parse_expires_in(expires_in: Option<&str>) -> u64 {
    expires_in
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
}
