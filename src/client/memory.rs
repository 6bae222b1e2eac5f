//! In-process identity provider.
//!
//! Keeps accounts in memory and behaves like a hosted provider from the
//! session store's point of view: it restores a "persisted" user, notifies
//! subscribers on every change and fails the way a real provider would
//! (wrong password, popup denied, network down, slow responses).
//!
//! Useful for tests, demos and offline development builds.

use crate::client::provider::{
    BoxFuture, IdentityProvider, ProviderEvent, ProviderSubscription, Subscribers,
};
use crate::{AuthError, User};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Minimum password length accepted by `create_user_with_email_password`.
const MIN_PASSWORD_LENGTH: usize = 6;

/// Scripted result of a popup sign-in for one federated provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopupScript {
    /// The user completes the popup and signs in as this user.
    Allow(User),
    /// The user closes the popup or the provider refuses.
    Deny,
}

struct Account {
    password: SecretString,
    user: User,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    popups: HashMap<String, PopupScript>,
    current: Option<User>,
    restored: bool,
    offline: bool,
    latency: Duration,
    next_id: u64,
}

/// Identity provider backed by process memory.
pub struct InMemoryProvider {
    state: Mutex<MemoryState>,
    subscribers: Subscribers,
    calls: AtomicUsize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// A provider that has already restored its (empty) persisted session.
    ///
    /// New subscribers are told the current state immediately.
    pub fn new() -> Self {
        let provider = Self::pending_restore();
        provider.state.lock().restored = true;
        provider
    }

    /// A provider still restoring its persisted session.
    ///
    /// Subscribers hear nothing until `finish_restore()` is called, which
    /// mirrors the start-up window where the session is still unknown.
    pub fn pending_restore() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            subscribers: Subscribers::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Completes the restore and notifies every subscriber.
    pub fn finish_restore(&self) {
        let mut state = self.state.lock();
        if state.restored {
            return;
        }
        state.restored = true;
        tracing::debug!(
            "Persisted session restored: {}",
            state.current.as_ref().map_or("none", |u| u.id.as_str())
        );
        self.subscribers.broadcast(&event_for(&state.current));
    }

    /// Sets the user that a restore brings back.
    ///
    /// After the restore has finished this behaves like `emit`.
    pub fn set_persisted_user(&self, user: Option<User>) {
        let mut state = self.state.lock();
        state.current = user;
        if state.restored {
            self.subscribers.broadcast(&event_for(&state.current));
        }
    }

    /// Registers an email/password account.
    pub fn register_account(&self, email: &str, password: &str, user: User) {
        self.state.lock().accounts.insert(
            normalize_email(email),
            Account {
                password: SecretString::from(password.to_string()),
                user,
            },
        );
    }

    /// Scripts the outcome of popups for `provider_id`.
    ///
    /// Unscripted providers deny.
    pub fn script_popup(&self, provider_id: &str, script: PopupScript) {
        self.state.lock().popups.insert(provider_id.to_string(), script);
    }

    /// Makes every operation fail with `AuthError::NetworkUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Delays every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Pushes a session change that did not come from this client, e.g. a
    /// revoked session or a sign-in in another tab.
    pub fn emit(&self, event: ProviderEvent) {
        let mut state = self.state.lock();
        state.current = event.user().cloned();
        if state.restored {
            self.subscribers.broadcast(&event);
        }
    }

    /// User the provider currently considers signed in.
    pub fn current_user(&self) -> Option<User> {
        self.state.lock().current.clone()
    }

    /// Number of sign-in, sign-up and sign-out calls received.
    pub fn provider_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Counts the call, waits out the latency and checks connectivity.
    async fn begin(&self, operation: &str) -> Result<(), AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.state.lock().offline {
            tracing::debug!("{} failed: provider offline", operation);
            return Err(AuthError::NetworkUnavailable(
                "identity provider unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn establish(&self, state: &mut MemoryState, user: User) -> User {
        state.current = Some(user.clone());
        if state.restored {
            self.subscribers.broadcast(&ProviderEvent::SignedIn(user.clone()));
        }
        user
    }
}

impl IdentityProvider for InMemoryProvider {
    fn subscribe(&self) -> ProviderSubscription {
        let state = self.state.lock();
        let initial = state.restored.then(|| event_for(&state.current));
        self.subscribers.add(initial)
    }

    fn sign_in_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            self.begin("sign_in_with_email_password").await?;

            let mut state = self.state.lock();
            let user = match state.accounts.get(&normalize_email(email)) {
                Some(account) if account.password.expose_secret() == password.expose_secret() => {
                    account.user.clone()
                }
                _ => return Err(AuthError::InvalidCredential),
            };
            Ok(self.establish(&mut state, user))
        })
    }

    fn create_user_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            self.begin("create_user_with_email_password").await?;

            if !email.contains('@') {
                return Err(AuthError::InvalidCredential);
            }
            if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
                return Err(AuthError::WeakPassword(format!(
                    "Password should be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }

            let mut state = self.state.lock();
            let key = normalize_email(email);
            if state.accounts.contains_key(&key) {
                return Err(AuthError::AccountExists);
            }

            state.next_id += 1;
            let user = User::new(format!("user-{}", state.next_id)).with_email(email, false);
            state.accounts.insert(
                key,
                Account {
                    password: SecretString::from(password.expose_secret().to_string()),
                    user: user.clone(),
                },
            );
            tracing::debug!("Created account {}", user.id);
            Ok(self.establish(&mut state, user))
        })
    }

    fn sign_in_with_popup_provider<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> BoxFuture<'a, Result<User, AuthError>> {
        Box::pin(async move {
            self.begin("sign_in_with_popup_provider").await?;

            let mut state = self.state.lock();
            match state.popups.get(provider_id).cloned() {
                Some(PopupScript::Allow(user)) => Ok(self.establish(&mut state, user)),
                Some(PopupScript::Deny) | None => {
                    tracing::debug!("Popup sign-in with {} denied", provider_id);
                    Err(AuthError::ProviderDenied)
                }
            }
        })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthError>> {
        Box::pin(async move {
            // Signing out is local; it works offline.
            self.calls.fetch_add(1, Ordering::SeqCst);
            let latency = self.state.lock().latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state.lock();
            state.current = None;
            if state.restored {
                self.subscribers.broadcast(&ProviderEvent::SignedOut);
            }
            Ok(())
        })
    }
}

fn event_for(user: &Option<User>) -> ProviderEvent {
    match user {
        Some(user) => ProviderEvent::SignedIn(user.clone()),
        None => ProviderEvent::SignedOut,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn test_subscribe_seeds_current_state() {
        let provider = InMemoryProvider::new();
        provider.set_persisted_user(Some(User::new("u1")));

        let mut rx = provider.subscribe();
        assert_eq!(rx.recv().await, Some(ProviderEvent::SignedIn(User::new("u1"))));
    }

    #[tokio::test]
    async fn test_pending_restore_holds_back_first_event() {
        let provider = InMemoryProvider::pending_restore();
        let mut rx = provider.subscribe();
        assert!(rx.try_recv().is_err());

        provider.finish_restore();
        assert_eq!(rx.recv().await, Some(ProviderEvent::SignedOut));

        // A second call is a no-op.
        provider.finish_restore();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sign_in_checks_password_and_notifies() {
        let provider = InMemoryProvider::new();
        provider.register_account("A@B.com", "pw123456", User::new("u1"));
        let mut rx = provider.subscribe();
        assert_eq!(rx.recv().await, Some(ProviderEvent::SignedOut));

        let err = provider
            .sign_in_with_email_password("a@b.com", &secret("nope"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
        assert!(rx.try_recv().is_err());

        let user = provider
            .sign_in_with_email_password(" a@b.com", &secret("pw123456"))
            .await
            .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(rx.recv().await, Some(ProviderEvent::SignedIn(User::new("u1"))));
        assert_eq!(provider.provider_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_email_is_invalid_credential() {
        let provider = InMemoryProvider::new();
        let err = provider
            .sign_in_with_email_password("ghost@b.com", &secret("whatever"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential);
    }

    #[tokio::test]
    async fn test_create_user_rules() {
        let provider = InMemoryProvider::new();

        let err = provider
            .create_user_with_email_password("a@b.com", &secret("123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));

        let user = provider
            .create_user_with_email_password("a@b.com", &secret("123456"))
            .await
            .unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email.as_deref(), Some("a@b.com"));
        assert!(!user.email_verified);
        assert_eq!(provider.current_user(), Some(user));

        let err = provider
            .create_user_with_email_password("A@b.com", &secret("123456"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AccountExists);
    }

    #[tokio::test]
    async fn test_offline_fails_sign_in_but_not_sign_out() {
        let provider = InMemoryProvider::new();
        provider.register_account("a@b.com", "pw123456", User::new("u1"));
        provider.set_persisted_user(Some(User::new("u1")));
        provider.set_offline(true);

        let err = provider
            .sign_in_with_email_password("a@b.com", &secret("pw123456"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NetworkUnavailable(_)));

        provider.sign_out().await.unwrap();
        assert_eq!(provider.current_user(), None);
    }

    #[tokio::test]
    async fn test_unscripted_popup_denies() {
        let provider = InMemoryProvider::new();
        let err = provider
            .sign_in_with_popup_provider("google.com")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::ProviderDenied);
    }

    #[tokio::test]
    async fn test_emit_updates_current_user() {
        let provider = InMemoryProvider::new();
        let mut rx = provider.subscribe();
        rx.recv().await;

        provider.emit(ProviderEvent::SignedIn(User::new("u9")));
        assert_eq!(provider.current_user(), Some(User::new("u9")));
        assert_eq!(rx.recv().await, Some(ProviderEvent::SignedIn(User::new("u9"))));
    }
}
