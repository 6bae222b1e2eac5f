//! Session store: the single source of truth for "who is signed in".
//!
//! The store subscribes once to the identity provider and republishes every
//! provider notification as the current `Session` on a watch channel. UI code
//! holds a `SessionWatcher` to read it and calls the store's sign-in/sign-out
//! operations, which delegate to the provider.
//!
//! # Ordering
//!
//! `Session` is written only by the store's listener task, from provider
//! notifications, in delivery order. A notification identical to the current
//! value does not wake watchers. A watcher that falls behind sees the latest
//! value, never an older one.
//!
//! Provider operations are serialized: a second sign-in issued while the first
//! is still in flight waits for it to finish. Together with in-order delivery
//! this makes the last notification win when operations overlap.
//!
//! # Example
//!
//! ```rust,ignore
//! let provider = Arc::new(RestIdentityProvider::new(config, Arc::new(MemoryTokenStore::new())));
//! let store = SessionStore::new(provider, SessionOptions::default());
//!
//! let mut watcher = store.watch();
//! if let Some(session) = watcher.wait_until_known().await {
//!     tracing::info!("Signed in: {}", session.is_authenticated());
//! }
//!
//! store.sign_in(&SignInForm::new("a@b.com", "password")).await?;
//! ```

use crate::client::forms::{SignInForm, SignUpForm};
use crate::client::guard::{MountedGuard, Navigator, RouteGuard};
use crate::client::provider::{BoxFuture, IdentityProvider, ProviderSubscription};
use crate::{AuthError, Session, SessionOptions, User};
use parking_lot::Mutex;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Application-wide session state.
///
/// Cloning is cheap and every clone refers to the same store. The provider
/// subscription ends when `shutdown()` is called or the last clone is dropped.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    provider: Arc<dyn IdentityProvider>,
    options: SessionOptions,
    /// `None` once the store has been shut down.
    session_tx: Mutex<Option<Arc<watch::Sender<Session>>>>,
    session_rx: watch::Receiver<Session>,
    operation_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

impl SessionStore {
    /// Creates the store and subscribes to the provider.
    ///
    /// The session starts as `Session::Unknown` and changes once the provider
    /// delivers its first notification.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(provider: Arc<dyn IdentityProvider>, options: SessionOptions) -> Self {
        let (session_tx, session_rx) = watch::channel(Session::Unknown);
        let session_tx = Arc::new(session_tx);

        let events = provider.subscribe();
        let listener = tokio::spawn(run_listener(events, session_tx.clone()));
        tracing::debug!("Session store subscribed to identity provider");

        Self {
            inner: Arc::new(StoreInner {
                provider,
                options,
                session_tx: Mutex::new(Some(session_tx)),
                session_rx,
                operation_lock: tokio::sync::Mutex::new(()),
                listener: Mutex::new(Some(listener)),
            }),
        }
    }

    /// Current session value.
    pub fn session(&self) -> Session {
        self.inner.session_rx.borrow().clone()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Returns a new watcher positioned at the current session.
    ///
    /// Dropping the watcher unsubscribes it.
    pub fn watch(&self) -> SessionWatcher {
        let rx = match self.inner.session_tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => self.inner.session_rx.clone(),
        };
        SessionWatcher { rx }
    }

    /// Signs in with an email/password pair.
    ///
    /// On success the provider's notification moves the session to
    /// `Authenticated`. On failure the session is left as it was.
    pub async fn sign_in_with_credential(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<User, AuthError> {
        let provider = self.inner.provider.clone();
        self.run("sign_in_with_credential", || {
            Box::pin(async move { provider.sign_in_with_email_password(identifier, secret).await })
        })
        .await
    }

    /// Signs in through a federated provider popup (e.g. "google.com").
    pub async fn sign_in_with_provider(&self, provider_name: &str) -> Result<User, AuthError> {
        let provider = self.inner.provider.clone();
        self.run("sign_in_with_provider", || {
            Box::pin(async move { provider.sign_in_with_popup_provider(provider_name).await })
        })
        .await
    }

    /// Signs out.
    ///
    /// Signing out while already `Unauthenticated` succeeds and leaves the
    /// session untouched: the provider's repeated "signed out" notification
    /// equals the current value and is dropped.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let provider = self.inner.provider.clone();
        self.run("sign_out", || Box::pin(async move { provider.sign_out().await }))
            .await
    }

    /// Submits a login form.
    pub async fn sign_in(&self, form: &SignInForm) -> Result<User, AuthError> {
        self.sign_in_with_credential(&form.email, &form.password)
            .await
    }

    /// Submits a sign-up form.
    ///
    /// The password confirmation is checked first; on mismatch the provider is
    /// never contacted.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<User, AuthError> {
        form.validate()?;

        let provider = self.inner.provider.clone();
        let email = form.email.as_str();
        let password = &form.password;
        self.run("sign_up", || {
            Box::pin(async move { provider.create_user_with_email_password(email, password).await })
        })
        .await
    }

    /// Builds a route guard that redirects to the configured login path.
    pub fn route_guard(&self, navigator: Arc<dyn Navigator>) -> RouteGuard {
        RouteGuard::new(self.inner.options.login_path.clone(), navigator)
    }

    /// Builds a route guard and mounts it on this store's session.
    pub fn mount_guard(&self, navigator: Arc<dyn Navigator>) -> MountedGuard {
        self.route_guard(navigator).mount(self.watch())
    }

    /// Ends the provider subscription.
    ///
    /// The session keeps its last value; watchers see the channel close and
    /// further operations fail with `AuthError::StoreClosed`.
    pub fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        if self.inner.session_tx.lock().take().is_some() {
            tracing::debug!("Session store shut down, provider subscription released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.session_tx.lock().is_none()
    }

    /// Runs one provider operation under the sequencing lock and the timeout.
    async fn run<'a, T>(
        &'a self,
        operation: &'static str,
        call: impl FnOnce() -> BoxFuture<'a, Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        if self.is_closed() {
            return Err(AuthError::StoreClosed);
        }

        let _sequenced = self.inner.operation_lock.lock().await;
        tracing::trace!("Starting {}", operation);

        match tokio::time::timeout(self.inner.options.operation_timeout, call()).await {
            Ok(Ok(value)) => {
                tracing::debug!("{} succeeded", operation);
                Ok(value)
            }
            Ok(Err(err)) => {
                tracing::warn!("{} failed: {}", operation, err);
                Err(err)
            }
            Err(_) => {
                tracing::warn!(
                    "{} timed out after {:?}",
                    operation,
                    self.inner.options.operation_timeout
                );
                Err(AuthError::TimedOut)
            }
        }
    }
}

async fn run_listener(mut events: ProviderSubscription, session_tx: Arc<watch::Sender<Session>>) {
    while let Some(event) = events.recv().await {
        apply(&session_tx, Session::from(event));
    }
    tracing::debug!("Identity provider closed its subscription");
}

/// Publishes `next` unless it equals the current value.
fn apply(session_tx: &watch::Sender<Session>, next: Session) -> bool {
    session_tx.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        tracing::debug!(
            "Session changed: {} -> {}",
            describe(current),
            describe(&next)
        );
        *current = next;
        true
    })
}

fn describe(session: &Session) -> String {
    match session {
        Session::Unknown => "unknown".to_string(),
        Session::Authenticated(user) => format!("authenticated({})", user.id),
        Session::Unauthenticated => "unauthenticated".to_string(),
    }
}

/// Read access to the session for one consumer.
#[derive(Clone)]
pub struct SessionWatcher {
    rx: watch::Receiver<Session>,
}

impl SessionWatcher {
    /// Latest session value.
    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// Waits for the next change and returns the new value.
    ///
    /// Returns `None` once the store has shut down.
    pub async fn changed(&mut self) -> Option<Session> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// True if a value arrived that this watcher has not returned yet.
    ///
    /// Also false once the store has shut down.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Waits until the provider has reported at least once.
    ///
    /// Returns `None` if the store shuts down first.
    pub async fn wait_until_known(&mut self) -> Option<Session> {
        self.wait_for(Session::is_known).await
    }

    /// Waits until the session satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&Session) -> bool) -> Option<Session> {
        self.rx.wait_for(predicate).await.ok().map(|session| session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{InMemoryProvider, PopupScript};
    use crate::client::provider::ProviderEvent;
    use std::time::Duration;

    fn alice() -> User {
        User::new("u1").with_email("a@b.com", true)
    }

    fn provider_with_alice() -> Arc<InMemoryProvider> {
        let provider = InMemoryProvider::new();
        provider.register_account("a@b.com", "correct horse", alice());
        Arc::new(provider)
    }

    async fn known(store: &SessionStore) -> Session {
        store.watch().wait_until_known().await.unwrap()
    }

    /// Lets spawned and aborted tasks run to completion.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_starts_unknown_until_provider_reports() {
        let provider = Arc::new(InMemoryProvider::pending_restore());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        settle().await;

        assert_eq!(store.session(), Session::Unknown);

        provider.finish_restore();
        assert_eq!(known(&store).await, Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_restored_identity_becomes_authenticated() {
        let provider = Arc::new(InMemoryProvider::pending_restore());
        provider.set_persisted_user(Some(User::new("u1").with_email("a@b.com", false)));
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        let mut watcher = store.watch();

        provider.finish_restore();

        let session = watcher.changed().await.unwrap();
        assert_eq!(
            session,
            Session::Authenticated(User::new("u1").with_email("a@b.com", false))
        );
    }

    #[tokio::test]
    async fn test_session_tracks_latest_notification() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;

        let events = [
            ProviderEvent::SignedIn(User::new("u1")),
            ProviderEvent::SignedOut,
            ProviderEvent::SignedIn(User::new("u2")),
            ProviderEvent::SignedIn(User::new("u3")),
        ];
        for event in events {
            provider.emit(event);
        }

        let session = store
            .watch()
            .wait_for(|s| s.user().is_some_and(|u| u.id == "u3"))
            .await
            .unwrap();
        assert_eq!(session, Session::Authenticated(User::new("u3")));
    }

    #[tokio::test]
    async fn test_watcher_never_observes_older_values() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;
        let mut watcher = store.watch();

        let producer = {
            let provider = provider.clone();
            tokio::spawn(async move {
                for n in 1..=50u32 {
                    provider.emit(ProviderEvent::SignedIn(User::new(n.to_string())));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = 0u32;
        while let Some(session) = watcher.changed().await {
            let n: u32 = session.user().unwrap().id.parse().unwrap();
            assert!(n > last, "saw {} after {}", n, last);
            last = n;
            if n == 50 {
                break;
            }
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_with_credential_authenticates() {
        let provider = provider_with_alice();
        let store = SessionStore::new(provider, SessionOptions::default());
        assert_eq!(known(&store).await, Session::Unauthenticated);

        let secret = SecretString::from("correct horse");
        let user = store.sign_in_with_credential("a@b.com", &secret).await.unwrap();
        assert_eq!(user, alice());

        let session = store.watch().wait_for(Session::is_authenticated).await.unwrap();
        assert_eq!(session, Session::Authenticated(alice()));
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_session_unchanged() {
        let provider = provider_with_alice();
        let store = SessionStore::new(provider, SessionOptions::default());
        let before = known(&store).await;

        let secret = SecretString::from("wrong");
        let err = store.sign_in_with_credential("a@b.com", &secret).await.unwrap_err();

        assert_eq!(err, AuthError::InvalidCredential);
        settle().await;
        assert_eq!(store.session(), before);
    }

    #[tokio::test]
    async fn test_sign_up_mismatch_never_reaches_provider() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;

        let err = store
            .sign_up(&SignUpForm::new("a@b.com", "x", "y"))
            .await
            .unwrap_err();

        assert_eq!(err, AuthError::PasswordMismatch);
        assert_eq!(provider.provider_calls(), 0);
        assert_eq!(store.session(), Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_up_creates_account_and_signs_in() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;

        let user = store
            .sign_up(&SignUpForm::new("new@b.com", "hunter22", "hunter22"))
            .await
            .unwrap();
        assert_eq!(user.email.as_deref(), Some("new@b.com"));

        let session = store.watch().wait_for(Session::is_authenticated).await.unwrap();
        assert_eq!(session.user().map(|u| u.id.clone()), Some(user.id));
    }

    #[tokio::test]
    async fn test_sign_in_with_provider_denied() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.script_popup("google.com", PopupScript::Deny);
        let store = SessionStore::new(provider, SessionOptions::default());
        known(&store).await;

        let err = store.sign_in_with_provider("google.com").await.unwrap_err();
        assert_eq!(err, AuthError::ProviderDenied);
        assert_eq!(store.session(), Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_with_provider_allowed() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.script_popup("github.com", PopupScript::Allow(User::new("gh-7")));
        let store = SessionStore::new(provider, SessionOptions::default());
        known(&store).await;

        let user = store.sign_in_with_provider("github.com").await.unwrap();
        assert_eq!(user.id, "gh-7");
        store.watch().wait_for(Session::is_authenticated).await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_out_when_unauthenticated_is_noop() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;
        let watcher = store.watch();

        store.sign_out().await.unwrap();
        store.sign_out().await.unwrap();
        settle().await;

        assert_eq!(store.session(), Session::Unauthenticated);
        assert!(!watcher.has_changed());
    }

    #[tokio::test]
    async fn test_sign_out_moves_to_unauthenticated() {
        let provider = provider_with_alice();
        provider.set_persisted_user(Some(alice()));
        let store = SessionStore::new(provider, SessionOptions::default());
        assert_eq!(known(&store).await, Session::Authenticated(alice()));

        store.sign_out().await.unwrap();

        let session = store
            .watch()
            .wait_for(|s| *s == Session::Unauthenticated)
            .await
            .unwrap();
        assert_eq!(session, Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_network_failure_is_reported() {
        let provider = provider_with_alice();
        provider.set_offline(true);
        let store = SessionStore::new(provider, SessionOptions::default());
        known(&store).await;

        let secret = SecretString::from("correct horse");
        let err = store.sign_in_with_credential("a@b.com", &secret).await.unwrap_err();
        assert!(matches!(err, AuthError::NetworkUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out() {
        let provider = provider_with_alice();
        provider.set_latency(Duration::from_secs(3600));
        let options = SessionOptions::default().with_operation_timeout(Duration::from_secs(10));
        let store = SessionStore::new(provider, options);
        known(&store).await;

        let secret = SecretString::from("correct horse");
        let err = store.sign_in_with_credential("a@b.com", &secret).await.unwrap_err();

        assert_eq!(err, AuthError::TimedOut);
        assert_eq!(store.session(), Session::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_operations_are_sequenced() {
        let provider = provider_with_alice();
        provider.set_latency(Duration::from_millis(100));
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;

        let first = {
            let store = store.clone();
            tokio::spawn(async move {
                let secret = SecretString::from("correct horse");
                store.sign_in_with_credential("a@b.com", &secret).await
            })
        };
        tokio::task::yield_now().await;
        let second = {
            let store = store.clone();
            tokio::spawn(async move { store.sign_out().await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        settle().await;

        // sign_out ran after sign_in completed, so it wins.
        assert_eq!(provider.current_user(), None);
        assert_eq!(store.session(), Session::Unauthenticated);
        assert_eq!(provider.provider_calls(), 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_break_store() {
        let provider = provider_with_alice();
        provider.set_latency(Duration::from_millis(50));
        let store = SessionStore::new(provider, SessionOptions::default());
        known(&store).await;

        let abandoned = {
            let store = store.clone();
            tokio::spawn(async move {
                let secret = SecretString::from("correct horse");
                store.sign_in_with_credential("a@b.com", &secret).await
            })
        };
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        let secret = SecretString::from("correct horse");
        store.sign_in_with_credential("a@b.com", &secret).await.unwrap();
        store.watch().wait_for(Session::is_authenticated).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes_and_closes_watchers() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;
        let mut watcher = store.watch();

        store.shutdown();
        assert!(store.is_closed());
        assert_eq!(watcher.changed().await, None);

        settle().await;
        assert_eq!(provider.subscriber_count(), 0);

        let err = store.sign_in(&SignInForm::new("a@b.com", "x")).await.unwrap_err();
        assert_eq!(err, AuthError::StoreClosed);
        assert_eq!(store.session(), Session::Unauthenticated);
    }

    #[tokio::test]
    async fn test_dropping_store_releases_subscription() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        known(&store).await;
        assert_eq!(provider.subscriber_count(), 1);

        drop(store);
        settle().await;
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cloned_watcher_follows_store() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = SessionStore::new(provider.clone(), SessionOptions::default());
        let watcher = store.watch();
        let mut cloned = watcher.clone();
        drop(watcher);

        assert_eq!(cloned.wait_until_known().await, Some(Session::Unauthenticated));
        provider.emit(ProviderEvent::SignedIn(User::new("u1")));
        assert_eq!(
            cloned.changed().await,
            Some(Session::Authenticated(User::new("u1")))
        );
    }

    #[test]
    fn test_apply_skips_identical_values() {
        let (tx, mut rx) = watch::channel(Session::Unknown);
        assert!(apply(&tx, Session::Unauthenticated));
        rx.borrow_and_update();
        assert!(!apply(&tx, Session::Unauthenticated));
        assert!(!rx.has_changed().unwrap());
        assert!(apply(&tx, Session::Authenticated(User::new("u1"))));
    }
}
