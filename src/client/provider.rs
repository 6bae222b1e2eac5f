//! Boundary to the external identity provider.
//!
//! The provider authenticates credentials, runs popup flows and owns the
//! persisted session. The rest of the crate only sees this trait and the
//! stream of `ProviderEvent`s it emits.

use crate::{AuthError, User};
use parking_lot::Mutex;
use secrecy::SecretString;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Boxed future returned by provider operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiving half of a provider subscription. Dropping it unsubscribes.
pub type ProviderSubscription = mpsc::UnboundedReceiver<ProviderEvent>;

/// Session change reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    SignedIn(User),
    SignedOut,
}

impl ProviderEvent {
    pub fn user(&self) -> Option<&User> {
        match self {
            ProviderEvent::SignedIn(user) => Some(user),
            ProviderEvent::SignedOut => None,
        }
    }
}

/// An identity provider SDK or service.
///
/// Implementations must emit one event to every new subscriber as soon as
/// any persisted session has been restored, and one event to every live
/// subscriber whenever the session changes afterwards. Events for a single
/// subscriber are delivered in order.
pub trait IdentityProvider: Send + Sync {
    /// Registers for session change notifications.
    fn subscribe(&self) -> ProviderSubscription;

    fn sign_in_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>>;

    /// Creates an account and signs it in.
    fn create_user_with_email_password<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<User, AuthError>>;

    /// Runs a popup OAuth flow with a federated provider (e.g. "google.com").
    fn sign_in_with_popup_provider<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> BoxFuture<'a, Result<User, AuthError>>;

    fn sign_out(&self) -> BoxFuture<'_, Result<(), AuthError>>;
}

/// Fan-out of provider events to live subscribers.
///
/// Closed subscriptions are pruned on the next broadcast.
#[derive(Default)]
pub struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber, optionally seeding it with the current state.
    pub fn add(&self, initial: Option<ProviderEvent>) -> ProviderSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(event) = initial {
            // Receiver is alive; this cannot fail.
            let _ = tx.send(event);
        }
        self.senders.lock().push(tx);
        rx
    }

    pub fn broadcast(&self, event: &ProviderEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!("Broadcast provider event to {} subscriber(s)", senders.len());
    }

    pub fn len(&self) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_event_user() {
        let event = ProviderEvent::SignedIn(User::new("u1"));
        assert_eq!(event.user().map(|u| u.id.as_str()), Some("u1"));
        assert!(ProviderEvent::SignedOut.user().is_none());
    }

    #[test]
    fn test_subscribers_seed_and_broadcast_in_order() {
        let subscribers = Subscribers::new();
        let mut rx = subscribers.add(Some(ProviderEvent::SignedOut));

        subscribers.broadcast(&ProviderEvent::SignedIn(User::new("u1")));
        subscribers.broadcast(&ProviderEvent::SignedOut);

        assert_eq!(rx.try_recv().ok(), Some(ProviderEvent::SignedOut));
        assert_eq!(
            rx.try_recv().ok(),
            Some(ProviderEvent::SignedIn(User::new("u1")))
        );
        assert_eq!(rx.try_recv().ok(), Some(ProviderEvent::SignedOut));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let subscribers = Subscribers::new();
        let keep = subscribers.add(None);
        let gone = subscribers.add(None);
        assert_eq!(subscribers.len(), 2);

        drop(gone);
        subscribers.broadcast(&ProviderEvent::SignedOut);
        assert_eq!(subscribers.len(), 1);

        drop(keep);
        assert!(subscribers.is_empty());
    }
}
