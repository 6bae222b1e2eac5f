//! The application's belief about who, if anyone, is signed in.

use crate::User;
use crate::client::provider::ProviderEvent;

/// Current authentication state.
///
/// Starts as `Unknown` until the provider reports for the first time, then
/// moves between `Authenticated` and `Unauthenticated` as sign-in and
/// sign-out events arrive. It never returns to `Unknown`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Session {
    /// The provider has not reported yet (persisted session still restoring).
    #[default]
    Unknown,
    /// A user is signed in.
    Authenticated(User),
    /// The provider reported that nobody is signed in.
    Unauthenticated,
}

impl Session {
    /// False only while the provider has not reported yet.
    ///
    /// UI depending on the session should stay hidden until this is true,
    /// otherwise an already signed-in user briefly sees the login screen.
    pub fn is_known(&self) -> bool {
        !matches!(self, Session::Unknown)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }

    /// The signed-in user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            Session::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

impl From<ProviderEvent> for Session {
    fn from(event: ProviderEvent) -> Self {
        match event {
            ProviderEvent::SignedIn(user) => Session::Authenticated(user),
            ProviderEvent::SignedOut => Session::Unauthenticated,
        }
    }
}

impl From<Option<User>> for Session {
    fn from(user: Option<User>) -> Self {
        match user {
            Some(user) => Session::Authenticated(user),
            None => Session::Unauthenticated,
        }
    }
}
