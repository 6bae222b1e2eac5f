//! Authentication errors surfaced to calling UI code.

/// Failure of a sign-in, sign-up or sign-out operation.
///
/// A failed operation never changes the current `Session`; the caller is
/// expected to show `user_message()` next to the form and let the user
/// re-submit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Email/password pair was rejected.
    #[error("invalid credential")]
    InvalidCredential,

    /// Password and confirmation disagree; detected before any provider call.
    #[error("passwords do not match")]
    PasswordMismatch,

    /// The user cancelled the popup or the provider refused the sign-in.
    #[error("sign-in denied by provider")]
    ProviderDenied,

    /// The identity provider could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Sign-up for an email that already has an account.
    #[error("an account already exists for this email")]
    AccountExists,

    /// Password rejected by the provider's password policy.
    #[error("weak password: {0}")]
    WeakPassword(String),

    /// The provider did not answer within the configured timeout.
    #[error("operation timed out")]
    TimedOut,

    /// The session store has been shut down.
    #[error("session store is closed")]
    StoreClosed,

    /// Anything the provider reported that does not fit the kinds above.
    #[error("authentication failed: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Text suitable for showing inline next to a login or sign-up form.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "Incorrect email or password.",
            AuthError::PasswordMismatch => "Passwords do not match.",
            AuthError::ProviderDenied => "Sign-in was cancelled or denied.",
            AuthError::NetworkUnavailable(_) => {
                "Unable to reach the sign-in service. Check your connection and try again."
            }
            AuthError::AccountExists => "An account with this email already exists.",
            AuthError::WeakPassword(_) => "Please choose a stronger password.",
            AuthError::TimedOut => "The sign-in service took too long to respond. Please try again.",
            AuthError::StoreClosed | AuthError::Unknown(_) => {
                "Something went wrong. Please try again."
            }
        }
    }

    /// True when re-submitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::NetworkUnavailable(_) | AuthError::TimedOut)
    }
}

#[cfg(feature = "rest")]
impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AuthError::NetworkUnavailable(err.to_string())
        } else {
            AuthError::Unknown(err.to_string())
        }
    }
}
