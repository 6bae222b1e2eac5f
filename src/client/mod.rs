//! Session management on top of an identity provider.
//!
//! This module provides:
//! - `SessionStore`: the single owner of the current `Session`, fed by
//!   provider notifications
//! - `SessionWatcher`: change notifications for UI layers
//! - `RouteGuard`: gating of protected views with redirect to login
//! - Sign-in and sign-up forms
//! - The `IdentityProvider` boundary with an in-memory implementation and,
//!   behind the `rest` feature, an Identity Toolkit REST implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use authgate::client::{InMemoryProvider, SessionStore};
//!
//! let store = SessionStore::new(Arc::new(InMemoryProvider::new()), SessionOptions::default());
//! let guard = store.mount_guard(Arc::new(|path: &str| router.push(path)));
//!
//! store.sign_in(&SignInForm::new(email, password)).await?;
//! ```

pub mod forms;
pub mod guard;
pub mod jwt;
pub mod memory;
pub mod pkce;
pub mod popup;
pub mod provider;
#[cfg(feature = "rest")]
pub mod rest;
pub mod store;
pub mod token_storage;

// Re-export commonly used types
pub use forms::{SignInForm, SignUpForm};
pub use guard::{GuardDecision, GuardState, MountedGuard, Navigator, RouteGuard};
pub use jwt::{IdTokenClaims, decode_id_token, decode_id_token_to_user};
pub use memory::{InMemoryProvider, PopupScript};
pub use popup::{IdpCredential, PopupLauncher, PopupOutcome, PopupRequest};
pub use provider::{BoxFuture, IdentityProvider, ProviderEvent, ProviderSubscription};
#[cfg(feature = "rest")]
pub use rest::{RestIdentityProvider, RestProviderBuilder};
pub use store::{SessionStore, SessionWatcher};
pub use token_storage::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};
