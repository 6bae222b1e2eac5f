//! # authgate
//!
//! Client-side authentication session management over an external identity
//! provider.
//!
//! ## Overview
//!
//! The crate keeps one authoritative answer to "who is signed in right now"
//! and lets application views react to it:
//!
//! - **`Session`** - `Unknown` until the provider has restored any persisted
//!   session, then `Authenticated(User)` or `Unauthenticated`
//! - **`SessionStore`** - owns the session, updates it only from provider
//!   notifications, and exposes sign-in, sign-up and sign-out
//! - **`RouteGuard`** - shows a placeholder while the session is unknown,
//!   renders protected content for a signed-in user and redirects everyone
//!   else to the login route
//! - **`IdentityProvider`** - the boundary to the provider SDK or service
//!
//! ## Features
//!
//! ### `rest` (default)
//!
//! Enables `client::rest::RestIdentityProvider`, which talks to the Identity
//! Toolkit REST API, persists the session through a `TokenStore` and supports
//! popup sign-in via a host supplied `PopupLauncher`.
//!
//! **Dependencies**: `reqwest`
//!
//! Without it, bring your own `IdentityProvider` or use
//! `client::InMemoryProvider`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authgate::client::{FileTokenStore, RestIdentityProvider, SignInForm};
//! use authgate::{IdentityConfig, Session, SessionOptions, SessionStore};
//!
//! let provider = RestIdentityProvider::new(
//!     IdentityConfig::from_env_or_panic(),
//!     Arc::new(FileTokenStore::new("session.json")),
//! );
//! let store = SessionStore::new(Arc::new(provider), SessionOptions::default());
//!
//! // Redirects to "/login" whenever the session turns unauthenticated.
//! let guard = store.mount_guard(Arc::new(|path: &str| router.push(path)));
//!
//! let mut watcher = store.watch();
//! if let Some(Session::Unauthenticated) = watcher.wait_until_known().await {
//!     match store.sign_in(&SignInForm::new(email, password)).await {
//!         Ok(user) => tracing::info!("Welcome, {}", user.display_name()),
//!         Err(err) => show_error(err.user_message()),
//!     }
//! }
//! ```
//!
//! ## Configuration
//!
//! `IdentityConfig::from_env()` reads `IDENTITY_API_KEY`,
//! `IDENTITY_AUTH_DOMAIN`, `IDENTITY_PROJECT_ID` and optionally
//! `IDENTITY_APP_ID`, captured at build time from the environment or a
//! `.env` file next to `Cargo.toml`.

pub mod config;
pub mod error;
pub mod session;
pub mod user;

pub mod client;

pub use client::guard::{GuardDecision, Navigator, RouteGuard};
pub use client::provider::{IdentityProvider, ProviderEvent};
pub use client::store::{SessionStore, SessionWatcher};
pub use config::{IdentityConfig, SessionOptions};
pub use error::AuthError;
pub use session::Session;
pub use user::User;
