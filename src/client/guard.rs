//! Route guarding for views that require a signed-in user.
//!
//! A guard maps the current `Session` onto one of three states:
//!
//! | Session           | GuardState | What the view does          |
//! |-------------------|------------|-----------------------------|
//! | `Unknown`         | `Pending`  | renders a neutral placeholder |
//! | `Unauthenticated` | `Denied`   | redirects to the login path |
//! | `Authenticated`   | `Granted`  | renders protected content   |
//!
//! `RouteGuard::evaluate` is the pure mapping. `RouteGuard::observe` also
//! performs the redirect, once per transition into `Denied`, and
//! `RouteGuard::mount` runs `observe` for every session change until the
//! returned `MountedGuard` is dropped.

use crate::client::store::SessionWatcher;
use crate::{Session, User};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Navigation boundary of the host application.
pub trait Navigator: Send + Sync {
    /// Sends the user to `path`.
    fn redirect(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect(&self, path: &str) {
        self(path)
    }
}

/// Guard state derived 1:1 from the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GuardState {
    Pending,
    Denied,
    Granted,
}

impl From<&Session> for GuardState {
    fn from(session: &Session) -> Self {
        match session {
            Session::Unknown => GuardState::Pending,
            Session::Unauthenticated => GuardState::Denied,
            Session::Authenticated(_) => GuardState::Granted,
        }
    }
}

/// What a guarded view should do for a given session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render nothing (or a neutral placeholder) and wait.
    Placeholder,
    /// Navigate to the login entry point.
    Redirect(String),
    /// Render the protected content for this user.
    Render(User),
}

/// Gate in front of a protected view.
pub struct RouteGuard {
    login_path: String,
    navigator: Arc<dyn Navigator>,
    last: Option<GuardState>,
}

impl RouteGuard {
    pub fn new(login_path: impl Into<String>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            login_path: login_path.into(),
            navigator,
            last: None,
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// State after the most recent `observe`; `Pending` before the first one.
    pub fn state(&self) -> GuardState {
        self.last.unwrap_or(GuardState::Pending)
    }

    /// Maps a session to a decision without side effects.
    pub fn evaluate(&self, session: &Session) -> GuardDecision {
        match session {
            Session::Unknown => GuardDecision::Placeholder,
            Session::Unauthenticated => GuardDecision::Redirect(self.login_path.clone()),
            Session::Authenticated(user) => GuardDecision::Render(user.clone()),
        }
    }

    /// Evaluates `session` and redirects if the guard just became `Denied`.
    pub fn observe(&mut self, session: &Session) -> GuardDecision {
        let next = GuardState::from(session);
        let previous = self.last.replace(next);

        if previous != Some(next) {
            tracing::trace!("Route guard {:?} -> {:?}", previous, next);
        }
        if next == GuardState::Denied && previous != Some(GuardState::Denied) {
            tracing::debug!("No session, redirecting to {}", self.login_path);
            self.navigator.redirect(&self.login_path);
        }

        self.evaluate(session)
    }

    /// Produces protected content only for an authenticated session.
    ///
    /// `content` is never called while the session is `Unknown` or
    /// `Unauthenticated`.
    pub fn render<T>(&self, session: &Session, content: impl FnOnce(&User) -> T) -> Option<T> {
        session.user().map(content)
    }

    /// Keeps this guard evaluated against every change seen by `watcher`.
    ///
    /// The current session is observed immediately, so a visitor without a
    /// session is redirected on mount.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn mount(mut self, mut watcher: SessionWatcher) -> MountedGuard {
        self.observe(&watcher.current());
        let (state_tx, state_rx) = watch::channel(self.state());

        let task = tokio::spawn(async move {
            while let Some(session) = watcher.changed().await {
                self.observe(&session);
                let state = self.state();
                state_tx.send_if_modified(|current| {
                    let changed = *current != state;
                    *current = state;
                    changed
                });
            }
            tracing::trace!("Session closed, route guard stopped");
        });

        MountedGuard { state_rx, task }
    }
}

/// A guard attached to a live session. Dropping it unmounts the guard.
pub struct MountedGuard {
    state_rx: watch::Receiver<GuardState>,
    task: JoinHandle<()>,
}

impl MountedGuard {
    pub fn state(&self) -> GuardState {
        *self.state_rx.borrow()
    }

    /// Waits for the next guard transition.
    ///
    /// Returns `None` once the session store is gone.
    pub async fn changed(&mut self) -> Option<GuardState> {
        self.state_rx.changed().await.ok()?;
        Some(*self.state_rx.borrow_and_update())
    }

    /// Waits until the guard reaches `state`.
    pub async fn wait_for(&mut self, state: GuardState) -> Option<GuardState> {
        self.state_rx
            .wait_for(|current| *current == state)
            .await
            .ok()
            .map(|current| *current)
    }
}

impl Drop for MountedGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
