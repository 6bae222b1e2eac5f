//! Persistence of the provider session between application runs.
//!
//! The REST provider keeps its live tokens in memory and mirrors them into a
//! `TokenStore` so the next start can restore the session:
//!
//! - On sign-in: save to the store
//! - On start-up: load from the store, refreshing an expired ID token
//! - On sign-out: clear the store
//!
//! Two stores ship with the crate: `MemoryTokenStore` (nothing survives a
//! restart) and `FileTokenStore` (a JSON file).

use crate::{AuthError, User};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Seconds before expiry at which an ID token is treated as expired.
const EXPIRY_SKEW_SECS: u64 = 60;

/// Errors from a token store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("token storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("stored tokens are unreadable: {0}")]
    Format(#[from] serde_json::Error),
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Unknown(err.to_string())
    }
}

/// A persisted provider session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredTokens {
    /// ID token (JWT with user claims)
    pub id_token: String,
    /// Long-lived token used to mint new ID tokens
    pub refresh_token: Option<String>,
    /// Unix timestamp when the ID token expires (in seconds)
    pub expires_at: u64,
    /// Identity the tokens belong to
    pub user: User,
}

impl StoredTokens {
    /// Creates StoredTokens with expiration calculated from `expires_in` seconds.
    pub fn new(id_token: String, refresh_token: Option<String>, expires_in: u64, user: User) -> Self {
        Self {
            id_token,
            refresh_token,
            expires_at: current_timestamp() + expires_in,
            user,
        }
    }

    /// True once the ID token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        current_timestamp() + EXPIRY_SKEW_SECS >= self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// Where a provider persists its session.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredTokens>, StorageError>;
    fn save(&self, tokens: &StoredTokens) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// Keeps tokens for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `tokens`, as if left by a previous run.
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, StorageError> {
        Ok(self.tokens.lock().clone())
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), StorageError> {
        *self.tokens.lock() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.tokens.lock() = None;
        Ok(())
    }
}

/// Stores tokens as JSON in a single file.
///
/// The file is small and written rarely (sign-in, refresh, sign-out), so it
/// is accessed synchronously.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredTokens>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let tokens = serde_json::from_slice(&bytes)?;
                tracing::trace!("Loaded tokens from {}", self.path.display());
                Ok(Some(tokens))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, tokens: &StoredTokens) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        // Write then rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("tmp");
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        // The refresh token is a bearer credential: owner-only on Unix.
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(&serde_json::to_vec(tokens)?)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        tracing::trace!("Saved tokens to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::trace!("Removed {}", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Returns current Unix timestamp in seconds.
pub(crate) fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
