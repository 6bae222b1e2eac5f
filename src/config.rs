//! Identity provider and session configuration.
//!
//! `IdentityConfig` carries the provider's opaque project identifiers (API key,
//! auth domain, project id) together with the REST endpoints the bundled
//! provider talks to. `SessionOptions` tunes the session store itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Identity Toolkit endpoint (sign-in, sign-up, IdP exchange).
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";

/// Default secure token endpoint (refresh token exchange).
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com";

/// Default upper bound for a single provider operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default login entry point used by route guards.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Identity provider configuration supplied at initialization.
///
/// The API key and project identifiers are public values handed out by the
/// provider console; they are treated as opaque strings.
///
/// # Fields
///
/// - `api_key`: web API key appended to every REST call
/// - `auth_domain`: hosted auth domain (e.g. "my-app.firebaseapp.com")
/// - `project_id`: provider project identifier
/// - `app_id`: optional application identifier
/// - `identity_endpoint` / `token_endpoint`: REST base URLs, overridable for
///   emulators and tests
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// Web API key.
    pub api_key: String,

    /// Hosted auth domain used for popup redirect handling.
    pub auth_domain: String,

    /// Provider project identifier.
    pub project_id: String,

    /// Optional application identifier.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Base URL of the Identity Toolkit API.
    #[serde(default = "default_identity_endpoint")]
    pub identity_endpoint: String,

    /// Base URL of the secure token API.
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

fn default_identity_endpoint() -> String {
    DEFAULT_IDENTITY_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

impl IdentityConfig {
    /// Creates a configuration pointing at the public provider endpoints.
    ///
    /// # Example
    ///
    /// ```
    /// # use authgate::IdentityConfig;
    /// let config = IdentityConfig::new(
    ///     "api-key".to_string(),
    ///     "my-app.firebaseapp.com".to_string(),
    ///     "my-app".to_string(),
    /// );
    /// assert!(config.app_id.is_none());
    /// ```
    pub fn new(api_key: String, auth_domain: String, project_id: String) -> Self {
        Self {
            api_key,
            auth_domain,
            project_id,
            app_id: None,
            identity_endpoint: default_identity_endpoint(),
            token_endpoint: default_token_endpoint(),
        }
    }

    /// Sets the application identifier.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Points both REST endpoints at a different host, e.g. a local emulator.
    ///
    /// Trailing slashes are stripped.
    pub fn with_endpoints(
        mut self,
        identity_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.identity_endpoint = identity_endpoint.into().trim_end_matches('/').to_string();
        self.token_endpoint = token_endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Loads the configuration from compile-time environment variables.
    ///
    /// Expected environment variables:
    /// - `IDENTITY_API_KEY`
    /// - `IDENTITY_AUTH_DOMAIN`
    /// - `IDENTITY_PROJECT_ID`
    /// - `IDENTITY_APP_ID` (optional)
    ///
    /// Returns `None` if any required variable was not set at compile time.
    pub fn from_env() -> Option<Self> {
        let api_key = option_env!("IDENTITY_API_KEY")?;
        let auth_domain = option_env!("IDENTITY_AUTH_DOMAIN")?;
        let project_id = option_env!("IDENTITY_PROJECT_ID")?;

        let mut config = Self::new(
            api_key.to_string(),
            auth_domain.to_string(),
            project_id.to_string(),
        );
        config.app_id = option_env!("IDENTITY_APP_ID").map(str::to_string);
        Some(config)
    }

    /// Loads the configuration from compile-time environment variables or panics.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if any required variable was not set
    /// at compile time. Use this where provider configuration is mandatory.
    pub fn from_env_or_panic() -> Self {
        Self::from_env().expect(
            "Identity provider configuration not found. Please set the following environment variables at compile time:\n\
             - IDENTITY_API_KEY\n\
             - IDENTITY_AUTH_DOMAIN\n\
             - IDENTITY_PROJECT_ID\n\n\
             For local development, consider IdentityConfig::new() with emulator endpoints.",
        )
    }

    /// Returns the URL of an Identity Toolkit `accounts:*` method.
    ///
    /// # Example
    ///
    /// ```
    /// # use authgate::IdentityConfig;
    /// let config = IdentityConfig::new("k".into(), "d".into(), "p".into());
    /// assert_eq!(
    ///     config.accounts_url("signUp"),
    ///     "https://identitytoolkit.googleapis.com/v1/accounts:signUp?key=k"
    /// );
    /// ```
    pub fn accounts_url(&self, method: &str) -> String {
        format!(
            "{}/v1/accounts:{}?key={}",
            self.identity_endpoint,
            method,
            urlencoding::encode(&self.api_key)
        )
    }

    /// Returns the refresh token exchange URL.
    pub fn refresh_url(&self) -> String {
        format!(
            "{}/v1/token?key={}",
            self.token_endpoint,
            urlencoding::encode(&self.api_key)
        )
    }

    /// Returns the redirect URI that popup flows hand back to.
    pub fn popup_redirect_uri(&self) -> String {
        format!("https://{}/__/auth/handler", self.auth_domain)
    }
}

/// Tuning for the session store and the guards built on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound for any single sign-in, sign-up or sign-out call.
    pub operation_timeout: Duration,

    /// Where route guards send visitors without a session.
    pub login_path: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> IdentityConfig {
        IdentityConfig::new(
            "test-key".to_string(),
            "test-app.firebaseapp.com".to_string(),
            "test-app".to_string(),
        )
    }

    #[test]
    fn test_new_uses_public_endpoints() {
        let config = test_config();
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.identity_endpoint, DEFAULT_IDENTITY_ENDPOINT);
        assert_eq!(config.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        assert!(config.app_id.is_none());
    }

    #[test]
    fn test_with_app_id() {
        let config = test_config().with_app_id("1:123:web:abc");
        assert_eq!(config.app_id.as_deref(), Some("1:123:web:abc"));
    }

    #[test]
    fn test_with_endpoints_strips_trailing_slash() {
        let config = test_config().with_endpoints("http://127.0.0.1:9099/", "http://127.0.0.1:9099");
        assert_eq!(config.identity_endpoint, "http://127.0.0.1:9099");
        assert_eq!(config.token_endpoint, "http://127.0.0.1:9099");
    }

    #[test]
    fn test_accounts_url() {
        let config = test_config();
        assert_eq!(
            config.accounts_url("signInWithPassword"),
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword?key=test-key"
        );
    }

    #[test]
    fn test_accounts_url_encodes_key() {
        let config = IdentityConfig::new("a b&c".into(), "d".into(), "p".into());
        assert!(config.accounts_url("signUp").ends_with("?key=a%20b%26c"));
    }

    #[test]
    fn test_refresh_url() {
        let config = test_config();
        assert_eq!(
            config.refresh_url(),
            "https://securetoken.googleapis.com/v1/token?key=test-key"
        );
    }

    #[test]
    fn test_popup_redirect_uri() {
        let config = test_config();
        assert_eq!(
            config.popup_redirect_uri(),
            "https://test-app.firebaseapp.com/__/auth/handler"
        );
    }

    #[test]
    fn test_deserialization_fills_default_endpoints() {
        let json = r#"{
            "api_key": "k",
            "auth_domain": "d.firebaseapp.com",
            "project_id": "p"
        }"#;

        let config: IdentityConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.identity_endpoint, DEFAULT_IDENTITY_ENDPOINT);
        assert_eq!(config.token_endpoint, DEFAULT_TOKEN_ENDPOINT);
        assert!(config.app_id.is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = test_config().with_app_id("app");
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: IdentityConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_from_env() {
        // Only populated when IDENTITY_* variables were present at compile time.
        if let Some(cfg) = IdentityConfig::from_env() {
            assert!(!cfg.api_key.is_empty());
            assert!(!cfg.auth_domain.is_empty());
            assert!(!cfg.project_id.is_empty());
        }
    }

    #[test]
    fn test_session_options_default() {
        let options = SessionOptions::default();
        assert_eq!(options.operation_timeout, Duration::from_secs(30));
        assert_eq!(options.login_path, "/login");
    }

    #[test]
    fn test_session_options_builders() {
        let options = SessionOptions::default()
            .with_operation_timeout(Duration::from_secs(5))
            .with_login_path("/signin");
        assert_eq!(options.operation_timeout, Duration::from_secs(5));
        assert_eq!(options.login_path, "/signin");
    }
}
