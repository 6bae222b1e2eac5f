//! ID token decoding.
//!
//! The identity provider returns an ID token (a JWT) on every successful
//! sign-in. This module reads the payload to build a `User` and to learn the
//! token's expiry. The signature is not verified here: the token arrives
//! directly from the provider over HTTPS, and any backend that trusts it must
//! verify it on its own.

use crate::{AuthError, User};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Errors while decoding an ID token.
#[derive(Debug, thiserror::Error)]
pub enum TokenDecodeError {
    #[error("Invalid JWT format: expected 3 parts separated by dots, got {0}")]
    Malformed(usize),

    #[error("Failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to parse JWT claims: {0}")]
    Claims(#[from] serde_json::Error),
}

impl From<TokenDecodeError> for AuthError {
    fn from(err: TokenDecodeError) -> Self {
        AuthError::Unknown(format!("unreadable ID token: {}", err))
    }
}

/// Sign-in details the provider nests under the `firebase` claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignInInfo {
    /// How the user signed in ("password", "google.com", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_in_provider: Option<String>,
}

/// Claims carried in the ID token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Subject - unique user identifier (required)
    pub sub: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Issued at (seconds since the epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Expiration (seconds since the epoch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub firebase: Option<SignInInfo>,
}

impl IdTokenClaims {
    /// Converts the claims into a `User`.
    pub fn into_user(self) -> User {
        tracing::trace!(
            "Building user from ID token claims: sub={}, has_email={}",
            self.sub,
            self.email.is_some()
        );

        User {
            id: self.sub,
            email: self.email,
            email_verified: self.email_verified.unwrap_or(false),
            name: self.name,
            picture: self.picture,
        }
    }

    /// Sign-in method recorded by the provider, if present.
    pub fn sign_in_provider(&self) -> Option<&str> {
        self.firebase.as_ref()?.sign_in_provider.as_deref()
    }
}

/// Decodes a JWT ID token and extracts the claims.
///
/// # Example
///
/// ```ignore
/// let claims = decode_id_token(&id_token)?;
/// let user = claims.into_user();
/// ```
pub fn decode_id_token(token: &str) -> Result<IdTokenClaims, TokenDecodeError> {
    // header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::warn!("Invalid JWT format: expected 3 parts, got {}", parts.len());
        return Err(TokenDecodeError::Malformed(parts.len()));
    }

    let decoded_bytes = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('='))?;
    let claims: IdTokenClaims = serde_json::from_slice(&decoded_bytes)?;

    tracing::trace!("Decoded ID token for sub={}", claims.sub);
    Ok(claims)
}

/// Decodes a JWT ID token straight into a `User`.
pub fn decode_id_token_to_user(token: &str) -> Result<User, TokenDecodeError> {
    Ok(decode_id_token(token)?.into_user())
}

#[cfg(test)]
pub(crate) fn create_test_jwt(payload: &str) -> String {
    let header = r#"{"alg":"RS256","typ":"JWT"}"#;
    let header_b64 = URL_SAFE_NO_PAD.encode(header.as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());

    // Signature is never checked.
    format!("{}.{}.dummy_signature", header_b64, payload_b64)
}
