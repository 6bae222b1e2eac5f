//! Sign-in and sign-up form payloads.
//!
//! Rendering is up to the host UI; these types only carry the submitted values
//! and the checks that must happen before anything is sent to the provider.

use crate::AuthError;
use secrecy::{ExposeSecret, SecretString};

/// Values submitted from a login form.
#[derive(Debug)]
pub struct SignInForm {
    pub email: String,
    pub password: SecretString,
}

impl SignInForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Values submitted from a sign-up form.
#[derive(Debug)]
pub struct SignUpForm {
    pub email: String,
    pub password: SecretString,
    pub confirm_password: SecretString,
}

impl SignUpForm {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        confirm_password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: SecretString::from(password.into()),
            confirm_password: SecretString::from(confirm_password.into()),
        }
    }

    /// Local checks run before the provider is contacted.
    ///
    /// # Errors
    ///
    /// `AuthError::PasswordMismatch` when the confirmation differs.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.password.expose_secret() != self.confirm_password.expose_secret() {
            tracing::debug!("Sign-up rejected locally: password confirmation mismatch");
            return Err(AuthError::PasswordMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_form_trims_email() {
        let form = SignInForm::new("  a@b.com ", "secret");
        assert_eq!(form.email, "a@b.com");
        assert_eq!(form.password.expose_secret(), "secret");
    }

    #[test]
    fn test_sign_up_matching_passwords() {
        let form = SignUpForm::new("a@b.com", "hunter22", "hunter22");
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_sign_up_password_mismatch() {
        let form = SignUpForm::new("a@b.com", "x", "y");
        assert_eq!(form.validate(), Err(AuthError::PasswordMismatch));
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let form = SignUpForm::new("a@b.com", "topsecret", "topsecret");
        let debug = format!("{:?}", form);
        assert!(!debug.contains("topsecret"));
    }
}
