//! Identity of an authenticated user.
//!
//! `User` is what the identity provider reports when a session exists. It is
//! built from ID token claims or from provider responses, and it is the
//! payload of `Session::Authenticated`.

use serde::{Deserialize, Serialize};

/// An authenticated user's identity.
///
/// Only `id` is guaranteed; everything else depends on what the sign-in
/// method and the user's profile provide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique subject identifier assigned by the provider.
    pub id: String,

    /// Email address, if the sign-in method exposes one.
    pub email: Option<String>,

    /// Whether the provider has verified `email`.
    #[serde(default)]
    pub email_verified: bool,

    /// Display name.
    pub name: Option<String>,

    /// Profile picture URL.
    pub picture: Option<String>,
}

impl User {
    /// Creates a new User with the given ID.
    ///
    /// # Example
    ///
    /// ```
    /// # use authgate::User;
    /// let user = User::new("u1");
    /// assert_eq!(user.id, "u1");
    /// assert!(user.email.is_none());
    /// ```
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            email_verified: false,
            name: None,
            picture: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
        self.picture = Some(picture.into());
        self
    }

    /// Returns a display name for the user.
    ///
    /// Prefers the user's name if available, falls back to email,
    /// and finally to the user ID.
    ///
    /// # Example
    ///
    /// ```
    /// # use authgate::User;
    /// let user = User::new("u1").with_email("a@b.com", true);
    /// assert_eq!(user.display_name(), "a@b.com");
    /// ```
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }

    /// Returns the user's initials for avatar display.
    ///
    /// If the user has a name, returns the first letter of the first two words.
    /// Otherwise, returns the first two characters of the email or ID.
    pub fn initials(&self) -> String {
        if let Some(name) = &self.name {
            let parts: Vec<&str> = name.split_whitespace().collect();
            match parts.len() {
                0 => "??".to_string(),
                1 => parts[0].chars().take(2).collect::<String>().to_uppercase(),
                _ => {
                    let first = parts[0].chars().next().unwrap_or('?');
                    let second = parts[1].chars().next().unwrap_or('?');
                    format!("{}{}", first, second).to_uppercase()
                }
            }
        } else if let Some(email) = &self.email {
            email.chars().take(2).collect::<String>().to_uppercase()
        } else {
            self.id.chars().take(2).collect::<String>().to_uppercase()
        }
    }

    /// Returns the email only when the provider has verified it.
    pub fn verified_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|_| self.email_verified)
    }

    pub fn has_verified_email(&self) -> bool {
        self.verified_email().is_some()
    }
}
