//! Redacting wrapper for credentials.
//!
//! The OAuth client secret travels through configuration structs that get
//! logged with `{:?}`. [`SecretString`] keeps the value out of that output.
//!
//! ```rust
//! use calendar_mcp::SecretString;
//!
//! let secret = SecretString::with_label("s3cret", "CLIENT_SECRET");
//! assert_eq!(format!("{:?}", secret), "[CLIENT_SECRET]");
//! assert_eq!(secret.expose(), "s3cret");
//! ```

use std::borrow::Cow;
use std::fmt::{self, Debug, Display, Formatter};

const DEFAULT_LABEL: &str = "REDACTED";

/// A string that prints as `[LABEL]` instead of its contents.
#[derive(Clone)]
pub struct SecretString {
    value: String,
    label: Cow<'static, str>,
}

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self {
            value: s.into(),
            label: Cow::Borrowed(DEFAULT_LABEL),
        }
    }

    pub fn with_label(s: impl Into<String>, label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            value: s.into(),
            label: label.into(),
        }
    }

    /// The underlying value. Do not log it.
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Debug for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

impl Display for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_are_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_label() {
        let secret = SecretString::with_label("hunter2", "CLIENT_SECRET");
        assert_eq!(format!("{:?}", secret), "[CLIENT_SECRET]");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_whitespace_counts_as_empty() {
        assert!(SecretString::new("  ").is_empty());
        assert!(SecretString::default().is_empty());
        assert!(!SecretString::new("x").is_empty());
    }

    #[test]
    fn test_equality_ignores_label() {
        assert_eq!(
            SecretString::new("same"),
            SecretString::with_label("same", "OTHER")
        );
    }
}
