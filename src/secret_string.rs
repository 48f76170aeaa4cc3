use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry password (or token) that never shows up in logs.
///
/// Debug and Display print `<REDACTED, length N>` so a `Config` can be logged as a whole.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    #[cfg(test)]
    pub fn new(s: impl Into<String>) -> Self {
        SecretString(s.into())
    }

    /// Only call this where the raw value has to leave the process, e.g. the registry auth header.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED, length {}>", self.0.len())
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
