//! Chat id normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of a direct (one-to-one) chat id.
pub const CONTACT_SUFFIX: &str = "@c.us";

/// Target chat of an outgoing message, e.g. "15551234567@c.us".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Normalizes a phone number into a chat id.
    ///
    /// Input that already carries the contact suffix is kept verbatim.
    /// Otherwise every non-digit is stripped ("+1 (555) 123-4567" becomes
    /// "15551234567") and the suffix appended. Returns `None` when no
    /// digits remain.
    pub fn from_number(number: &str) -> Option<Self> {
        if number.contains(CONTACT_SUFFIX) {
            return Some(Self(number.trim().to_string()));
        }

        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        Some(Self(format!("{digits}{CONTACT_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ChatId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_digits() {
        let id = ChatId::from_number("15551234567").unwrap();
        assert_eq!(id.as_str(), "15551234567@c.us");
    }

    #[test]
    fn test_formatting_is_stripped() {
        let id = ChatId::from_number("+1 (555) 123-4567").unwrap();
        assert_eq!(id.to_string(), "15551234567@c.us");
    }

    #[test]
    fn test_existing_chat_id_is_kept() {
        let id = ChatId::from_number("4915112345678@c.us").unwrap();
        assert_eq!(id.as_str(), "4915112345678@c.us");
    }

    #[test]
    fn test_no_digits() {
        assert!(ChatId::from_number("call me").is_none());
        assert!(ChatId::from_number("").is_none());
    }
}
