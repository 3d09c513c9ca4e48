//! Inbound lifecycle notifications from the external session client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the logged-in account, known once the session is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Account id on the messaging network (e.g. "15551234567@c.us").
    pub wid: String,

    /// Display name of the account, if the network exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushname: Option<String>,

    /// Platform reported by the paired phone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// When the client last (re)connected.
    pub last_connect: DateTime<Utc>,
}

/// Notifications emitted asynchronously by the session client.
///
/// All of them are delivered to a single state-update function in the
/// lifecycle actor, so transition validity is checked in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The worker process and its page are up; no phase change.
    Connected,

    /// A login challenge was presented (payload is the QR string).
    QrChallenge(String),

    /// Credentials were accepted.
    Authenticated,

    /// The session is fully usable.
    Ready(ClientInfo),

    /// The transport was lost.
    Disconnected {
        /// Reason string reported by the client ("NAVIGATION", "LOGOUT", ...).
        reason: String,
    },

    /// Credentials were rejected.
    AuthFailed {
        /// Error message reported by the client.
        message: String,
    },

    /// An incoming chat message. Informational only.
    MessageReceived {
        /// Sender chat id.
        from: String,
        /// Message text.
        body: String,
    },
}

/// Chat id used by status broadcasts; never worth logging.
pub const STATUS_BROADCAST: &str = "status@broadcast";

impl ClientEvent {
    /// Short name used as a structured log field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::QrChallenge(_) => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready(_) => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailed { .. } => "auth_failure",
            Self::MessageReceived { .. } => "message",
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { reason } => write!(f, "disconnected ({reason})"),
            Self::AuthFailed { message } => write!(f, "auth_failure ({message})"),
            Self::MessageReceived { from, .. } => write!(f, "message from {from}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(ClientEvent::QrChallenge("x".into()).name(), "qr");
        assert_eq!(
            ClientEvent::Disconnected {
                reason: "LOGOUT".into()
            }
            .to_string(),
            "disconnected (LOGOUT)"
        );
    }

    #[test]
    fn test_client_info_camel_case() {
        let info = ClientInfo {
            wid: "15551234567@c.us".into(),
            pushname: Some("Shop".into()),
            platform: None,
            last_connect: Utc::now(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("lastConnect").is_some());
        assert!(json.get("platform").is_none());
    }
}
