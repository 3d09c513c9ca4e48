//! Failure taxonomy and classification.
//!
//! Errors from the session client arrive as free text. They are sorted into a
//! small set of classes so the retry controller can pick a delay and decide
//! whether the stored credentials are still worth keeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Failure Class
// ============================================================================

/// Retry-relevant classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The transport died mid-handshake, usually memory pressure on the host.
    SessionClosed,
    /// The attempt exceeded its deadline; a resource-starvation signal.
    Timeout,
    /// Credentials were rejected. Never retried unchanged.
    AuthFailure,
    /// Anything else.
    Other,
}

const SESSION_CLOSED_MARKERS: &[&str] = &[
    "session closed",
    "page has been closed",
    "target closed",
    "worker exited",
];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out"];
const AUTH_MARKERS: &[&str] = &["auth", "logout", "unpaired"];

impl FailureClass {
    /// Classifies an error message by case-insensitive substring match.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if has(SESSION_CLOSED_MARKERS) {
            Self::SessionClosed
        } else if has(TIMEOUT_MARKERS) {
            Self::Timeout
        } else if has(AUTH_MARKERS) {
            Self::AuthFailure
        } else {
            Self::Other
        }
    }

    /// Returns true if the text looks like a dead or broken transport.
    ///
    /// Used after a failed send to decide whether to force a reconnect.
    #[must_use]
    pub fn indicates_transport_problem(message: &str) -> bool {
        Self::classify(message) == Self::SessionClosed
            || message.to_lowercase().contains("protocol error")
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SessionClosed => "session_closed",
            Self::Timeout => "timeout",
            Self::AuthFailure => "auth_failure",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Error Kind / Record
// ============================================================================

/// What went wrong, as recorded on the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport died, likely memory pressure.
    SessionClosed,
    /// Initialization deadline exceeded.
    InitTimeout,
    /// Credentials invalid.
    AuthRejected,
    /// Authenticated but never reached ready.
    WatchdogStuck,
    /// Transport lost after the session was up.
    Disconnected,
    /// Unclassified client error.
    Other,
}

impl ErrorKind {
    /// Retry class used for backoff.
    #[must_use]
    pub fn failure_class(self) -> FailureClass {
        match self {
            Self::SessionClosed => FailureClass::SessionClosed,
            Self::InitTimeout => FailureClass::Timeout,
            Self::AuthRejected => FailureClass::AuthFailure,
            Self::WatchdogStuck | Self::Disconnected | Self::Other => FailureClass::Other,
        }
    }

    /// Maps a classified client error message to a kind.
    #[must_use]
    pub fn from_class(class: FailureClass) -> Self {
        match class {
            FailureClass::SessionClosed => Self::SessionClosed,
            FailureClass::Timeout => Self::InitTimeout,
            FailureClass::AuthFailure => Self::AuthRejected,
            FailureClass::Other => Self::Other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SessionClosed => "session closed",
            Self::InitTimeout => "initialization timed out",
            Self::AuthRejected => "authentication rejected",
            Self::WatchdogStuck => "stuck between authenticated and ready",
            Self::Disconnected => "disconnected",
            Self::Other => "client error",
        };
        write!(f, "{s}")
    }
}

/// The last failure observed by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Builds a record by classifying a raw client error message.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = ErrorKind::from_class(FailureClass::classify(&message));
        Self::new(kind, message)
    }

    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        self.kind.failure_class()
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
