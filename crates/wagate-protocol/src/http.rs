//! JSON bodies of the gateway's HTTP routes.
//!
//! Field names are camelCase on the wire to stay compatible with existing
//! dashboards and uptime checks that poll `/health` and `/status`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wagate_core::{ReadinessView, SessionState};

/// Uptime after which a missing login counts as "Not authenticated"
/// instead of "Initializing".
pub const AUTH_GRACE_PERIOD: Duration = Duration::from_secs(60);

// ============================================================================
// Health
// ============================================================================

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "OK" - the HTTP process itself is alive.
    pub status: String,
    /// Process uptime in seconds.
    pub uptime: f64,
    /// Session summary.
    pub whatsapp: WhatsappHealth,
    pub timestamp: DateTime<Utc>,
    /// "production" or "development".
    pub environment: String,
    /// A login challenge is waiting to be scanned.
    pub qr_code_available: bool,
    pub initialization_status: InitializationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
}

/// Resident memory of the daemon and its browser worker, in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub daemon_mb: u64,
    pub worker_mb: u64,
    pub worker_processes: usize,
}

/// Session section of the health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsappHealth {
    /// One of "Connected", "Authenticated but not ready",
    /// "Not authenticated", "Initializing".
    pub status: String,
    pub connected_at: Option<DateTime<Utc>>,
    pub needs_authentication: bool,
    pub is_authenticated: bool,
    pub is_fully_ready: bool,
}

impl WhatsappHealth {
    /// Derives the session summary from a readiness view.
    pub fn from_readiness(view: &ReadinessView, uptime: Duration) -> Self {
        let past_grace = uptime > AUTH_GRACE_PERIOD;
        let status = if view.is_ready {
            "Connected"
        } else if view.is_authenticated {
            "Authenticated but not ready"
        } else if past_grace {
            "Not authenticated"
        } else {
            "Initializing"
        };

        Self {
            status: status.to_string(),
            connected_at: if view.client_info {
                view.last_ready_at
            } else {
                None
            },
            needs_authentication: !view.is_authenticated && past_grace,
            is_authenticated: view.is_authenticated,
            is_fully_ready: view.is_ready,
        }
    }
}

impl HealthResponse {
    pub fn new(
        view: &ReadinessView,
        initialization_status: InitializationStatus,
        uptime: Duration,
        environment: &str,
    ) -> Self {
        Self {
            status: "OK".to_string(),
            uptime: uptime.as_secs_f64(),
            whatsapp: WhatsappHealth::from_readiness(view, uptime),
            timestamp: Utc::now(),
            environment: environment.to_string(),
            qr_code_available: false,
            initialization_status,
            memory: None,
        }
    }

    #[must_use]
    pub fn with_qr_code_available(mut self, available: bool) -> Self {
        self.qr_code_available = available;
        self
    }

    #[must_use]
    pub fn with_memory(mut self, memory: Option<MemoryUsage>) -> Self {
        self.memory = memory;
        self
    }
}

// ============================================================================
// Status
// ============================================================================

/// `GET /status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// "Connected" or "Not connected".
    pub status: String,
    pub details: StatusDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetails {
    /// The client exposes identity info.
    pub client_info: bool,
    pub authenticated: bool,
    pub last_connect: Option<DateTime<Utc>>,
    /// Process uptime in seconds.
    pub server_uptime: f64,
}

impl StatusResponse {
    pub fn new(view: &ReadinessView, uptime: Duration) -> Self {
        let status = if view.is_ready {
            "Connected"
        } else {
            "Not connected"
        };
        Self {
            status: status.to_string(),
            details: StatusDetails {
                client_info: view.client_info,
                authenticated: view.is_authenticated,
                last_connect: if view.client_info {
                    view.last_ready_at
                } else {
                    None
                },
                server_uptime: uptime.as_secs_f64(),
            },
        }
    }
}

// ============================================================================
// Send Message
// ============================================================================

/// `POST /send-message` body. Both fields are required; they are optional
/// here so a missing field yields a 400 instead of a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SendMessageRequest {
    /// Returns `(number, message)` when both are present and non-empty.
    pub fn required_fields(&self) -> Option<(&str, &str)> {
        let number = self.number.as_deref().filter(|s| !s.trim().is_empty())?;
        let message = self.message.as_deref().filter(|s| !s.is_empty())?;
        Some((number, message))
    }
}

/// Successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: String,
    pub message_id: String,
}

impl SendMessageResponse {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "Message sent successfully".to_string(),
            message_id: message_id.into(),
        }
    }
}

/// 503 body when the session is not usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotReadyResponse {
    pub success: bool,
    pub message: String,
    pub details: NotReadyDetails,
    pub initialization_status: InitializationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotReadyDetails {
    pub client_info: bool,
    pub authenticated: bool,
    pub browser_ready: bool,
}

impl From<&ReadinessView> for NotReadyDetails {
    fn from(view: &ReadinessView) -> Self {
        Self {
            client_info: view.client_info,
            authenticated: view.is_authenticated,
            browser_ready: view.browser_ready,
        }
    }
}

/// Retry progress, so callers can tell a recovering session from a parked one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationStatus {
    pub is_initializing: bool,
    pub current_retry: u32,
    pub max_retries: u32,
}

impl From<&SessionState> for InitializationStatus {
    fn from(state: &SessionState) -> Self {
        Self {
            is_initializing: state.in_flight,
            current_retry: state.attempt_count,
            max_retries: state.max_attempts,
        }
    }
}

impl NotReadyResponse {
    pub fn new(details: NotReadyDetails, initialization_status: InitializationStatus) -> Self {
        Self {
            success: false,
            message: "WhatsApp client is not fully connected. Try again later.".to_string(),
            details,
            initialization_status,
        }
    }
}

// ============================================================================
// Generic
// ============================================================================

/// Plain `{success, message}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Failure with the underlying error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
        }
    }
}
