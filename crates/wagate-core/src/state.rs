//! Session state owned by the lifecycle manager, and the readiness view
//! derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::ClientInfo;
use crate::failure::ErrorRecord;
use crate::phase::{Phase, TransitionError};

// ============================================================================
// Session State
// ============================================================================

/// Process-wide lifecycle state of the single session.
///
/// Only the lifecycle actor holds a mutable copy; everyone else reads the
/// cloned snapshot it publishes after each mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub phase_entered_at: DateTime<Utc>,
    pub is_authenticated: bool,
    pub last_ready_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorRecord>,
    /// Attempts made since the last time the session reached `Ready`.
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// An initialization sequence is currently running.
    pub in_flight: bool,
    /// A retry is scheduled but has not fired yet.
    pub retry_pending: bool,
    /// Identity reported by the last `Ready` notification.
    pub identity: Option<ClientInfo>,
    /// When the last login challenge was shown.
    pub last_qr_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Fresh state at process start.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: Phase::Idle,
            phase_entered_at: Utc::now(),
            is_authenticated: false,
            last_ready_at: None,
            last_error: None,
            attempt_count: 0,
            max_attempts,
            in_flight: false,
            retry_pending: false,
            identity: None,
            last_qr_at: None,
        }
    }

    /// Moves to `next` if the edge exists, stamping the entry time and
    /// keeping the derived fields consistent.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] for an illegal edge; the state is left
    /// untouched.
    pub fn enter(&mut self, next: Phase) -> Result<Phase, TransitionError> {
        let previous = self.phase;
        self.phase = previous.transition(next)?;
        self.phase_entered_at = Utc::now();

        match next {
            Phase::Authenticated => {
                self.is_authenticated = true;
            }
            Phase::Ready => {
                self.is_authenticated = true;
                self.attempt_count = 0;
                self.last_ready_at = Some(self.phase_entered_at);
                self.last_error = None;
            }
            Phase::Initializing | Phase::Disconnected | Phase::Failed => {
                self.is_authenticated = false;
                self.identity = None;
            }
            Phase::Idle | Phase::AwaitingScan => {}
        }

        debug!(from = %previous, to = %next, "Phase entered");
        Ok(previous)
    }

    /// Returns true while the attempt budget still allows a new attempt.
    #[must_use]
    pub fn has_budget(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Seconds spent in the current phase.
    #[must_use]
    pub fn phase_age_secs(&self) -> i64 {
        (Utc::now() - self.phase_entered_at).num_seconds().max(0)
    }
}

// ============================================================================
// Readiness
// ============================================================================

/// Live view of the client's transport, read without blocking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportProbe {
    /// Browser/page handle present and alive.
    pub transport: bool,
    /// Identity of the logged-in account, if known.
    pub identity: Option<ClientInfo>,
}

/// Distinguishes why a session is not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Phase is `Ready`, transport alive, identity known.
    Ready,
    /// Phase claims an authenticated session but the transport is gone.
    TransportLost,
    /// Any other not-ready state (startup, login, failure, ...).
    NotReady,
}

/// Answer to "is the session usable right now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessView {
    pub phase: Phase,
    pub is_authenticated: bool,
    pub is_ready: bool,
    pub last_ready_at: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    /// The client exposes identity info.
    pub client_info: bool,
    /// The client exposes a live transport.
    pub browser_ready: bool,
}

impl ReadinessView {
    /// Combines the published state with a live transport probe.
    ///
    /// Pure: never blocks, never fails. A missing piece reads as not ready.
    #[must_use]
    pub fn derive(state: &SessionState, probe: &TransportProbe) -> Self {
        let client_info = probe.identity.is_some();
        let is_ready = state.phase == Phase::Ready && probe.transport && client_info;

        let verdict = if is_ready {
            Verdict::Ready
        } else if matches!(state.phase, Phase::Authenticated | Phase::Ready) && !probe.transport {
            Verdict::TransportLost
        } else {
            Verdict::NotReady
        };

        Self {
            phase: state.phase,
            is_authenticated: state.is_authenticated,
            is_ready,
            last_ready_at: state.last_ready_at,
            verdict,
            client_info,
            browser_ready: probe.transport,
        }
    }
}
