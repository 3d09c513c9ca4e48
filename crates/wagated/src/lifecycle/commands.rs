//! Lifecycle actor commands, outcomes, errors and events.
//!
//! - `LifecycleCommand`: requests sent to the actor through its handle
//! - `InitOutcome`: answer to an initialization request
//! - `LifecycleError`: failures surfaced to callers
//! - `LifecycleEvent`: notifications broadcast to subscribers

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use wagate_core::{ErrorRecord, FailureClass, Phase};

use crate::auth_store::PrepareReport;
use crate::reaper::ReapReport;

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to the lifecycle actor.
#[derive(Debug)]
pub enum LifecycleCommand {
    /// Start an initialization attempt unless one is running or the
    /// session is already live.
    ///
    /// Answered once the connect call settles, not once `Ready` is reached.
    RequestInitialize {
        respond_to: oneshot::Sender<InitOutcome>,
    },

    /// Tear down, reap, purge credentials, reset the budget and schedule
    /// a fresh attempt.
    ///
    /// Answered once the synchronous cleanup is done.
    ForceClean {
        respond_to: oneshot::Sender<Result<(), LifecycleError>>,
    },

    /// A send failed in a way that points at a dead transport.
    ///
    /// Fire-and-forget; triggers the same recovery as `ForceClean`.
    ReportTransportProblem {
        /// Error text of the failed send.
        error: String,
    },
}

/// Result of [`LifecycleCommand::RequestInitialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The connect call returned successfully.
    Connected,

    /// The attempt failed; a retry may have been scheduled.
    Failed(ErrorRecord),

    /// Another attempt is running. Not an error.
    AlreadyInProgress,

    /// The session is already live.
    AlreadyActive { phase: Phase },

    /// The attempt budget is spent; only a forced clean re-arms it.
    BudgetExhausted { attempts: u32 },
}

impl InitOutcome {
    /// True for the idempotent rejections.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress | Self::AlreadyActive { .. } | Self::BudgetExhausted { .. }
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by the lifecycle handle.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// The actor has shut down.
    #[error("lifecycle actor is not running")]
    ChannelClosed,

    /// The credential directory could not be recreated during a forced clean.
    #[error("{0}")]
    CredentialDir(String),
}

// ============================================================================
// Events
// ============================================================================

/// Notifications broadcast by the lifecycle actor.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The phase changed along a legal edge.
    PhaseChanged {
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },

    /// An attempt checked the credential directory.
    CredentialsChecked { report: PrepareReport },

    /// An attempt swept orphaned worker processes.
    WorkersReaped { report: ReapReport },

    /// A login challenge is waiting to be scanned.
    QrChallenge { code: String },

    /// A retry was scheduled.
    RetryScheduled {
        delay: Duration,
        class: FailureClass,
        purge_auth: bool,
    },

    /// The attempt budget is spent.
    GaveUp { attempts: u32 },

    /// An incoming chat message (never from status broadcasts).
    MessageReceived { from: String, body: String },
}
