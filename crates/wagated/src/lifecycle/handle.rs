//! Client interface for interacting with the lifecycle actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `LifecycleError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;

use wagate_core::{Phase, SessionState};

use super::commands::{InitOutcome, LifecycleCommand, LifecycleError, LifecycleEvent};
use crate::auth_store::AuthStore;
use crate::readiness::Readiness;

// ============================================================================
// Lifecycle Handle
// ============================================================================

/// Cheap-to-clone handle to the lifecycle actor.
///
/// Commands go through the actor; reads come from the published snapshot
/// and never wait on it.
///
/// ```ignore
/// let outcome = handle.request_initialize().await?;
/// if handle.readiness().is_ready() {
///     // send
/// }
/// let mut events = handle.subscribe();
/// ```
#[derive(Clone)]
pub struct LifecycleHandle {
    sender: mpsc::Sender<LifecycleCommand>,
    event_sender: broadcast::Sender<LifecycleEvent>,
    state: watch::Receiver<SessionState>,
    readiness: Readiness,
    auth_store: AuthStore,
}

impl LifecycleHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<LifecycleCommand>,
        event_sender: broadcast::Sender<LifecycleEvent>,
        state: watch::Receiver<SessionState>,
        readiness: Readiness,
        auth_store: AuthStore,
    ) -> Self {
        Self {
            sender,
            event_sender,
            state,
            readiness,
            auth_store,
        }
    }

    /// Starts an initialization attempt.
    ///
    /// Returns once the connect call settles, or immediately with an
    /// idempotent rejection when an attempt is running, the session is
    /// live or the budget is spent.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::ChannelClosed` if the actor has shut down
    pub async fn request_initialize(&self) -> Result<InitOutcome, LifecycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(LifecycleCommand::RequestInitialize { respond_to: tx })
            .await
            .map_err(|_| LifecycleError::ChannelClosed)?;

        rx.await.map_err(|_| LifecycleError::ChannelClosed)
    }

    /// Tears the session down, purges credentials and schedules a fresh
    /// attempt with a reset budget.
    ///
    /// Returns once the cleanup is done; the new attempt starts after the
    /// configured reconnect delay.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::CredentialDir` if the directory cannot be recreated
    /// - `LifecycleError::ChannelClosed` if the actor has shut down
    pub async fn force_clean_and_reinit(&self) -> Result<(), LifecycleError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(LifecycleCommand::ForceClean { respond_to: tx })
            .await
            .map_err(|_| LifecycleError::ChannelClosed)?;

        rx.await.map_err(|_| LifecycleError::ChannelClosed)?
    }

    /// Reports a send failure that points at a dead transport.
    ///
    /// Fire-and-forget: never waits on the actor.
    pub fn report_transport_problem(&self, error: impl Into<String>) {
        let cmd = LifecycleCommand::ReportTransportProblem {
            error: error.into(),
        };
        if let Err(e) = self.sender.try_send(cmd) {
            warn!(error = %e, "Could not report transport problem");
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// A receiver that is notified after every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Non-blocking readiness queries.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn auth_store(&self) -> &AuthStore {
        &self.auth_store
    }

    /// Subscribe to lifecycle events.
    ///
    /// Slow subscribers miss events rather than stall the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_sender.subscribe()
    }
}
