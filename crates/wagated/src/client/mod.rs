//! Seam between the lifecycle manager and the external session.
//!
//! The session itself (browser automation, messaging protocol) lives in a
//! separate worker. [`SessionClient`] is everything the daemon needs from
//! it; lifecycle notifications arrive separately as
//! [`ClientEvent`](wagate_core::ClientEvent)s on the
//! channel returned by the client's constructor.

mod sidecar;

pub use sidecar::SidecarClient;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{test_identity, ClientCall, ConnectScript, FakeSessionClient};

use async_trait::async_trait;
use thiserror::Error;

use wagate_core::TransportProbe;
use wagate_protocol::ChatId;

/// Id assigned by the network to a sent message.
pub type MessageId = String;

/// Buffer size of the client event channel.
pub const EVENT_BUFFER: usize = 64;

/// Errors from session client operations.
///
/// The display text is what the retry controller classifies, so variants
/// for a dead transport say "Session closed".
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The worker reported an initialization error.
    #[error("{0}")]
    Init(String),

    /// The worker could not be started.
    #[error("failed to launch worker `{command}`: {error}")]
    Spawn { command: String, error: String },

    /// The worker exited or closed its pipes.
    #[error("Session closed: worker exited")]
    WorkerExited,

    /// No worker is running.
    #[error("Session closed: no live session")]
    NotConnected,

    /// The worker rejected a send.
    #[error("{0}")]
    Send(String),

    /// Writing to the worker failed.
    #[error("worker I/O error: {0}")]
    Io(String),
}

/// Operations on the external session.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
    /// Starts the session and resolves when its initialize call returns.
    ///
    /// Reaching `Ready` is reported later through the event channel.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Closes the live transport, if any. Idempotent.
    async fn teardown(&self);

    /// Sends a text message.
    async fn send_message(&self, chat: &ChatId, body: &str) -> Result<MessageId, ClientError>;

    /// Snapshot of the transport. Must not block or panic; an internal
    /// inconsistency reads as "no transport".
    fn probe(&self) -> TransportProbe;
}
