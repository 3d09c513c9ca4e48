//! wagate core - lifecycle types for the session supervisor
//!
//! This crate provides the runtime-free domain types shared between
//! the daemon (wagated) and its protocol crate: the phase graph, the
//! failure taxonomy, the retry policy and the session state snapshot.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod event;
pub mod failure;
pub mod phase;
pub mod retry;
pub mod state;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use event::{ClientEvent, ClientInfo, STATUS_BROADCAST};
pub use failure::{ErrorKind, ErrorRecord, FailureClass};
pub use phase::{Phase, TransitionError};
pub use retry::{DelayGrowth, RetryDecision, RetryPolicy};
pub use state::{ReadinessView, SessionState, TransportProbe, Verdict};
