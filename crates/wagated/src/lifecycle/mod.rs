//! Session lifecycle using the actor pattern.
//!
//! The lifecycle actor is the single owner of the session state. It drives
//! initialization attempts, reacts to client events, schedules retries and
//! runs the authenticated-but-not-ready watchdog.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ LifecycleCommand ┌─────────────────┐ LifecycleEvent ┌──────────────┐
//! │ LifecycleHandle │─────────────────▶│ LifecycleActor  │───────────────▶│  broadcast   │
//! └─────────────────┘   (mpsc)         └─────────────────┘                └──────────────┘
//!         ▲                              ▲      │
//!         │ watch<SessionState>          │      │ spawn
//!         └──────────────────────────────┼──────┤
//!                           ClientEvent  │      ▼
//!                  ┌─────────────────┐   │  ┌──────────────┐
//!                  │  SessionClient  │───┘  │ attempt task │
//!                  └─────────────────┘      └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use wagate_core::{ClientEvent, SessionState};

use crate::auth_store::AuthStore;
use crate::client::SessionClient;
use crate::config::Config;
use crate::readiness::Readiness;

mod actor;
mod attempt;
mod commands;
mod guard;
mod handle;

pub use actor::LifecycleActor;
pub use commands::{InitOutcome, LifecycleCommand, LifecycleError, LifecycleEvent};
pub use guard::{InitGuard, InitPermit};
pub use handle::LifecycleHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Spawns the lifecycle actor and returns a handle for interaction.
///
/// `client_events` is the receiving end of `client`'s event stream. No
/// attempt is started; call [`LifecycleHandle::request_initialize`].
pub fn spawn_lifecycle(
    config: &Config,
    client: Arc<dyn SessionClient>,
    client_events: mpsc::Receiver<ClientEvent>,
) -> LifecycleHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let (state_tx, state_rx) = watch::channel(SessionState::new(config.retry.max_attempts));

    let actor = LifecycleActor::new(
        config,
        Arc::clone(&client),
        cmd_rx,
        client_events,
        state_tx,
        event_tx.clone(),
    );
    tokio::spawn(actor.run());

    let readiness = Readiness::new(state_rx.clone(), client);
    LifecycleHandle::new(
        cmd_tx,
        event_tx,
        state_rx,
        readiness,
        AuthStore::new(&config.auth),
    )
}
