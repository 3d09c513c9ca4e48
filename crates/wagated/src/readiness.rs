//! Readiness queries answered from the published snapshot.
//!
//! Nothing here waits on the lifecycle actor or on the client. Any
//! inconsistency between the stored phase and the live transport reads
//! as "not ready".

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;

use wagate_core::{ReadinessView, SessionState, TransportProbe};

use crate::client::SessionClient;

/// Cloneable readiness facade.
#[derive(Clone)]
pub struct Readiness {
    state: watch::Receiver<SessionState>,
    client: Arc<dyn SessionClient>,
}

impl Readiness {
    pub fn new(state: watch::Receiver<SessionState>, client: Arc<dyn SessionClient>) -> Self {
        Self { state, client }
    }

    /// Combined view of the stored phase and the live transport.
    pub fn query(&self) -> ReadinessView {
        // Clone first so the watch lock is not held while probing.
        let state = self.state.borrow().clone();
        let probe = self.probe();
        ReadinessView::derive(&state, &probe)
    }

    pub fn is_ready(&self) -> bool {
        self.query().is_ready
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A probe that panics reads as a dead transport.
    fn probe(&self) -> TransportProbe {
        catch_unwind(AssertUnwindSafe(|| self.client.probe())).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{test_identity, FakeSessionClient};
    use wagate_core::{Phase, Verdict};

    fn ready_state() -> SessionState {
        let mut state = SessionState::new(5);
        for phase in [Phase::Initializing, Phase::Authenticated, Phase::Ready] {
            state.enter(phase).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn test_ready_requires_live_transport() {
        let (client, _rx) = FakeSessionClient::new();
        let (_tx, rx) = watch::channel(ready_state());
        let readiness = Readiness::new(rx, Arc::new(client.clone()));

        let view = readiness.query();
        assert!(!view.is_ready);
        assert_eq!(view.verdict, Verdict::TransportLost);

        client.emit(wagate_core::ClientEvent::Ready(test_identity())).await;
        assert!(readiness.is_ready());
    }

    #[tokio::test]
    async fn test_follows_published_state() {
        let (client, _rx) = FakeSessionClient::new();
        client.emit(wagate_core::ClientEvent::Ready(test_identity())).await;
        let (tx, rx) = watch::channel(SessionState::new(5));
        let readiness = Readiness::new(rx, Arc::new(client));

        assert!(!readiness.is_ready());
        tx.send_replace(ready_state());
        assert!(readiness.is_ready());
        assert_eq!(readiness.snapshot().phase, Phase::Ready);
    }
}
