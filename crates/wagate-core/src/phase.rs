//! Session phases and the transition table.
//!
//! The phase is the coarse lifecycle state of the single external session.
//! Every legal edge is listed in [`Phase::can_transition_to`]; anything else
//! is rejected with [`TransitionError`] so callers can assert validity in one
//! place instead of scattering checks across event handlers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Phase
// ============================================================================

/// Coarse lifecycle state of the session.
///
/// ```text
/// Idle ─▶ Initializing ─▶ AwaitingScan ─▶ Authenticated ─▶ Ready
///              │  └──────── fast path ────────▲   │          │
///              ▼                              │   ▼          ▼
///            Failed ◀─────────────────────────┘ Disconnected ◀┘
///              │                                  │
///              └────────▶ Initializing ◀──────────┘   (after backoff)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has been attempted yet.
    #[default]
    Idle,

    /// An initialization attempt is running (worker launching, page loading).
    Initializing,

    /// A login challenge (QR code) is being shown and awaits a scan.
    AwaitingScan,

    /// Credentials were accepted; the session is still syncing.
    Authenticated,

    /// Fully usable: identity known and transport live.
    Ready,

    /// The transport was lost after authentication.
    Disconnected,

    /// The last attempt failed. Parks here once the retry budget is spent.
    Failed,
}

impl Phase {
    /// All phases, in lifecycle order.
    pub const ALL: [Phase; 7] = [
        Phase::Idle,
        Phase::Initializing,
        Phase::AwaitingScan,
        Phase::Authenticated,
        Phase::Ready,
        Phase::Disconnected,
        Phase::Failed,
    ];

    /// Returns true if `self → next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, AwaitingScan)
                // Fast path: stored credentials accepted without a challenge.
                | (Initializing, Authenticated)
                | (AwaitingScan, Authenticated)
                | (Authenticated, Ready)
                | (Authenticated, Disconnected)
                | (Ready, Disconnected)
                | (Initializing, Failed)
                | (AwaitingScan, Failed)
                | (Authenticated, Failed)
                | (Failed, Initializing)
                | (Disconnected, Initializing)
        )
    }

    /// Validates `self → next`, returning the new phase.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the edge does not exist.
    pub fn transition(self, next: Phase) -> Result<Phase, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Phases from which a new initialization attempt may begin.
    #[must_use]
    pub fn accepts_initialize(self) -> bool {
        self.can_transition_to(Phase::Initializing)
    }

    /// Phases in which a transport is expected to be alive.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Phase::Initializing | Phase::AwaitingScan | Phase::Authenticated | Phase::Ready
        )
    }

    /// Intermediate phases a `Ready` signal must walk through from here.
    ///
    /// Clients sometimes collapse `authenticated` and `ready` into one
    /// notification. The model never jumps straight to `Ready`, so the
    /// missing `Authenticated` step is made explicit.
    #[must_use]
    pub fn path_to_ready(self) -> Option<&'static [Phase]> {
        match self {
            Phase::Initializing | Phase::AwaitingScan => {
                Some(&[Phase::Authenticated, Phase::Ready])
            }
            Phase::Authenticated => Some(&[Phase::Ready]),
            _ => None,
        }
    }

    /// Returns the snake_case label used in logs and JSON.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingScan => "awaiting_scan",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An attempted transition that is not an edge of the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal phase transition: {from} -> {to}")]
pub struct TransitionError {
    /// Phase the session was in.
    pub from: Phase,
    /// Phase that was requested.
    pub to: Phase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        let path = [
            Phase::Idle,
            Phase::Initializing,
            Phase::AwaitingScan,
            Phase::Authenticated,
            Phase::Ready,
            Phase::Disconnected,
            Phase::Initializing,
        ];
        for pair in path.windows(2) {
            if let [from, to] = pair {
                assert!(from.can_transition_to(*to), "{from} -> {to} should be legal");
            }
        }
    }

    #[test]
    fn test_initializing_cannot_jump_to_ready() {
        let err = Phase::Initializing.transition(Phase::Ready).unwrap_err();
        assert_eq!(err.from, Phase::Initializing);
        assert_eq!(err.to, Phase::Ready);
        assert_eq!(
            err.to_string(),
            "illegal phase transition: initializing -> ready"
        );
    }

    #[test]
    fn test_failed_reachable_only_from_handshake_phases() {
        for phase in Phase::ALL {
            let expected = matches!(
                phase,
                Phase::Initializing | Phase::AwaitingScan | Phase::Authenticated
            );
            assert_eq!(phase.can_transition_to(Phase::Failed), expected, "{phase}");
        }
    }

    #[test]
    fn test_disconnected_reachable_only_after_auth() {
        for phase in Phase::ALL {
            let expected = matches!(phase, Phase::Authenticated | Phase::Ready);
            assert_eq!(
                phase.can_transition_to(Phase::Disconnected),
                expected,
                "{phase}"
            );
        }
    }

    #[test]
    fn test_no_self_loops() {
        for phase in Phase::ALL {
            assert!(!phase.can_transition_to(phase), "{phase} -> {phase}");
        }
    }

    #[test]
    fn test_accepts_initialize() {
        assert!(Phase::Idle.accepts_initialize());
        assert!(Phase::Failed.accepts_initialize());
        assert!(Phase::Disconnected.accepts_initialize());
        assert!(!Phase::Ready.accepts_initialize());
        assert!(!Phase::AwaitingScan.accepts_initialize());
        assert!(!Phase::Initializing.accepts_initialize());
    }

    #[test]
    fn test_path_to_ready_never_skips_authenticated() {
        let path = Phase::Initializing.path_to_ready().unwrap();
        assert_eq!(path, &[Phase::Authenticated, Phase::Ready]);

        let mut current = Phase::AwaitingScan;
        for next in Phase::AwaitingScan.path_to_ready().unwrap() {
            current = current.transition(*next).unwrap();
        }
        assert_eq!(current, Phase::Ready);

        assert!(Phase::Failed.path_to_ready().is_none());
        assert!(Phase::Ready.path_to_ready().is_none());
    }

    #[test]
    fn test_live_phases_are_on_the_way_to_ready() {
        for phase in Phase::ALL {
            let expected = phase == Phase::Ready || phase.path_to_ready().is_some();
            assert_eq!(phase.is_live(), expected, "{phase}");
        }
    }

    #[test]
    fn test_phase_serde_labels() {
        let json = serde_json::to_string(&Phase::AwaitingScan).unwrap();
        assert_eq!(json, "\"awaiting_scan\"");
        assert_eq!(Phase::AwaitingScan.to_string(), "awaiting_scan");
    }
}
