//! Mutual exclusion for the initialization sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "an attempt is in flight" flag.
#[derive(Debug, Clone, Default)]
pub struct InitGuard {
    flag: Arc<AtomicBool>,
}

impl InitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the flag if free. The flag is released when the returned
    /// permit is dropped, including during a panic unwind.
    pub fn try_acquire(&self) -> Option<InitPermit> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InitPermit {
                flag: Arc::clone(&self.flag),
            })
    }

    pub fn is_held(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`InitGuard`].
#[derive(Debug)]
pub struct InitPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for InitPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
