//! Single-shot timer for sessions stuck between authenticated and ready.
//!
//! Each [`Watchdog::arm`] starts a new generation and aborts the previous
//! timer. A firing carries its generation; the owner ignores any generation
//! that is no longer current, which covers a timer that fired just before
//! being cancelled.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Generation-tagged single-shot timer.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    generation: u64,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: 0,
            armed: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a timer that sends `make(generation)` on `notify` when it
    /// expires, cancelling any prior timer. Returns the new generation.
    pub fn arm<T, F>(&mut self, notify: mpsc::UnboundedSender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Owner gone means nothing left to supervise.
            let _ = notify.send(make(generation));
        });
        self.armed = Some((generation, task));

        debug!(generation, timeout_secs = timeout.as_secs(), "Watchdog armed");
        generation
    }

    /// Cancels the running timer. Returns true if one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((generation, task)) => {
                task.abort();
                debug!(generation, "Watchdog cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Consumes a firing. Returns true only for the currently armed
    /// generation; stale firings return false and change nothing.
    pub fn accept_firing(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some((current, _)) if *current == generation => {
                self.armed = None;
                true
            }
            _ => {
                debug!(generation, "Ignoring stale watchdog firing");
                false
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(120);

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dog = Watchdog::new(TIMEOUT);
        let generation = dog.arm(tx, |g| g);

        tokio::time::sleep(TIMEOUT - Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, generation);
        assert!(dog.accept_firing(fired));
        assert!(!dog.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut dog = Watchdog::new(TIMEOUT);
        dog.arm(tx, |g| g);
        assert!(dog.cancel());
        assert!(!dog.cancel());

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_prior_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut dog = Watchdog::new(TIMEOUT);
        let first = dog.arm(tx.clone(), |g| g);
        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = dog.arm(tx, |g| g);
        assert_ne!(first, second);

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await.unwrap(), second);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut dog = Watchdog::new(TIMEOUT);
        assert!(!dog.accept_firing(1));
    }
}
