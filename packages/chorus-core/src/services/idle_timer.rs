//! Resettable one-shot timeout.
//!
//! Used for the guild inactivity watcher and the per-session silence
//! watcher. `arm` starts (or restarts) the countdown, `signal` cancels it,
//! and an elapsed countdown runs its action exactly once.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct IdleTimer {
    pending: Mutex<Option<CancellationToken>>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a countdown of `budget`, replacing any pending one.
    ///
    /// `action` runs once if the countdown elapses without being signalled
    /// or re-armed.
    pub fn arm<F>(&self, budget: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(budget) => {
                    // Consume the token so a late signal is a no-op.
                    token.cancel();
                    action.await;
                }
            }
        });
    }

    /// Cancels the pending countdown, if any.
    pub fn signal(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
    }

    /// Returns true while a countdown is pending.
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.signal();
    }
}
