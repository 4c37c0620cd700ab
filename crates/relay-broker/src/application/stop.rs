//! The broker-wide stop flag.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared stop flag observed by the accept loop, every session and the
/// transport monitor.
///
/// Cloning is cheap; all clones observe the same flag.  The flag only ever
/// goes from clear to set.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Sets the flag.  Returns `true` for the call that actually set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set (immediately if it already is).
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed
        // channel here.
        let _ = rx.wait_for(|stopped| *stopped).await.map(|_| ());
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
