//! Live session registry.
//!
//! The registry does not own sessions.  Each session task owns its
//! connection and holds a [`SessionGuard`]; the registry keeps only a close
//! channel per session so shutdown can fan out.  Dropping the guard
//! deregisters the session, so every registration is matched by exactly one
//! removal however the task ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::domain::BrokerError;

#[derive(Debug)]
struct SessionEntry {
    peer: String,
    close_tx: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: HashMap<Uuid, SessionEntry>,
    opened: u64,
    closed: u64,
    /// Set by [`SessionRegistry::close_all`]; later registrations fail.
    sealed: bool,
}

/// Thread-safe table of live sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new session for `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ShutdownInProgress`] once
    /// [`close_all`](Self::close_all) has run.
    pub fn register(&self, peer: impl Into<String>) -> Result<SessionGuard, BrokerError> {
        let mut inner = self.lock();
        if inner.sealed {
            return Err(BrokerError::ShutdownInProgress);
        }
        let id = Uuid::new_v4();
        let (close_tx, close_rx) = watch::channel(false);
        let peer = peer.into();
        debug!(session = %id, %peer, "session registered");
        inner.sessions.insert(id, SessionEntry { peer, close_tx });
        inner.opened += 1;
        Ok(SessionGuard {
            id,
            close_rx,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Asks every live session to close and refuses new registrations.
    /// Returns how many sessions were signalled.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        inner.sealed = true;
        for (id, entry) in &inner.sessions {
            debug!(session = %id, peer = %entry.peer, "closing session");
            entry.close_tx.send_replace(true);
        }
        inner.sessions.len()
    }

    /// Number of sessions currently registered.
    pub fn live(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Registrations since start-up.
    pub fn opened_total(&self) -> u64 {
        self.lock().opened
    }

    /// Deregistrations since start-up.
    pub fn closed_total(&self) -> u64 {
        self.lock().closed
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().sessions.contains_key(&id)
    }
}

/// A session's registration.  Dropping it removes the session.
#[derive(Debug)]
pub struct SessionGuard {
    id: Uuid,
    close_rx: watch::Receiver<bool>,
    registry: Arc<Mutex<RegistryInner>>,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `true` once the registry has asked this session to close.
    pub fn close_requested(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Resolves when the registry asks this session to close.
    pub async fn closed(&mut self) {
        // The sender is removed from the registry only in `Drop`, so the
        // channel outlives this guard's waits.
        let _ = self.close_rx.wait_for(|close| *close).await.map(|_| ());
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut inner = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.sessions.remove(&self.id).is_some() {
            inner.closed += 1;
            debug!(session = %self.id, "session deregistered");
        }
    }
}
