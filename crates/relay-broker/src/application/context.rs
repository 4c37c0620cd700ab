//! Explicit broker context shared by the accept loop and every session.

use std::sync::Arc;
use std::time::Duration;

use crate::application::{RelayTransport, SessionRegistry, StopSignal};

/// Everything a session task needs, passed by `Arc` instead of living in
/// globals.
pub struct BrokerContext {
    pub transport: Arc<dyn RelayTransport>,
    pub registry: SessionRegistry,
    pub stop: StopSignal,
    /// Longest accepted request line.
    pub max_line_len: usize,
    /// Bound on waiting for sessions to finish once the stop flag is set.
    pub shutdown_timeout: Duration,
}

impl BrokerContext {
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        max_line_len: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            registry: SessionRegistry::new(),
            stop: StopSignal::new(),
            max_line_len,
            shutdown_timeout,
        }
    }
}
