//! Transport manager: the single downstream serial link.
//!
//! Sessions only ever call [`TransportManager::write`], which fails fast
//! unless the link is `Connected`.  Reconnection belongs to one background
//! monitor ([`TransportManager::run_monitor`]) that, on every interval,
//! either tries to open the device (when `Disconnected`) or probes that it
//! is still there (when `Connected`).
//!
//! One `tokio::sync::Mutex` guards the state, the handle and the counters,
//! so a write and a state change never interleave on the same handle.  The
//! lock is *not* held while the device is being opened: the state reads
//! `Connecting` during that window and writers get `Unavailable` at once.
//!
//! # Loss detection
//!
//! A link is dropped when a write fails, a write times out, or the periodic
//! probe finds the device gone.  Each of those bumps the `losses` counter
//! and logs at `warn`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use relay_core::TERMINATOR;

use crate::application::{RelayTransport, StopSignal};
use crate::domain::{BrokerConfig, TransportError, TransportState, TransportStatus};
use crate::infrastructure::device::{SerialDevice, SerialLink};

/// What one monitor tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The device was opened; the link is now `Connected`.
    Connected,
    /// The link was `Connected` and the device is still present.
    StillConnected,
    /// Nothing to open: the device node does not exist.
    DeviceAbsent,
    /// The device exists but opening it failed or timed out.
    OpenFailed(String),
    /// The probe found the device gone; the link was dropped.
    LinkLost,
    /// Another open is in flight.
    Busy,
    /// The transport has been shut down.
    Closed,
}

struct Inner {
    state: TransportState,
    link: Option<SerialLink>,
    last_write: Option<SystemTime>,
    connects: u64,
    losses: u64,
}

/// Owner of the one downstream link.
pub struct TransportManager {
    device: Arc<dyn SerialDevice>,
    device_id: String,
    inner: Mutex<Inner>,
    monitor_interval: Duration,
    open_timeout: Duration,
    write_timeout: Duration,
}

impl TransportManager {
    /// Creates a manager in the `Disconnected` state.  Nothing is opened
    /// until the monitor's first tick.
    pub fn new(device: Arc<dyn SerialDevice>, config: &BrokerConfig) -> Self {
        let device_id = device.identifier();
        Self {
            device,
            device_id,
            inner: Mutex::new(Inner {
                state: TransportState::Disconnected,
                link: None,
                last_write: None,
                connects: 0,
                losses: 0,
            }),
            monitor_interval: config.monitor_interval,
            open_timeout: config.open_timeout,
            write_timeout: config.write_timeout,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn state(&self) -> TransportState {
        self.inner.lock().await.state
    }

    pub async fn status(&self) -> TransportStatus {
        let inner = self.inner.lock().await;
        TransportStatus {
            state: inner.state,
            device: self.device_id.clone(),
            last_write: inner.last_write,
            connects: inner.connects,
            losses: inner.losses,
        }
    }

    /// Writes `payload` to the device, appending the line terminator if it
    /// is missing.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unavailable`] unless the link is `Connected`.
    /// - [`TransportError::WriteFailed`] / [`TransportError::WriteTimedOut`]
    ///   if the device rejected or stalled the write; the link is dropped.
    /// - [`TransportError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
    pub async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().await;
        if !inner.state.accepts_writes() {
            return Err(match inner.state {
                TransportState::Closed => TransportError::ShutdownInProgress,
                _ => self.unavailable(),
            });
        }

        let Some(link) = inner.link.as_mut() else {
            inner.state = TransportState::Disconnected;
            return Err(self.unavailable());
        };

        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        if line.last() != Some(&TERMINATOR) {
            line.push(TERMINATOR);
        }

        let written = timeout(self.write_timeout, async {
            link.write_all(&line).await?;
            link.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                inner.last_write = Some(SystemTime::now());
                Ok(())
            }
            Ok(Err(source)) => {
                self.drop_link(&mut inner, "write failed");
                Err(TransportError::WriteFailed {
                    device: self.device_id.clone(),
                    source,
                })
            }
            Err(_) => {
                self.drop_link(&mut inner, "write timed out");
                Err(TransportError::WriteTimedOut {
                    device: self.device_id.clone(),
                    timeout: self.write_timeout,
                })
            }
        }
    }

    /// Runs one step of the reconnect state machine.
    pub async fn monitor_tick(&self) -> TickOutcome {
        let state = self.inner.lock().await.state;
        match state {
            TransportState::Closed => TickOutcome::Closed,
            TransportState::Connecting => TickOutcome::Busy,
            TransportState::Disconnected => self.try_connect().await,
            TransportState::Connected => self.check_liveness().await,
        }
    }

    /// Ticks at the monitor interval until `stop` is set or the transport
    /// is shut down.  The first tick runs immediately.
    pub async fn run_monitor(&self, stop: StopSignal) {
        let mut ticker = interval(self.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(device = %self.device_id, interval = ?self.monitor_interval, "transport monitor started");

        loop {
            tokio::select! {
                biased;
                _ = stop.triggered() => break,
                _ = ticker.tick() => {}
            }
            if self.monitor_tick().await == TickOutcome::Closed {
                break;
            }
        }

        debug!(device = %self.device_id, "transport monitor stopped");
    }

    /// Closes the link and moves to the inert `Closed` state.  Idempotent.
    ///
    /// Waits for an in-flight write to finish (bounded by the write timeout)
    /// but not for an in-flight open; that open's handle is discarded.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Closed {
            return;
        }
        if let Some(mut link) = inner.link.take() {
            let _ = timeout(self.write_timeout, link.shutdown()).await;
        }
        inner.state = TransportState::Closed;
        info!(device = %self.device_id, "transport closed");
    }

    async fn try_connect(&self) -> TickOutcome {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != TransportState::Disconnected {
                return match inner.state {
                    TransportState::Closed => TickOutcome::Closed,
                    _ => TickOutcome::Busy,
                };
            }
            inner.state = TransportState::Connecting;
        }

        let opened = if !self.device.is_present().await {
            Err(None)
        } else {
            match timeout(self.open_timeout, self.device.open()).await {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(e)) => Err(Some(e.to_string())),
                Err(_) => Err(Some(format!("open timed out after {:?}", self.open_timeout))),
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Closed {
            debug!(device = %self.device_id, "shutdown during open; discarding handle");
            return TickOutcome::Closed;
        }

        match opened {
            Ok(link) => {
                inner.link = Some(link);
                inner.state = TransportState::Connected;
                inner.connects += 1;
                info!(device = %self.device_id, connects = inner.connects, "transport connected");
                TickOutcome::Connected
            }
            Err(None) => {
                inner.state = TransportState::Disconnected;
                debug!(device = %self.device_id, "device not present");
                TickOutcome::DeviceAbsent
            }
            Err(Some(reason)) => {
                inner.state = TransportState::Disconnected;
                warn!(device = %self.device_id, "failed to open device: {reason}");
                TickOutcome::OpenFailed(reason)
            }
        }
    }

    async fn check_liveness(&self) -> TickOutcome {
        let mut inner = self.inner.lock().await;
        if inner.state != TransportState::Connected {
            return match inner.state {
                TransportState::Closed => TickOutcome::Closed,
                _ => TickOutcome::Busy,
            };
        }
        if self.device.is_present().await {
            TickOutcome::StillConnected
        } else {
            self.drop_link(&mut inner, "device disappeared");
            TickOutcome::LinkLost
        }
    }

    fn drop_link(&self, inner: &mut Inner, reason: &str) {
        inner.link = None;
        inner.state = TransportState::Disconnected;
        inner.losses += 1;
        warn!(device = %self.device_id, losses = inner.losses, "transport lost: {reason}");
    }

    fn unavailable(&self) -> TransportError {
        TransportError::Unavailable {
            device: self.device_id.clone(),
        }
    }
}

#[async_trait]
impl RelayTransport for TransportManager {
    async fn write_line(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.write(payload).await
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
