//! relay-producer library crate.
//!
//! Client side of the relay protocol, for scanners and agents that report
//! beacon detections to a running `relay-broker`.
//!
//! ```no_run
//! use relay_core::BeaconEvent;
//! use relay_producer::{ProducerClient, ProducerConfig};
//!
//! # async fn demo() -> Result<(), relay_producer::ProducerError> {
//! let mut client = ProducerClient::new(ProducerConfig::default());
//! let reply = client
//!     .send_event(&BeaconEvent::detected("AA:BB:CC:DD:EE:FF").with_rssi(-61.0))
//!     .await?;
//! if !reply.is_ack() {
//!     // NACK: the serial link is down; the event was not relayed.
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The connection is opened lazily on the first send and kept for later
//! ones.  Any I/O failure drops it, and the next send reconnects.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use relay_core::{BeaconEvent, Response, ResponseParseError};

/// Errors a producer can see.  None of them is a `NACK`: a `NACK` is a
/// successful exchange and comes back as [`Response::Nack`].
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The broker's endpoint could not be reached.
    #[error("failed to connect to broker at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not finish in time.
    #[error("connecting to broker at {path} timed out")]
    ConnectTimedOut { path: PathBuf },

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply line arrived in time.
    #[error("broker did not reply within {0:?}")]
    ReplyTimedOut(Duration),

    /// The broker closed the connection before replying.
    #[error("connection closed by broker")]
    Closed,

    /// The line to send contains a newline and would be split in two.
    #[error("line contains an embedded newline")]
    EmbeddedNewline,

    /// The reply line was not `ACK`, `NACK` or `ERROR:<reason>`.
    #[error(transparent)]
    Reply(#[from] ResponseParseError),

    /// The event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where the broker listens and how long to wait for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    pub endpoint_path: PathBuf,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            endpoint_path: PathBuf::from("/tmp/bluetooth_sender.sock"),
            connect_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

/// A producer's connection to the broker.
pub struct ProducerClient {
    config: ProducerConfig,
    stream: Option<BufReader<UnixStream>>,
}

impl ProducerClient {
    /// Creates a client.  Nothing is connected until the first send.
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connects now instead of on the first send.  A no-op when already
    /// connected.
    ///
    /// # Errors
    ///
    /// [`ProducerError::Connect`] or [`ProducerError::ConnectTimedOut`].
    pub async fn connect(&mut self) -> Result<(), ProducerError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let path = &self.config.endpoint_path;
        let stream = timeout(self.config.connect_timeout, UnixStream::connect(path))
            .await
            .map_err(|_| ProducerError::ConnectTimedOut { path: path.clone() })?
            .map_err(|source| ProducerError::Connect {
                path: path.clone(),
                source,
            })?;
        debug!(endpoint = %path.display(), "connected to broker");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    /// Drops the connection, if any.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("disconnected from broker");
        }
    }

    /// Sends one line and waits for its reply.
    ///
    /// A single trailing newline in `line` is allowed and ignored.
    ///
    /// # Errors
    ///
    /// Any error other than [`ProducerError::EmbeddedNewline`] also drops the
    /// connection, so the next call starts from a fresh one.
    pub async fn send_line(&mut self, line: &str) -> Result<Response, ProducerError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if line.contains('\n') {
            return Err(ProducerError::EmbeddedNewline);
        }

        let result = self.exchange(line).await;
        if let Err(e) = &result {
            debug!("dropping broker connection: {e}");
            self.stream = None;
        }
        result
    }

    /// Serializes `event` as one JSON line and sends it.
    pub async fn send_event(&mut self, event: &BeaconEvent) -> Result<Response, ProducerError> {
        let line = event.to_line()?;
        self.send_line(&line).await
    }

    async fn exchange(&mut self, line: &str) -> Result<Response, ProducerError> {
        self.connect().await?;
        let reply_timeout = self.config.reply_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(ProducerError::Closed);
        };

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');
        stream.get_mut().write_all(frame.as_bytes()).await?;

        let mut reply = String::new();
        let n = timeout(reply_timeout, stream.read_line(&mut reply))
            .await
            .map_err(|_| ProducerError::ReplyTimedOut(reply_timeout))??;
        if n == 0 {
            return Err(ProducerError::Closed);
        }
        Ok(Response::parse(&reply)?)
    }
}
