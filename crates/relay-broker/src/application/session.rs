//! Per-producer session protocol.
//!
//! A session reads newline-terminated lines from one producer, hands each
//! complete line to the transport, and answers it with exactly one reply:
//!
//! | Outcome                                   | Reply            |
//! |-------------------------------------------|------------------|
//! | transport write succeeded                 | `ACK`            |
//! | transport unavailable or write failed     | `NACK`           |
//! | line empty, oversized, or not UTF-8       | `ERROR:<reason>` |
//!
//! Neither a failed write nor a malformed line ends the session.  It ends
//! when the producer disconnects, when the broker stops, when the registry
//! closes it, or when a reply cannot be written.
//!
//! [`run_session`] is generic over the stream so the protocol can be driven
//! by `tokio-test` mock streams as well as real Unix sockets.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use relay_core::{LineBuffer, Response};

use crate::application::registry::SessionGuard;
use crate::application::stop::StopSignal;
use crate::domain::TransportError;

const READ_CHUNK: usize = 4096;

/// The downstream side of the relay as seen by sessions and shutdown.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Writes one payload line.  Must fail fast rather than wait for a
    /// reconnect.
    async fn write_line(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Closes the link and makes every later write fail with
    /// [`TransportError::ShutdownInProgress`].
    async fn close(&self);
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The producer closed its side or the read failed.
    ProducerDisconnected,
    /// The broker-wide stop flag was set.
    ShutdownRequested,
    /// The registry asked the session to close.
    ClosedByRegistry,
    /// A reply could not be written back to the producer.
    ReplyFailed,
}

/// Reply counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub acked: u64,
    pub nacked: u64,
    pub errored: u64,
}

impl SessionStats {
    fn record(&mut self, reply: &Response) {
        match reply {
            Response::Ack => self.acked += 1,
            Response::Nack => self.nacked += 1,
            Response::Error(_) => self.errored += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub stats: SessionStats,
}

/// Runs the request/response loop for one producer until the session ends.
///
/// `stream` is owned and dropped on return, which closes the producer's
/// connection.
pub async fn run_session<S, T>(
    mut stream: S,
    transport: &T,
    guard: &mut SessionGuard,
    stop: &StopSignal,
    max_line_len: usize,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: RelayTransport + ?Sized,
{
    let session = guard.id();
    let mut lines = LineBuffer::new(max_line_len);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut stats = SessionStats::default();

    loop {
        while let Some(line) = lines.next_line() {
            if stop.is_triggered() {
                // Best effort: the producer learns the line was not relayed.
                let _ = write_reply(&mut stream, &Response::Nack).await;
                return SessionOutcome {
                    end: SessionEnd::ShutdownRequested,
                    stats,
                };
            }

            let (reply, shutting_down) = match line {
                Ok(text) => match transport.write_line(text.as_bytes()).await {
                    Ok(()) => (Response::Ack, false),
                    Err(e) if e.is_shutdown() => (Response::Nack, true),
                    Err(e) => {
                        debug!(%session, "line not relayed: {e}");
                        (Response::Nack, false)
                    }
                },
                Err(e) => {
                    debug!(%session, "malformed line: {e}");
                    (Response::error(e), false)
                }
            };

            stats.record(&reply);
            if let Err(e) = write_reply(&mut stream, &reply).await {
                debug!(%session, "reply write failed: {e}");
                return SessionOutcome {
                    end: SessionEnd::ReplyFailed,
                    stats,
                };
            }
            if shutting_down {
                return SessionOutcome {
                    end: SessionEnd::ShutdownRequested,
                    stats,
                };
            }
        }

        let read = tokio::select! {
            biased;
            _ = stop.triggered() => {
                return SessionOutcome { end: SessionEnd::ShutdownRequested, stats };
            }
            _ = guard.closed() => {
                return SessionOutcome { end: SessionEnd::ClosedByRegistry, stats };
            }
            read = stream.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                if lines.pending() > 0 {
                    trace!(%session, pending = lines.pending(), "dropping unterminated tail");
                }
                return SessionOutcome {
                    end: SessionEnd::ProducerDisconnected,
                    stats,
                };
            }
            Ok(n) => lines.push(&chunk[..n]),
            Err(e) => {
                debug!(%session, "producer read failed: {e}");
                return SessionOutcome {
                    end: SessionEnd::ProducerDisconnected,
                    stats,
                };
            }
        }
    }
}

async fn write_reply<S>(stream: &mut S, reply: &Response) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(reply.encode().as_bytes()).await?;
    stream.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
