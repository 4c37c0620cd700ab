//! Rendezvous endpoint: bind, accept loop, per-producer session tasks.
//!
//! The accept loop:
//!
//! 1. waits for the next producer with a short timeout so the stop flag is
//!    re-checked even when nobody connects,
//! 2. registers each accepted connection and spawns its session into a
//!    `JoinSet`,
//! 3. on stop, closes every registered session, waits (bounded) for the
//!    tasks to finish, aborts stragglers, and removes the socket file.

use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::{run_session, BrokerContext, SessionEnd, SessionGuard};
use crate::domain::BrokerError;

/// Pause after a failed `accept()` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ── Endpoint file ─────────────────────────────────────────────────────────────

/// The socket file on disk.  Removed at most once, by whichever of the
/// accept loop or the shutdown coordinator gets there first.
#[derive(Debug)]
pub struct EndpointFile {
    path: PathBuf,
    removed: AtomicBool,
}

impl EndpointFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the socket file.  Returns `true` for the one call that
    /// performed the removal.
    pub fn remove_once(&self) -> bool {
        if self.removed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(endpoint = %self.path.display(), "endpoint removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(endpoint = %self.path.display(), "endpoint already gone");
            }
            Err(e) => warn!(endpoint = %self.path.display(), "failed to remove endpoint: {e}"),
        }
        true
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// A bound rendezvous endpoint, ready to accept producers.
#[derive(Debug)]
pub struct RelayListener {
    listener: UnixListener,
    endpoint: Arc<EndpointFile>,
}

impl RelayListener {
    /// Binds the endpoint at `path` and applies `mode` to the socket file.
    ///
    /// A stale socket left by an earlier run is removed first.  Any other
    /// kind of file at `path` is left alone, and binding then fails.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`BrokerError::EndpointBind`] if the socket cannot be created,
    /// [`BrokerError::EndpointPermissions`] if its mode cannot be set.
    pub fn bind(path: &Path, mode: u32) -> Result<Self, BrokerError> {
        remove_stale_socket(path);

        let listener = UnixListener::bind(path).map_err(|source| BrokerError::EndpointBind {
            path: path.to_path_buf(),
            source,
        })?;
        let endpoint = Arc::new(EndpointFile::new(path.to_path_buf()));

        if let Err(source) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            endpoint.remove_once();
            return Err(BrokerError::EndpointPermissions {
                path: path.to_path_buf(),
                mode,
                source,
            });
        }

        info!(endpoint = %path.display(), mode = %format!("{mode:o}"), "endpoint bound");
        Ok(Self { listener, endpoint })
    }

    pub fn endpoint(&self) -> Arc<EndpointFile> {
        Arc::clone(&self.endpoint)
    }

    /// Accepts producers until the stop flag is set, then winds down every
    /// session and removes the endpoint.
    pub async fn run(self, ctx: Arc<BrokerContext>, poll_interval: Duration) {
        let mut sessions = JoinSet::new();
        info!(endpoint = %self.endpoint.path().display(), "accepting producers");

        loop {
            while let Some(finished) = sessions.try_join_next() {
                log_join_error(finished);
            }

            let accepted = tokio::select! {
                biased;
                _ = ctx.stop.triggered() => break,
                accepted = timeout(poll_interval, self.listener.accept()) => accepted,
            };

            match accepted {
                Ok(Ok((stream, _addr))) => {
                    let peer = describe_peer(&stream);
                    let guard = match ctx.registry.register(peer) {
                        Ok(guard) => guard,
                        Err(e) => {
                            debug!("refusing producer: {e}");
                            continue;
                        }
                    };
                    sessions.spawn(handle_producer(stream, guard, Arc::clone(&ctx)));
                }
                Ok(Err(e)) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
                Err(_) => {
                    // Poll timeout; loop back to re-check the stop flag.
                }
            }
        }

        info!("accept loop stopping");
        let signalled = ctx.registry.close_all();
        debug!(sessions = signalled, "close requested for live sessions");

        let drained = timeout(ctx.shutdown_timeout, async {
            while let Some(finished) = sessions.join_next().await {
                log_join_error(finished);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "sessions did not finish within {:?}; aborting",
                ctx.shutdown_timeout
            );
            sessions.abort_all();
        }

        drop(self.listener);
        self.endpoint.remove_once();
    }
}

fn remove_stale_socket(path: &Path) {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => match std::fs::remove_file(path) {
            Ok(()) => info!(endpoint = %path.display(), "removed stale endpoint"),
            Err(e) => warn!(endpoint = %path.display(), "could not remove stale endpoint: {e}"),
        },
        Ok(_) => warn!(endpoint = %path.display(), "path exists and is not a socket"),
        Err(_) => {}
    }
}

fn describe_peer(stream: &UnixStream) -> String {
    match stream.peer_cred() {
        Ok(cred) => match cred.pid() {
            Some(pid) => format!("uid={} pid={pid}", cred.uid()),
            None => format!("uid={}", cred.uid()),
        },
        Err(_) => "unknown".to_string(),
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("session task panicked: {e}");
        }
    }
}

/// Session task body.  The guard is dropped on return, which deregisters
/// the session.
async fn handle_producer(stream: UnixStream, mut guard: SessionGuard, ctx: Arc<BrokerContext>) {
    let session = guard.id();
    debug!(%session, "producer connected");

    let outcome = run_session(
        stream,
        ctx.transport.as_ref(),
        &mut guard,
        &ctx.stop,
        ctx.max_line_len,
    )
    .await;

    let stats = outcome.stats;
    match outcome.end {
        SessionEnd::ProducerDisconnected => debug!(
            %session, acked = stats.acked, nacked = stats.nacked, errored = stats.errored,
            "producer disconnected"
        ),
        SessionEnd::ReplyFailed => debug!(%session, "producer stopped reading replies"),
        SessionEnd::ShutdownRequested | SessionEnd::ClosedByRegistry => {
            debug!(%session, "session closed for shutdown")
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
