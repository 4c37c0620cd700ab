//! Idempotent shutdown.
//!
//! [`ShutdownCoordinator::shutdown`] is the single exit path, called from
//! signal handling and from normal teardown alike.  The first caller starts
//! the work on its own task; every caller, the first included, then waits
//! for that task to finish.  A caller that is cancelled (dropped by a
//! `select!` or a `timeout`) leaves the work running, so later callers still
//! return.
//!
//! Order of operations:
//!
//! 1. set the stop flag (accept loop, sessions and monitor all watch it),
//! 2. ask every registered session to close,
//! 3. close the transport and force it inert,
//! 4. wait for the background tasks, bounded by the shutdown timeout, and
//!    abort whatever is still running after that,
//! 5. remove the endpoint file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::application::{RelayTransport, SessionRegistry, StopSignal};
use crate::infrastructure::EndpointFile;

pub struct ShutdownCoordinator {
    work: Arc<ShutdownWork>,
    started: AtomicBool,
}

struct ShutdownWork {
    stop: StopSignal,
    registry: SessionRegistry,
    transport: Arc<dyn RelayTransport>,
    endpoint: Arc<EndpointFile>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    timeout: Duration,
    done: watch::Sender<bool>,
}

/// Marks shutdown complete when dropped, including when the work task
/// panics or is torn down with the runtime.
struct MarkDone<'a>(&'a watch::Sender<bool>);

impl Drop for MarkDone<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl ShutdownCoordinator {
    pub fn new(
        stop: StopSignal,
        registry: SessionRegistry,
        transport: Arc<dyn RelayTransport>,
        endpoint: Arc<EndpointFile>,
        tasks: Vec<JoinHandle<()>>,
        timeout: Duration,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            work: Arc::new(ShutdownWork {
                stop,
                registry,
                transport,
                endpoint,
                tasks: Mutex::new(tasks),
                timeout,
                done,
            }),
            started: AtomicBool::new(false),
        }
    }

    /// Shuts the broker down.  Safe to call any number of times, from any
    /// number of tasks, and safe to cancel.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn shutdown(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("shutdown already in progress; waiting");
        } else {
            let work = Arc::clone(&self.work);
            tokio::spawn(async move { work.run().await });
        }

        let mut done = self.work.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await.map(|_| ());
    }

    /// `true` once the shutdown work has finished.
    pub fn is_complete(&self) -> bool {
        *self.work.done.borrow()
    }
}

impl ShutdownWork {
    async fn run(&self) {
        let _done = MarkDone(&self.done);

        info!("shutting down");
        self.stop.trigger();
        let sessions = self.registry.close_all();
        self.transport.close().await;

        let deadline = Instant::now() + self.timeout;
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for mut task in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!("background task did not stop within {:?}; aborting", self.timeout);
                task.abort();
            }
        }

        self.endpoint.remove_once();
        info!(sessions, "shutdown complete");
    }
}
