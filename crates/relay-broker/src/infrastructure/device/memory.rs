//! In-memory serial device.
//!
//! `MemoryDevice` behaves like a device node that can be unplugged, refuse
//! to open, fail or stall writes.  Clones share state, so a test keeps one
//! handle to flip conditions while the transport manager owns another.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::{SerialDevice, SerialLink};

#[derive(Debug)]
struct MemoryState {
    present: bool,
    fail_open: bool,
    fail_writes: bool,
    stall_writes: bool,
    open_delay: Option<Duration>,
    /// Bumped when the device disappears; links from an older generation
    /// are dead.
    generation: u64,
    opens: u64,
    written: Vec<u8>,
}

/// Shared-state in-memory device.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevice {
    /// Creates a present, healthy device.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState {
                present: true,
                fail_open: false,
                fail_writes: false,
                stall_writes: false,
                open_delay: None,
                generation: 0,
                opens: 0,
                written: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plugs or unplugs the device.  Unplugging kills every open link.
    pub fn set_present(&self, present: bool) {
        let mut state = self.lock();
        if state.present && !present {
            state.generation += 1;
        }
        state.present = present;
    }

    /// Makes `open` fail while the device stays present.
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Makes writes on open links fail with `BrokenPipe`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Makes writes on open links never complete.
    pub fn set_stall_writes(&self, stall: bool) {
        self.lock().stall_writes = stall;
    }

    /// Delays every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.lock().open_delay = delay;
    }

    /// Number of `open` calls so far, successful or not.
    pub fn open_count(&self) -> u64 {
        self.lock().opens
    }

    /// Everything written so far, raw.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Everything written so far, split into terminated lines.
    pub fn lines(&self) -> Vec<String> {
        let state = self.lock();
        String::from_utf8_lossy(&state.written)
            .split_terminator('\n')
            .map(str::to_owned)
            .collect()
    }
}

#[async_trait]
impl SerialDevice for MemoryDevice {
    fn identifier(&self) -> String {
        self.name.clone()
    }

    async fn is_present(&self) -> bool {
        self.lock().present
    }

    async fn open(&self) -> io::Result<SerialLink> {
        let delay = self.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.opens += 1;
        if !state.present {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        if state.fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "open refused"));
        }
        Ok(Box::new(MemoryLink {
            generation: state.generation,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Write handle returned by [`MemoryDevice::open`].
struct MemoryLink {
    generation: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl AsyncWrite for MemoryLink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.present || state.generation != self.generation || state.fail_writes {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        if state.stall_writes {
            // Never woken; the caller's timeout is expected to fire.
            return Poll::Pending;
        }
        state.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_written_bytes_are_recorded_as_lines() {
        let device = MemoryDevice::new("mem0");
        let mut link = device.open().await.unwrap();

        link.write_all(b"one\ntwo\n").await.unwrap();

        assert_eq!(device.lines(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(device.open_count(), 1);
    }

    #[tokio::test]
    async fn test_unplugging_kills_open_links() {
        // Arrange
        let device = MemoryDevice::new("mem0");
        let mut link = device.open().await.unwrap();

        // Act
        device.set_present(false);
        device.set_present(true);

        // Assert: the old link stays dead, a fresh one works
        assert!(link.write_all(b"x\n").await.is_err());
        let mut fresh = device.open().await.unwrap();
        assert!(fresh.write_all(b"y\n").await.is_ok());
    }

    #[tokio::test]
    async fn test_absent_device_cannot_be_opened() {
        let device = MemoryDevice::new("mem0");
        device.set_present(false);

        let err = device.open().await.err().unwrap();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!device.is_present().await);
    }

    #[tokio::test]
    async fn test_fail_open_keeps_device_present() {
        let device = MemoryDevice::new("mem0");
        device.set_fail_open(true);

        assert!(device.is_present().await);
        assert!(device.open().await.is_err());
    }
}
