//! Downstream serial devices.
//!
//! The transport manager never opens files itself; it goes through
//! [`SerialDevice`].  [`TtyDevice`] is the real thing (an RFCOMM or USB
//! serial node under `/dev`), [`memory::MemoryDevice`] is an in-process
//! stand-in whose availability can be switched at will.

pub mod memory;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

pub use memory::MemoryDevice;

/// An open, writable link to the device.
pub type SerialLink = Box<dyn AsyncWrite + Send + Unpin>;

/// A serial-like byte sink that can disappear and come back.
#[async_trait]
pub trait SerialDevice: Send + Sync {
    /// Identifier used in logs and errors, usually the device path.
    fn identifier(&self) -> String;

    /// Cheap presence check.  `false` means there is nothing to open, as
    /// opposed to an open that fails.
    async fn is_present(&self) -> bool;

    /// Opens a new write handle.
    async fn open(&self) -> io::Result<SerialLink>;
}

/// A device node on the filesystem, e.g. `/dev/rfcomm0`.
///
/// An RFCOMM binding removes its node when the remote end goes away, so a
/// metadata probe on the path is enough to notice a lost link between
/// writes.
#[derive(Debug, Clone)]
pub struct TtyDevice {
    path: PathBuf,
}

impl TtyDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SerialDevice for TtyDevice {
    fn identifier(&self) -> String {
        self.path.display().to_string()
    }

    async fn is_present(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }

    async fn open(&self) -> io::Result<SerialLink> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await?;
        Ok(Box::new(file))
    }
}
