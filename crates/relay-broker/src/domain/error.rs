//! Error types for the broker.
//!
//! Only [`BrokerError`] can stop the process, and only at start-up.  A
//! [`TransportError`] is expected and recurring; sessions turn it into a
//! `NACK` reply and carry on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::config::ConfigError;

/// Errors that prevent the broker from providing service.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The rendezvous socket could not be created (permission denied, parent
    /// directory missing, path held by a non-socket file).
    #[error("failed to bind rendezvous endpoint {path}: {source}")]
    EndpointBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The socket was bound but its permissions could not be applied.
    #[error("failed to set mode {mode:o} on rendezvous endpoint {path}: {source}")]
    EndpointPermissions {
        path: PathBuf,
        mode: u32,
        #[source]
        source: std::io::Error,
    },

    /// The broker was asked to start work after shutdown began.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a single write to the downstream transport did not succeed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is not currently `Connected`; the monitor will retry.
    #[error("transport {device} is unavailable")]
    Unavailable { device: String },

    /// The write reached the device and the device reported an error.  The
    /// link has been dropped.
    #[error("write to {device} failed: {source}")]
    WriteFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// The write did not complete in time.  The link has been dropped.
    #[error("write to {device} timed out after {timeout:?}")]
    WriteTimedOut { device: String, timeout: Duration },

    /// The transport has been closed for shutdown.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl TransportError {
    /// `true` for the shutdown variant, which ends the session instead of
    /// being reported and retried.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::ShutdownInProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_the_path() {
        let err = BrokerError::EndpointBind {
            path: PathBuf::from("/run/relay.sock"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/run/relay.sock"));
    }

    #[test]
    fn test_permissions_error_formats_mode_in_octal() {
        let err = BrokerError::EndpointPermissions {
            path: PathBuf::from("/tmp/x.sock"),
            mode: 0o660,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("660"));
    }

    #[test]
    fn test_only_shutdown_variant_is_shutdown() {
        assert!(TransportError::ShutdownInProgress.is_shutdown());
        assert!(!TransportError::Unavailable {
            device: "/dev/rfcomm0".into()
        }
        .is_shutdown());
    }
}
