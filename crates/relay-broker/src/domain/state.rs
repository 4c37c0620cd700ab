//! Transport connection states.

use std::fmt;
use std::time::SystemTime;

/// State of the single downstream link.
///
/// ```text
///  Disconnected ──open──▶ Connecting ──ok──▶ Connected
///       ▲                     │                  │
///       └──────── failed ─────┘  write / probe ──┘
///                                    failure
///
///  any state ── shutdown ──▶ Closed
/// ```
///
/// `Closed` is inert: nothing leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl TransportState {
    /// `true` only for [`TransportState::Connected`].
    pub fn accepts_writes(self) -> bool {
        self == TransportState::Connected
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Disconnected => "disconnected",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatus {
    pub state: TransportState,
    /// Device identifier, usually its path.
    pub device: String,
    /// Time of the last write that reached the device.
    pub last_write: Option<SystemTime>,
    /// Successful opens since start-up.
    pub connects: u64,
    /// Links dropped after a write or liveness failure.
    pub losses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_accepts_writes() {
        assert!(TransportState::Connected.accepts_writes());
        assert!(!TransportState::Disconnected.accepts_writes());
        assert!(!TransportState::Connecting.accepts_writes());
        assert!(!TransportState::Closed.accepts_writes());
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(TransportState::Connecting.to_string(), "connecting");
    }
}
