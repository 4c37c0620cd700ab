//! Domain layer for relay-broker.
//!
//! Pure types with no I/O: runtime configuration, the error taxonomy, and the
//! transport state machine's states.  Everything that touches sockets, files
//! or timers lives in `infrastructure`.

pub mod config;
pub mod error;
pub mod state;

pub use config::{BrokerConfig, ConfigError, FileConfig};
pub use error::{BrokerError, TransportError};
pub use state::{TransportState, TransportStatus};
