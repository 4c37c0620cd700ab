//! Infrastructure layer for relay-broker.
//!
//! Everything that touches the outside world: the serial device, the
//! transport manager that owns it, and the Unix-socket listener.

pub mod device;
pub mod listener;
pub mod transport;

pub use device::{MemoryDevice, SerialDevice, SerialLink, TtyDevice};
pub use listener::{EndpointFile, RelayListener};
pub use transport::{TickOutcome, TransportManager};
