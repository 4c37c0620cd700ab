//! relay-broker library crate.
//!
//! A local rendezvous broker: any number of producer processes connect to a
//! Unix socket and send newline-delimited beacon events; the broker forwards
//! each line to one serial transport and answers `ACK`, `NACK` or
//! `ERROR:<reason>`.
//!
//! # Architecture
//!
//! ```text
//! Producers (lines over a Unix socket)
//!         ↕
//! [relay-broker]
//!   ├── domain/           BrokerConfig, error taxonomy, transport states
//!   ├── application/      stop flag, session registry, session protocol
//!   ├── infrastructure/
//!   │     ├── device/     SerialDevice seam (tty node, in-memory)
//!   │     ├── transport   reconnecting TransportManager
//!   │     └── listener    endpoint bind + accept loop
//!   ├── broker            RelayBroker: wires the layers and starts tasks
//!   └── shutdown          idempotent ShutdownCoordinator
//!         ↓
//! Serial device (e.g. /dev/rfcomm0)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and `relay-core`; the transport is
//!   reached through the `RelayTransport` trait.
//! - `infrastructure` depends on the layers above plus `tokio`.

/// Domain layer: configuration, errors, transport states.
pub mod domain;

/// Application layer: sessions, registry, stop flag.
pub mod application;

/// Infrastructure layer: device, transport manager, listener.
pub mod infrastructure;

pub mod broker;
pub mod shutdown;

pub use broker::RelayBroker;
pub use domain::{BrokerConfig, BrokerError, TransportError, TransportState};
pub use shutdown::ShutdownCoordinator;
