//! # relay-core
//!
//! Shared library for the beacon relay containing the line-oriented wire
//! protocol and the conventional event payload.
//!
//! This crate is used by both the broker and the producer client.  It has no
//! dependencies on sockets, serial devices, or an async runtime.
//!
//! # Architecture overview
//!
//! Beacon scanners ("producers") report each detection as one line of text.
//! They connect to a local broker over a Unix socket, send the line, and get
//! exactly one reply line back.  The broker forwards accepted lines to a single
//! serial-like transport whose availability comes and goes.
//!
//! ```text
//! producer ──"{...}\n"──►  broker  ──"{...}\n"──►  /dev/rfcomm0
//! producer ◄──"ACK\n"───   broker
//! ```
//!
//! This crate defines:
//!
//! - **`protocol`** – How request lines are split out of a byte stream
//!   ([`LineBuffer`]) and what the broker may answer ([`Response`]).
//!
//! - **`event`** – The JSON payload that producers conventionally send
//!   ([`BeaconEvent`]).  The broker never looks inside it.

pub mod event;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Response` instead of `relay_core::protocol::response::Response`.
pub use event::{BeaconEvent, SUBJECT_BEACON_DETECTED};
pub use protocol::framing::{FramingError, LineBuffer, DEFAULT_MAX_LINE_LEN, TERMINATOR};
pub use protocol::response::{Response, ResponseParseError};
