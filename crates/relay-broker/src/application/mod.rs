//! Application layer for relay-broker.
//!
//! The relay's behaviour independent of any particular socket or device:
//! the stop flag, the session registry, and the per-producer protocol loop.
//! Streams and transports arrive through generics and the
//! [`RelayTransport`] trait, so everything here runs against in-memory
//! fakes in tests.

pub mod context;
pub mod registry;
pub mod session;
pub mod stop;

pub use context::BrokerContext;
pub use registry::{SessionGuard, SessionRegistry};
pub use session::{run_session, RelayTransport, SessionEnd, SessionOutcome, SessionStats};
pub use stop::StopSignal;
