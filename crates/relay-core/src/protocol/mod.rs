//! Line-oriented relay protocol.
//!
//! Every request is one text line terminated by `\n`.  Every request receives
//! exactly one reply line:
//!
//! ```text
//! ACK\n                 transport write succeeded
//! NACK\n                transport unavailable or the write failed
//! ERROR:<reason>\n      the line could not be processed at all
//! ```

pub mod framing;
pub mod response;

pub use framing::{FramingError, LineBuffer, DEFAULT_MAX_LINE_LEN, TERMINATOR};
pub use response::{Response, ResponseParseError};
