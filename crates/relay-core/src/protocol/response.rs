//! Broker → producer reply codes.

use std::fmt;

use thiserror::Error;

const ACK: &str = "ACK";
const NACK: &str = "NACK";
const ERROR_PREFIX: &str = "ERROR:";

/// The only values a producer ever observes in reply to a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The transport write succeeded.
    Ack,
    /// The transport is unavailable or the write failed.  The producer may
    /// retry the same line.
    Nack,
    /// The line could not be processed at all.
    Error(String),
}

/// A reply line that is not one of `ACK`, `NACK`, `ERROR:<reason>`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognised reply line: {0:?}")]
pub struct ResponseParseError(pub String);

impl Response {
    /// Builds an `ERROR:` reply from anything displayable.
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::Error(reason.to_string())
    }

    /// Encodes the reply as a complete wire line, terminator included.
    ///
    /// Line breaks inside an error reason are replaced by spaces so one reply
    /// is always exactly one line.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Parses one reply line.  A trailing terminator and whitespace are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseParseError`] for anything that is not a reply code.
    pub fn parse(line: &str) -> Result<Self, ResponseParseError> {
        let line = line.trim();
        match line {
            ACK => Ok(Self::Ack),
            NACK => Ok(Self::Nack),
            _ => line
                .strip_prefix(ERROR_PREFIX)
                .map(|reason| Self::Error(reason.trim_start().to_string()))
                .ok_or_else(|| ResponseParseError(line.to_string())),
        }
    }

    /// `true` for [`Response::Ack`].
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => f.write_str(ACK),
            Self::Nack => f.write_str(NACK),
            Self::Error(reason) => {
                let reason = reason.replace(['\r', '\n'], " ");
                write!(f, "{ERROR_PREFIX}{reason}")
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
