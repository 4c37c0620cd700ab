//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from, in increasing precedence:
//!
//! 1. built-in defaults ([`BrokerConfig::default`]),
//! 2. an optional TOML file ([`FileConfig`]),
//! 3. environment variables and CLI flags (applied in `main.rs`).
//!
//! # TOML file layout
//!
//! Every table and every field is optional.  Durations are milliseconds.
//!
//! ```toml
//! [endpoint]
//! path = "/tmp/bluetooth_sender.sock"
//! mode = 0o600            # 0o777 lets every local user connect
//! accept_poll_ms = 1000
//!
//! [transport]
//! device = "/dev/rfcomm0"
//! monitor_interval_ms = 5000
//! open_timeout_ms = 2000
//! write_timeout_ms = 2000
//!
//! [session]
//! max_line_len = 4096
//! shutdown_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Endpoint permissions
//!
//! Producers are separate processes, often running as other users (a D-Bus
//! agent as root, a GPIO scanner as `pi`).  A socket only they can reach
//! needs a wider mode than the owner-only default.  Widening it is a trust
//! decision: any local user who can connect can push lines onto the serial
//! link.  It is therefore never implicit; set `mode` or pass
//! `--world-writable`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use relay_core::DEFAULT_MAX_LINE_LEN;

/// Owner read/write only.
pub const DEFAULT_ENDPOINT_MODE: u32 = 0o600;

/// Read/write/execute for every local user.
pub const WORLD_WRITABLE_MODE: u32 = 0o777;

const DEFAULT_ENDPOINT_PATH: &str = "/tmp/bluetooth_sender.sock";
const DEFAULT_DEVICE_PATH: &str = "/dev/rfcomm0";
const DEFAULT_ACCEPT_POLL_MS: u64 = 1_000;
const DEFAULT_MONITOR_INTERVAL_MS: u64 = 5_000;
const DEFAULT_OPEN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// All runtime configuration for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Filesystem path of the rendezvous Unix socket.
    pub endpoint_path: PathBuf,

    /// Permission bits applied to the socket file after binding.
    pub endpoint_mode: u32,

    /// How long one `accept()` may block before the stop flag is re-checked.
    pub accept_poll_interval: Duration,

    /// Path of the downstream serial device.
    pub device_path: PathBuf,

    /// Period of the transport monitor (reconnect attempts and liveness
    /// checks).
    pub monitor_interval: Duration,

    /// Upper bound on one attempt to open the device.
    pub open_timeout: Duration,

    /// Upper bound on one write (including flush) to the device.
    pub write_timeout: Duration,

    /// Longest accepted request line, terminator excluded.
    pub max_line_len: usize,

    /// How long shutdown waits for sessions and the accept loop to finish.
    pub shutdown_timeout: Duration,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for BrokerConfig {
    /// | Field                | Default                        |
    /// |----------------------|--------------------------------|
    /// | endpoint_path        | `/tmp/bluetooth_sender.sock`   |
    /// | endpoint_mode        | `0o600`                        |
    /// | accept_poll_interval | 1 second                       |
    /// | device_path          | `/dev/rfcomm0`                 |
    /// | monitor_interval     | 5 seconds                      |
    /// | open_timeout         | 2 seconds                      |
    /// | write_timeout        | 2 seconds                      |
    /// | max_line_len         | 4096 bytes                     |
    /// | shutdown_timeout     | 5 seconds                      |
    /// | log_level            | `info`                         |
    fn default() -> Self {
        FileConfig::default().into_broker_config()
    }
}

impl BrokerConfig {
    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("endpoint path must not be empty".into()));
        }
        if self.device_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("device path must not be empty".into()));
        }
        if self.endpoint_mode > 0o777 {
            return Err(ConfigError::Invalid(format!(
                "endpoint mode {:o} has bits outside 0o777",
                self.endpoint_mode
            )));
        }
        if self.max_line_len == 0 {
            return Err(ConfigError::Invalid("max_line_len must be at least 1".into()));
        }
        let durations = [
            ("accept_poll_ms", self.accept_poll_interval),
            ("monitor_interval_ms", self.monitor_interval),
            ("open_timeout_ms", self.open_timeout),
            ("write_timeout_ms", self.write_timeout),
            ("shutdown_timeout_ms", self.shutdown_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

// ── TOML schema ───────────────────────────────────────────────────────────────

/// On-disk configuration, as read from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: EndpointSection,
    pub transport: TransportSection,
    pub session: SessionSection,
    pub logging: LoggingSection,
}

/// `[endpoint]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EndpointSection {
    #[serde(default = "default_endpoint_path")]
    pub path: PathBuf,
    #[serde(default = "default_endpoint_mode")]
    pub mode: u32,
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,
}

/// `[transport]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    #[serde(default = "default_device_path")]
    pub device: PathBuf,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// `[session]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_endpoint_path() -> PathBuf {
    PathBuf::from(DEFAULT_ENDPOINT_PATH)
}
fn default_endpoint_mode() -> u32 {
    DEFAULT_ENDPOINT_MODE
}
fn default_accept_poll_ms() -> u64 {
    DEFAULT_ACCEPT_POLL_MS
}
fn default_device_path() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE_PATH)
}
fn default_monitor_interval_ms() -> u64 {
    DEFAULT_MONITOR_INTERVAL_MS
}
fn default_open_timeout_ms() -> u64 {
    DEFAULT_OPEN_TIMEOUT_MS
}
fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}
fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}
fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            path: default_endpoint_path(),
            mode: default_endpoint_mode(),
            accept_poll_ms: default_accept_poll_ms(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            device: default_device_path(),
            monitor_interval_ms: default_monitor_interval_ms(),
            open_timeout_ms: default_open_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_line_len: default_max_line_len(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not valid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Converts the file schema into the runtime configuration.
    pub fn into_broker_config(self) -> BrokerConfig {
        BrokerConfig {
            endpoint_path: self.endpoint.path,
            endpoint_mode: self.endpoint.mode,
            accept_poll_interval: Duration::from_millis(self.endpoint.accept_poll_ms),
            device_path: self.transport.device,
            monitor_interval: Duration::from_millis(self.transport.monitor_interval_ms),
            open_timeout: Duration::from_millis(self.transport.open_timeout_ms),
            write_timeout: Duration::from_millis(self.transport.write_timeout_ms),
            max_line_len: self.session.max_line_len,
            shutdown_timeout: Duration::from_millis(self.session.shutdown_timeout_ms),
            log_level: self.logging.level,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
