//! Beacon relay broker — entry point.
//!
//! Listens on a local Unix socket for newline-delimited beacon events from
//! any number of producer processes (pairing agents, GPIO scanners, UART
//! readers) and forwards each line to one serial transport, typically an
//! RFCOMM binding at `/dev/rfcomm0`.
//!
//! # Usage
//!
//! ```text
//! relay-broker [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML config file
//!   --endpoint <PATH>             Rendezvous socket path [default: /tmp/bluetooth_sender.sock]
//!   --device <PATH>               Serial device path [default: /dev/rfcomm0]
//!   --mode <OCTAL>                Socket permission bits [default: 600]
//!   --world-writable              Let every local user connect (mode 777)
//!   --monitor-interval-ms <MS>    Reconnect / liveness check period [default: 5000]
//!   --max-line-len <BYTES>        Longest accepted event line [default: 4096]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence, then environment variables, then the config
//! file, then built-in defaults.
//!
//! | Variable                    | Equivalent flag          |
//! |-----------------------------|--------------------------|
//! | `RELAY_CONFIG`              | `--config`               |
//! | `RELAY_ENDPOINT`            | `--endpoint`             |
//! | `RELAY_DEVICE`              | `--device`               |
//! | `RELAY_ENDPOINT_MODE`       | `--mode`                 |
//! | `RELAY_MONITOR_INTERVAL_MS` | `--monitor-interval-ms`  |
//! | `RELAY_MAX_LINE_LEN`        | `--max-line-len`         |
//!
//! `RUST_LOG` overrides the `[logging] level` from the config file.
//!
//! # Signals
//!
//! SIGINT and SIGTERM both run the shutdown coordinator: sessions are
//! closed, the transport is released and the socket file is removed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_broker::domain::config::{FileConfig, WORLD_WRITABLE_MODE};
use relay_broker::infrastructure::TtyDevice;
use relay_broker::{BrokerConfig, RelayBroker};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Beacon relay broker.
///
/// Relays newline-delimited events from local producers to one serial
/// transport and answers each with ACK, NACK or ERROR.
#[derive(Debug, Parser)]
#[command(
    name = "relay-broker",
    about = "Relays beacon events from local producers to a serial transport",
    version
)]
struct Cli {
    /// TOML configuration file.  Every field in it is optional.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Path of the rendezvous Unix socket.
    #[arg(long, env = "RELAY_ENDPOINT")]
    endpoint: Option<PathBuf>,

    /// Serial device the events are written to.
    #[arg(long, env = "RELAY_DEVICE")]
    device: Option<PathBuf>,

    /// Permission bits for the socket file, in octal (`600`, `0660`, `0o777`).
    #[arg(
        long,
        env = "RELAY_ENDPOINT_MODE",
        value_parser = parse_mode,
        conflicts_with = "world_writable"
    )]
    mode: Option<u32>,

    /// Make the socket connectable by every local user (mode 777).
    ///
    /// Any local process can then push lines onto the serial link.
    #[arg(long)]
    world_writable: bool,

    /// How often the transport monitor reconnects or probes the device.
    #[arg(long, env = "RELAY_MONITOR_INTERVAL_MS")]
    monitor_interval_ms: Option<u64>,

    /// Longest accepted event line in bytes.
    #[arg(long, env = "RELAY_MAX_LINE_LEN")]
    max_line_len: Option<usize>,
}

impl Cli {
    /// Layers the CLI over the config file (if any) over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration does not validate.
    fn into_broker_config(self) -> anyhow::Result<BrokerConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => FileConfig::default(),
        };
        let mut config = file.into_broker_config();

        if let Some(endpoint) = self.endpoint {
            config.endpoint_path = endpoint;
        }
        if let Some(device) = self.device {
            config.device_path = device;
        }
        if self.world_writable {
            config.endpoint_mode = WORLD_WRITABLE_MODE;
        } else if let Some(mode) = self.mode {
            config.endpoint_mode = mode;
        }
        if let Some(ms) = self.monitor_interval_ms {
            config.monitor_interval = Duration::from_millis(ms);
        }
        if let Some(len) = self.max_line_len {
            config.max_line_len = len;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Parses an octal permission mode, with or without a `0o` prefix.
fn parse_mode(raw: &str) -> Result<u32, String> {
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    let mode =
        u32::from_str_radix(digits, 8).map_err(|e| format!("'{raw}' is not an octal mode: {e}"))?;
    if mode > 0o777 {
        return Err(format!("mode {raw} has bits outside 777"));
    }
    Ok(mode)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_broker_config()?;

    // `RUST_LOG` wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.endpoint_mode & 0o077 != 0 {
        warn!(
            "endpoint mode {:o} lets other local users relay events to {}",
            config.endpoint_mode,
            config.device_path.display()
        );
    }

    let device = Arc::new(TtyDevice::new(&config.device_path));
    let broker = RelayBroker::start(&config, device).context("failed to start relay broker")?;

    wait_for_termination().await;
    broker.shutdown().await;

    info!("relay broker stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_termination() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => info!("received SIGINT; shutting down"),
        _ = terminate => info!("received SIGTERM; shutting down"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
