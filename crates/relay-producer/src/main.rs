//! relay-send — push beacon events to a running relay broker.
//!
//! # Usage
//!
//! ```text
//! # One beacon_detected event built from flags
//! relay-send --mac AA:BB:CC:DD:EE:FF --name tag-42 --rssi -67
//!
//! # Every stdin line relayed as-is
//! scanner | relay-send
//! ```
//!
//! Each reply (`ACK`, `NACK`, `ERROR:<reason>`) is printed on stdout.  The
//! exit status is non-zero if any reply was not `ACK`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use relay_core::{BeaconEvent, Response};
use relay_producer::{ProducerClient, ProducerConfig};

/// Sends beacon events to a relay broker.
#[derive(Debug, Parser)]
#[command(
    name = "relay-send",
    about = "Sends beacon events to a relay broker and prints its replies",
    version
)]
struct Cli {
    /// Path of the broker's rendezvous socket.
    #[arg(long, default_value = "/tmp/bluetooth_sender.sock", env = "RELAY_ENDPOINT")]
    endpoint: PathBuf,

    /// How long to wait for each reply, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    reply_timeout_ms: u64,

    /// MAC address of the detected beacon.  Without it, stdin lines are sent.
    #[arg(long)]
    mac: Option<String>,

    /// Advertised device name.
    #[arg(long, requires = "mac")]
    name: Option<String>,

    /// Device class, e.g. `0x5a020c`.
    #[arg(long, requires = "mac")]
    class: Option<String>,

    /// Signal strength in dBm.
    #[arg(long, requires = "mac", allow_negative_numbers = true)]
    rssi: Option<f64>,
}

impl Cli {
    fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            endpoint_path: self.endpoint.clone(),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            ..ProducerConfig::default()
        }
    }

    /// The event described by the flags, if `--mac` was given.
    fn event(&self) -> Option<BeaconEvent> {
        let mac = self.mac.as_ref()?;
        let mut event = BeaconEvent::detected(mac.clone());
        if let Some(name) = &self.name {
            event = event.with_name(name.clone());
        }
        if let Some(class) = &self.class {
            event = event.with_class(class.clone());
        }
        if let Some(rssi) = self.rssi {
            event = event.with_rssi(rssi);
        }
        Some(event)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut client = ProducerClient::new(cli.producer_config());
    let mut all_acked = true;

    if let Some(event) = cli.event() {
        let reply = client.send_event(&event).await.context("failed to send event")?;
        all_acked &= report(&reply);
    } else {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
            let reply = client.send_line(&line).await.context("failed to send line")?;
            all_acked &= report(&reply);
        }
    }

    Ok(if all_acked {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints the reply and returns whether it was an `ACK`.
fn report(reply: &Response) -> bool {
    println!("{reply}");
    reply.is_ack()
}
