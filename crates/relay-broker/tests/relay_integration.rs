//! End-to-end tests: a real broker on a Unix socket in a temp directory,
//! producers as plain `UnixStream` clients, and a `MemoryDevice` standing in
//! for the serial link.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use relay_broker::infrastructure::MemoryDevice;
use relay_broker::{BrokerConfig, BrokerError, RelayBroker, TransportState};
use relay_core::Response;

const MONITOR_INTERVAL: Duration = Duration::from_millis(25);
const BEACON: &str = r#"{"subject":"beacon_detected","mac":"AA:BB:CC:DD:EE:FF"}"#;

fn config(dir: &Path) -> BrokerConfig {
    BrokerConfig {
        endpoint_path: dir.join("relay.sock"),
        device_path: dir.join("rfcomm0"),
        monitor_interval: MONITOR_INTERVAL,
        accept_poll_interval: Duration::from_millis(20),
        open_timeout: Duration::from_millis(200),
        write_timeout: Duration::from_millis(200),
        shutdown_timeout: Duration::from_secs(1),
        ..BrokerConfig::default()
    }
}

/// One producer connection with a line reader for replies.
struct Producer {
    reader: BufReader<UnixStream>,
}

impl Producer {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.expect("connect to broker");
        Self {
            reader: BufReader::new(stream),
        }
    }

    async fn send(&mut self, line: &str) -> Response {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).await.expect("write");
        stream.write_all(b"\n").await.expect("write");
        self.reply().await
    }

    async fn reply(&mut self) -> Response {
        let mut reply = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut reply))
            .await
            .expect("reply within timeout")
            .expect("read reply");
        assert!(n > 0, "broker closed the connection instead of replying");
        Response::parse(&reply).expect("well-formed reply")
    }
}

async fn wait_for_state(broker: &RelayBroker, want: TransportState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while broker.transport().state().await != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "transport never reached {want}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_live_sessions(broker: &RelayBroker, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while broker.context().registry.live() != want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registry never reached {want} live sessions"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn start_connected(dir: &Path) -> (RelayBroker, MemoryDevice) {
    let device = MemoryDevice::new("rfcomm0");
    let broker = RelayBroker::start(&config(dir), Arc::new(device.clone())).expect("start");
    wait_for_state(&broker, TransportState::Connected).await;
    (broker, device)
}

#[tokio::test]
async fn test_event_is_acked_and_reaches_the_device() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (broker, device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;

    // Act
    let reply = producer.send(BEACON).await;

    // Assert
    assert_eq!(reply, Response::Ack);
    assert_eq!(device.lines(), vec![BEACON.to_string()]);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_disconnected_transport_nacks_and_keeps_the_session() {
    // Arrange: device absent from the start, long write timeout
    let dir = tempfile::tempdir().unwrap();
    let device = MemoryDevice::new("rfcomm0");
    device.set_present(false);
    let cfg = BrokerConfig {
        write_timeout: Duration::from_secs(2),
        open_timeout: Duration::from_secs(2),
        ..config(dir.path())
    };
    let broker = RelayBroker::start(&cfg, Arc::new(device.clone())).unwrap();
    let mut producer = Producer::connect(broker.endpoint_path()).await;

    // Act
    let started = tokio::time::Instant::now();
    let first = producer.send(BEACON).await;
    let second = producer.send(BEACON).await;
    let elapsed = started.elapsed();

    // Assert: two NACKs on the same connection, nothing written, and no
    // waiting on the write timeout or a reconnect
    assert_eq!(first, Response::Nack);
    assert_eq!(second, Response::Nack);
    assert!(
        elapsed < Duration::from_secs(1),
        "NACKs took {elapsed:?}; writes must fail fast while disconnected"
    );
    assert!(device.written().is_empty());

    broker.shutdown().await;
}

#[tokio::test]
async fn test_empty_line_gets_error_and_session_stays_open() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, _device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;

    let error = producer.send("").await;
    let after = producer.send(BEACON).await;

    assert_eq!(error, Response::Error("empty message".to_string()));
    assert_eq!(after, Response::Ack);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_producer_disconnect_removes_session_without_reply() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (broker, device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;
    assert_eq!(producer.send(BEACON).await, Response::Ack);
    wait_for_live_sessions(&broker, 1).await;

    // Act: half a line, then hang up
    producer
        .reader
        .get_mut()
        .write_all(b"{\"subject\":\"beacon_det")
        .await
        .unwrap();
    drop(producer);

    // Assert: one open, one close, partial line never forwarded
    wait_for_live_sessions(&broker, 0).await;
    let registry = &broker.context().registry;
    assert_eq!(registry.opened_total(), 1);
    assert_eq!(registry.closed_total(), 1);
    assert_eq!(device.lines().len(), 1);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_write_after_recovery_is_acked() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (broker, device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;

    // Act: unplug, let three monitor intervals pass, replug
    device.set_present(false);
    wait_for_state(&broker, TransportState::Disconnected).await;
    assert_eq!(producer.send(BEACON).await, Response::Nack);
    tokio::time::sleep(MONITOR_INTERVAL * 3).await;
    device.set_present(true);
    wait_for_state(&broker, TransportState::Connected).await;

    // Assert
    assert_eq!(producer.send(BEACON).await, Response::Ack);
    let status = broker.transport().status().await;
    assert_eq!(status.connects, 2);
    assert_eq!(status.losses, 1);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_failed_device_write_is_nacked_not_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;

    device.set_fail_writes(true);
    let reply = producer.send(BEACON).await;

    assert_eq!(reply, Response::Nack);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_producers_keep_their_own_order() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (broker, device) = start_connected(dir.path()).await;
    const K: usize = 50;

    // Act: two producers send K numbered lines each, concurrently
    let mut tasks = Vec::new();
    for name in ["a", "b"] {
        let path = broker.endpoint_path().to_path_buf();
        tasks.push(tokio::spawn(async move {
            let mut producer = Producer::connect(&path).await;
            for i in 0..K {
                let reply = producer.send(&format!("{name}-{i}")).await;
                assert_eq!(reply, Response::Ack);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Assert: each producer's lines appear in the order it sent them
    let lines = device.lines();
    assert_eq!(lines.len(), 2 * K);
    for name in ["a", "b"] {
        let seen: Vec<usize> = lines
            .iter()
            .filter_map(|l| l.strip_prefix(&format!("{name}-")))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seen, (0..K).collect::<Vec<_>>());
    }

    broker.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_removes_endpoint() {
    // Arrange: one idle producer connected
    let dir = tempfile::tempdir().unwrap();
    let (broker, _device) = start_connected(dir.path()).await;
    let mut producer = Producer::connect(broker.endpoint_path()).await;
    wait_for_live_sessions(&broker, 1).await;

    // Act
    broker.shutdown().await;

    // Assert: the producer sees EOF, the endpoint is gone, the transport inert
    let mut rest = String::new();
    let n = tokio::time::timeout(Duration::from_secs(1), producer.reader.read_line(&mut rest))
        .await
        .expect("producer must be released")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(!broker.endpoint_path().exists());
    assert_eq!(broker.transport().state().await, TransportState::Closed);
    assert_eq!(broker.context().registry.live(), 0);
    assert!(UnixStream::connect(broker.endpoint_path()).await.is_err());
}

#[tokio::test]
async fn test_concurrent_shutdown_calls_complete_once() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, _device) = start_connected(dir.path()).await;
    let coordinator = broker.coordinator();

    let other = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.shutdown().await })
    };
    broker.shutdown().await;
    other.await.unwrap();

    assert!(coordinator.is_complete());
    assert!(!broker.endpoint_path().exists());
}

#[tokio::test]
async fn test_endpoint_mode_is_applied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let cfg = BrokerConfig {
        endpoint_mode: 0o660,
        ..config(dir.path())
    };
    let broker = RelayBroker::start(&cfg, Arc::new(MemoryDevice::new("rfcomm0"))).unwrap();

    let mode = std::fs::metadata(broker.endpoint_path())
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o660);

    broker.shutdown().await;
}

#[tokio::test]
async fn test_bind_failure_is_reported_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = BrokerConfig {
        endpoint_path: dir.path().join("missing").join("relay.sock"),
        ..config(dir.path())
    };

    let result = RelayBroker::start(&cfg, Arc::new(MemoryDevice::new("rfcomm0")));

    assert!(matches!(result, Err(BrokerError::EndpointBind { .. })));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_binding() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = BrokerConfig {
        max_line_len: 0,
        ..config(dir.path())
    };

    let result = RelayBroker::start(&cfg, Arc::new(MemoryDevice::new("rfcomm0")));

    assert!(matches!(result, Err(BrokerError::Config(_))));
    assert!(!dir.path().join("relay.sock").exists());
}
