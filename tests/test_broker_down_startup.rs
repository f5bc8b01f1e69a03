//! Startup while the broker is unreachable
//!
//! The bridge must start, keep retrying in the background and hold queued
//! publishes until a connection exists.

use printago_connector::host::HostServices;
use printago_connector::testing::mocks::{MockFileStorage, MockPrinter, MockWebcamRegistry};
use printago_connector::{Bridge, BridgeConfig, ConnectionState, PublishOptions};
use std::sync::Arc;
use std::time::Duration;

fn unreachable_broker() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    // Nothing listens on the discard port
    config.broker.url = Some("mqtt://127.0.0.1:9".to_string());
    config.printago.printer_id = "startup-retry".to_string();
    config.printago.reconnect_interval = 1;
    config
}

fn host() -> HostServices {
    HostServices {
        printer: Arc::new(MockPrinter::new()),
        files: Arc::new(MockFileStorage::new()),
        webcams: Arc::new(MockWebcamRegistry::new()),
    }
}

#[tokio::test]
async fn test_bridge_starts_when_broker_unavailable() {
    // Arrange
    let bridge = Bridge::new(unreachable_broker(), host()).unwrap();

    // Act
    bridge.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert: the bridge keeps trying
    assert_ne!(bridge.connection_state(), ConnectionState::Connected);
    assert!(bridge.metrics().snapshot().connection.attempts >= 1);

    bridge.shutdown().await;
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_queued_publishes_wait_for_broker() {
    let bridge = Bridge::new(unreachable_broker(), host()).unwrap();
    bridge.start();

    let queued = bridge.publish("octoPrint/custom", "hello", PublishOptions::default().queued());
    let dropped = bridge.publish("octoPrint/custom", "hello", PublishOptions::default());

    assert!(queued);
    assert!(!dropped);
    assert_eq!(bridge.queue_len(), 1);

    bridge.shutdown().await;
}

#[test]
fn test_start_without_runtime_stays_disconnected() {
    let bridge = Bridge::new(unreachable_broker(), host()).unwrap();

    bridge.start();

    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
    assert_eq!(bridge.metrics().snapshot().connection.attempts, 0);
}
