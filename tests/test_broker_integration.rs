//! Integration tests with a real MQTT broker
//!
//! Assumes a broker at localhost:1883. Run explicitly with
//! `cargo test --test test_broker_integration -- --ignored`.

use printago_connector::host::HostServices;
use printago_connector::protocol::messages::ResponseEnvelope;
use printago_connector::testing::mocks::{
    MockFileStorage, MockPrinter, MockWebcamRegistry, PrinterCall,
};
use printago_connector::{Bridge, BridgeConfig, ConnectionState};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const MQTT_BROKER_URL: &str = "mqtt://localhost:1883";

fn broker_config(printer_id: &str) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.broker.url = Some(MQTT_BROKER_URL.to_string());
    config.printago.printer_id = printer_id.to_string();
    config.printago.command_topic = format!("printago-it/{printer_id}/commands");
    config
}

async fn wait_connected(bridge: &Bridge) {
    for _ in 0..100 {
        if bridge.connection_state() == ConnectionState::Connected {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("bridge did not connect to {MQTT_BROKER_URL}");
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires a broker at localhost:1883
async fn test_command_round_trip_through_real_broker() {
    // Arrange: bridge with a mock printer
    let printer = Arc::new(MockPrinter::new());
    let host = HostServices {
        printer: printer.clone(),
        files: Arc::new(MockFileStorage::new()),
        webcams: Arc::new(MockWebcamRegistry::new()),
    };
    let config = broker_config("it-round-trip");
    let command_topic = config.printago.command_topic.clone();
    let bridge = Bridge::new(config, host).unwrap();
    bridge.start();
    wait_connected(&bridge).await;

    // Arrange: an independent client listening for replies
    let mut options = MqttOptions::new("printago-it-observer", "localhost", 1883);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    client
        .subscribe("octoprint/success", QoS::AtLeastOnce)
        .await
        .unwrap();

    // Act
    let command = json!({"type": "printer_control", "action": "pause_print", "parameters": {}});
    client
        .publish(&command_topic, QoS::AtLeastOnce, false, command.to_string())
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(Event::Incoming(Packet::Publish(publish))) = eventloop.poll().await {
                if publish.topic == "octoprint/success" {
                    let envelope: ResponseEnvelope = serde_json::from_slice(&publish.payload).unwrap();
                    if envelope.printer_id == "it-round-trip" {
                        return envelope;
                    }
                }
            }
        }
    })
    .await
    .expect("success envelope within timeout");

    // Assert
    assert_eq!(reply.data, json!("Print paused command issued successfully."));
    assert_eq!(printer.calls(), vec![PrinterCall::Pause]);

    bridge.shutdown().await;
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires a broker at localhost:1883
async fn test_connected_notice_is_retained() {
    let host = HostServices {
        printer: Arc::new(MockPrinter::new()),
        files: Arc::new(MockFileStorage::new()),
        webcams: Arc::new(MockWebcamRegistry::new()),
    };
    let mut config = broker_config("it-last-will");
    config.publish.base_topic = "printago-it/last-will/".to_string();
    let bridge = Bridge::new(config, host).unwrap();
    bridge.start();
    wait_connected(&bridge).await;

    let options = MqttOptions::new("printago-it-lw-observer", "localhost", 1883);
    let (client, mut eventloop) = AsyncClient::new(options, 10);
    client
        .subscribe("printago-it/last-will/mqtt", QoS::AtLeastOnce)
        .await
        .unwrap();

    let notice = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(Event::Incoming(Packet::Publish(publish))) = eventloop.poll().await {
                return (publish.retain, String::from_utf8_lossy(&publish.payload).into_owned());
            }
        }
    })
    .await
    .expect("retained connected notice");

    assert_eq!(notice, (true, "connected".to_string()));
    bridge.shutdown().await;
}
