//! Host-to-broker publishing: temperatures, lifecycle events, metadata and progress


use printago_connector::host::{FileDestination, TemperatureReading, TemperatureUpdate};
use printago_connector::TemperatureSink;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use test_helpers::{test_config, TestBridge};

fn tool0(actual: f64, target: f64) -> TemperatureUpdate {
    let mut sensors = BTreeMap::new();
    sensors.insert("tool0".to_string(), TemperatureReading::new(Some(actual), Some(target)));
    TemperatureUpdate {
        time: Some(1_700_000_000),
        sensors,
    }
}

#[test]
fn test_temperature_threshold_suppresses_small_changes() {
    // Arrange
    let mut t = TestBridge::new(test_config());
    t.connect_clean();

    // Act
    for actual in [200.0, 200.4, 201.1] {
        t.bridge.on_temperatures(&tool0(actual, 210.0));
    }

    // Assert: 200.4 is within the 1.0 degree threshold of 200.0
    let published: Vec<Value> = t
        .published_to("octoPrint/temperature/tool0")
        .iter()
        .map(|m| m.json())
        .collect();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0]["actual"], 200.0);
    assert_eq!(published[1]["actual"], 201.1);
    assert_eq!(published[1]["target"], 210.0);
    assert_eq!(published[1]["_timestamp"], 1_700_000_000);
}

#[test]
fn test_target_change_is_published_even_without_actual_change() {
    let mut t = TestBridge::new(test_config());
    t.connect_clean();

    t.bridge.on_temperatures(&tool0(200.0, 210.0));
    t.bridge.on_temperatures(&tool0(200.0, 215.0));

    assert_eq!(t.published_to("octoPrint/temperature/tool0").len(), 2);
}

#[test]
fn test_temperatures_queue_while_disconnected() {
    // Arrange
    let mut t = TestBridge::new(test_config());

    // Act
    t.bridge.on_temperatures(&tool0(25.0, 0.0));
    assert_eq!(t.bridge.queue_len(), 1);
    t.connect();

    // Assert
    assert_eq!(t.published_to("octoPrint/temperature/tool0").len(), 1);
}

#[test]
fn test_event_payload_carries_name_and_timestamp() {
    let mut t = TestBridge::new(test_config());
    t.connect_clean();

    let published = t
        .bridge
        .on_event("Connected", Some(&json!({"port": "/dev/ttyUSB0", "baudrate": 115200})));

    assert!(published);
    let body = t.published_to("octoPrint/event/Connected")[0].json();
    assert_eq!(body["_event"], "Connected");
    assert_eq!(body["port"], "/dev/ttyUSB0");
    assert!(body["_timestamp"].is_i64());
}

#[test]
fn test_inactive_event_class_is_not_published() {
    // Arrange
    let mut config = test_config();
    config.publish.events.position = false;
    let mut t = TestBridge::new(config);
    t.connect_clean();

    // Act
    let z_change = t.bridge.on_event("ZChange", Some(&json!({"new": 0.4, "old": 0.2})));
    let paused = t.bridge.on_event("PrintPaused", None);

    // Assert
    assert!(!z_change);
    assert!(paused);
    assert!(t.published_to("octoPrint/event/ZChange").is_empty());
    assert_eq!(t.published_to("octoPrint/event/PrintPaused").len(), 1);
}

#[test]
fn test_only_allowlisted_events_are_retained() {
    let mut t = TestBridge::new(test_config());
    t.connect_clean();

    t.bridge.on_event("ZChange", None);
    t.bridge.on_event("PrintPaused", None);

    assert!(t.published_to("octoPrint/event/ZChange")[0].retain);
    assert!(!t.published_to("octoPrint/event/PrintPaused")[0].retain);
}

#[test]
fn test_allowlisted_event_follows_global_retain_off() {
    let mut config = test_config();
    config.broker.retain = false;
    let mut t = TestBridge::new(config);
    t.connect_clean();

    t.bridge.on_event("ZChange", None);

    assert!(!t.published_to("octoPrint/event/ZChange")[0].retain);
}

#[test]
fn test_paused_for_user_gcode_line() {
    let mut t = TestBridge::new(test_config());
    t.connect_clean();

    let line = t.bridge.on_gcode_received("echo:busy: paused for user");
    let other = t.bridge.on_gcode_received("ok T:200.0 /210.0");

    assert_eq!(line, "echo:busy: paused for user");
    assert_eq!(other, "ok T:200.0 /210.0");
    let events = t.published_to("octoPrint/event/PausedForUser");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].json()["_event"], "PausedForUser");
}

#[test]
fn test_metadata_published_on_start_and_cleared_on_done() {
    // Arrange
    let mut config = test_config();
    config.publish.metadata_active = true;
    config.publish.metadata_keys = "analysis.estimatedPrintTime, author, missing".to_string();
    let mut t = TestBridge::new(config);
    t.connect_clean();

    let metadata: Map<String, Value> = json!({
        "analysis": {"estimatedPrintTime": 1234.5},
        "author": "alice",
    })
    .as_object()
    .cloned()
    .unwrap();
    t.files
        .set_metadata(FileDestination::Local, "cube.gcode", metadata);
    let job = json!({"origin": "local", "path": "cube.gcode", "name": "cube.gcode"});

    // Act: start
    t.bridge.on_event("PrintStarted", Some(&job));

    // Assert
    let estimate = t.published_to("octoPrint/metadata/analysis.estimatedPrintTime");
    assert_eq!(estimate[0].text(), "1234.5");
    assert_eq!(t.published_to("octoPrint/metadata/author")[0].text(), "alice");
    assert!(t.published_to("octoPrint/metadata/missing")[0].payload.is_empty());
    assert_eq!(t.published_to("octoPrint/event/PrintStarted").len(), 1);

    // Act: done
    t.transport.clear();
    t.bridge.on_event("PrintDone", Some(&job));

    // Assert: every key cleared with an empty payload
    for key in ["analysis.estimatedPrintTime", "author", "missing"] {
        let cleared = t.published_to(&format!("octoPrint/metadata/{key}"));
        assert_eq!(cleared.len(), 1, "{key} should be cleared once");
        assert!(cleared[0].payload.is_empty());
    }
}

#[test]
fn test_metadata_inactive_publishes_nothing() {
    let mut config = test_config();
    config.publish.metadata_keys = "author".to_string();
    let mut t = TestBridge::new(config);
    t.connect_clean();

    t.bridge
        .on_event("PrintStarted", Some(&json!({"origin": "local", "path": "cube.gcode"})));

    assert!(t.published_to("octoPrint/metadata/author").is_empty());
}

#[test]
fn test_baseline_progress_on_first_connection() {
    let mut t = TestBridge::new(test_config());

    t.connect();

    let printing = t.published_to("octoPrint/progress/printing");
    assert_eq!(printing.len(), 1);
    assert_eq!(printing[0].json()["progress"], 0);
    assert_eq!(printing[0].json()["path"], "");
    assert!(printing[0].retain);
    assert_eq!(t.published_to("octoPrint/progress/slicing").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_poll_deduplicates_and_stops_when_finished() {
    // Arrange
    let mut t = TestBridge::new(test_config());
    t.connect_clean();
    t.printer
        .set_current_data(json!({"progress": {"completion": 42.0}}));

    // Act: two ticks at the same completion
    t.bridge.on_event(
        "PrintStarted",
        Some(&json!({"origin": "local", "path": "cube.gcode"})),
    );
    assert!(t.bridge.is_polling_progress());
    tokio::time::sleep(Duration::from_secs(11)).await;

    // Assert
    let progress = t.published_to("octoPrint/progress/printing");
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].json()["progress"], 42);
    assert_eq!(progress[0].json()["location"], "local");
    assert_eq!(progress[0].json()["path"], "cube.gcode");

    // Act: the job completes
    t.printer
        .set_current_data(json!({"progress": {"completion": 100.0}}));
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Assert
    let progress = t.published_to("octoPrint/progress/printing");
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[1].json()["progress"], 100);
    assert!(!t.bridge.is_polling_progress());
}

#[test]
fn test_slicing_progress_is_not_deduplicated() {
    use printago_connector::events::telemetry::SlicingProgress;

    let mut t = TestBridge::new(test_config());
    t.connect_clean();
    let progress = SlicingProgress {
        slicer: "cura".to_string(),
        source_path: "cube.stl".to_string(),
        progress: 50.0,
        ..SlicingProgress::default()
    };

    t.bridge.on_slicing_progress(&progress);
    t.bridge.on_slicing_progress(&progress);

    let published = t.published_to("octoPrint/progress/slicing");
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].json()["slicer"], "cura");
}

#[tokio::test(start_paused = true)]
async fn test_progress_carries_printer_data_when_enabled() {
    // Arrange
    let mut config = test_config();
    config.publish.printer_data = true;
    let mut t = TestBridge::new(config);
    t.connect_clean();
    let data = json!({"state": {"text": "Printing"}, "progress": {"completion": 10.0}});
    t.printer.set_current_data(data.clone());

    // Act
    t.bridge.on_event(
        "PrintStarted",
        Some(&json!({"origin": "local", "path": "cube.gcode"})),
    );
    tokio::time::sleep(Duration::from_secs(6)).await;

    // Assert
    let progress = t.published_to("octoPrint/progress/printing");
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].json()["progress"], 10);
    assert_eq!(progress[0].json()["printer_data"], data);
}
