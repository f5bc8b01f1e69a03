//! Mock implementations for testing
//!
//! Provides mock Transport, PrinterControl, FileStorage and webcam
//! implementations so the bridge can be exercised without a broker or a host.

use crate::host::{
    FileDestination, FileStorage, HostError, HostResult, PrinterControl, WebcamInfo,
    WebcamProvider, WebcamRegistry,
};
use crate::transport::mqtt::MqttError;
use crate::transport::Transport;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One publish as seen by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
    /// Publishes accepted before the request channel reports full
    publish_budget: Mutex<Option<usize>>,
    should_fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request fails
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscriptions.lock().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Accept only `budget` more publishes; `None` lifts the limit
    pub fn set_publish_budget(&self, budget: Option<usize>) {
        *self.publish_budget.lock() = budget;
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.subscriptions.lock().clear();
        self.unsubscriptions.lock().clear();
    }
}

impl Transport for MockTransport {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), MqttError> {
        if self.should_fail {
            return Err(MqttError::PublishFailed("mock transport failure".into()));
        }
        {
            let mut budget = self.publish_budget.lock();
            match budget.as_mut() {
                Some(0) => return Err(MqttError::PublishFailed("request channel full".into())),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }

        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe_many(&self, topics: &[String], _qos: QoS) -> Result<(), MqttError> {
        if self.should_fail {
            return Err(MqttError::SubscriptionFailed("mock transport failure".into()));
        }
        self.subscriptions.lock().extend(topics.iter().cloned());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        if self.should_fail {
            return Err(MqttError::SubscriptionFailed("mock transport failure".into()));
        }
        self.unsubscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Host operation recorded by [`MockPrinter`]
#[derive(Debug, Clone, PartialEq)]
pub enum PrinterCall {
    Pause,
    Resume,
    Cancel,
    SelectFile {
        path: String,
        sd: bool,
        print_after_select: bool,
    },
    SetTemperature {
        heater: String,
        value: f64,
    },
    Jog {
        axes: BTreeMap<String, f64>,
        relative: bool,
        speed: Option<f64>,
    },
    Extrude {
        amount: f64,
        speed: Option<f64>,
    },
    Home {
        axes: Vec<String>,
    },
}

#[derive(Debug, Default)]
struct PrinterState {
    state_id: Option<String>,
    state_string: Option<String>,
    current_data: Option<Value>,
    temperatures: Option<Value>,
    job: Option<Value>,
}

/// Records every operation; optionally fails all of them
#[derive(Debug, Default)]
pub struct MockPrinter {
    calls: Mutex<Vec<PrinterCall>>,
    failure: Mutex<Option<HostError>>,
    state: Mutex<PrinterState>,
}

impl MockPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PrinterCall> {
        self.calls.lock().clone()
    }

    /// Subsequent operations record the call and then fail with `error`
    pub fn fail_with(&self, error: HostError) {
        *self.failure.lock() = Some(error);
    }

    pub fn set_state(&self, id: &str, text: &str) {
        let mut state = self.state.lock();
        state.state_id = Some(id.to_string());
        state.state_string = Some(text.to_string());
    }

    pub fn set_current_data(&self, data: Value) {
        self.state.lock().current_data = Some(data);
    }

    pub fn set_temperatures(&self, temperatures: Value) {
        self.state.lock().temperatures = Some(temperatures);
    }

    pub fn set_job(&self, job: Value) {
        self.state.lock().job = Some(job);
    }

    fn record(&self, call: PrinterCall) -> HostResult<()> {
        self.calls.lock().push(call);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl PrinterControl for MockPrinter {
    fn pause_print(&self) -> HostResult<()> {
        self.record(PrinterCall::Pause)
    }

    fn resume_print(&self) -> HostResult<()> {
        self.record(PrinterCall::Resume)
    }

    fn cancel_print(&self) -> HostResult<()> {
        self.record(PrinterCall::Cancel)
    }

    fn select_file(&self, path: &str, sd: bool, print_after_select: bool) -> HostResult<()> {
        self.record(PrinterCall::SelectFile {
            path: path.to_string(),
            sd,
            print_after_select,
        })
    }

    fn set_temperature(&self, heater: &str, value: f64) -> HostResult<()> {
        self.record(PrinterCall::SetTemperature {
            heater: heater.to_string(),
            value,
        })
    }

    fn jog(
        &self,
        axes: &BTreeMap<String, f64>,
        relative: bool,
        speed: Option<f64>,
        _tags: &[String],
    ) -> HostResult<()> {
        self.record(PrinterCall::Jog {
            axes: axes.clone(),
            relative,
            speed,
        })
    }

    fn extrude(&self, amount: f64, speed: Option<f64>, _tags: &[String]) -> HostResult<()> {
        self.record(PrinterCall::Extrude { amount, speed })
    }

    fn home(&self, axes: &[String]) -> HostResult<()> {
        self.record(PrinterCall::Home {
            axes: axes.to_vec(),
        })
    }

    fn state_id(&self) -> Option<String> {
        self.state.lock().state_id.clone()
    }

    fn state_string(&self) -> Option<String> {
        self.state.lock().state_string.clone()
    }

    fn current_data(&self) -> Option<Value> {
        self.state.lock().current_data.clone()
    }

    fn current_temperatures(&self) -> Option<Value> {
        self.state.lock().temperatures.clone()
    }

    fn current_job(&self) -> Option<Value> {
        self.state.lock().job.clone()
    }
}

/// In-memory file storage
#[derive(Debug, Default)]
pub struct MockFileStorage {
    files: Mutex<HashMap<(FileDestination, String), Vec<u8>>>,
    metadata: Mutex<HashMap<(FileDestination, String), Map<String, Value>>>,
}

impl MockFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, destination: FileDestination, path: &str, contents: Vec<u8>) {
        self.files
            .lock()
            .insert((destination, path.to_string()), contents);
    }

    pub fn set_metadata(&self, destination: FileDestination, path: &str, metadata: Map<String, Value>) {
        self.metadata
            .lock()
            .insert((destination, path.to_string()), metadata);
    }

    pub fn contents(&self, destination: FileDestination, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .get(&(destination, path.to_string()))
            .cloned()
    }
}

impl FileStorage for MockFileStorage {
    fn file_exists(&self, destination: FileDestination, path: &str) -> bool {
        self.files
            .lock()
            .contains_key(&(destination, path.to_string()))
    }

    fn add_file(&self, destination: FileDestination, path: &str, contents: Vec<u8>) -> HostResult<String> {
        self.insert(destination, path, contents);
        Ok(path.to_string())
    }

    fn additional_metadata(&self, destination: FileDestination, path: &str) -> Option<Map<String, Value>> {
        self.metadata
            .lock()
            .get(&(destination, path.to_string()))
            .cloned()
    }
}

/// Small JPEG frame, the format most webcams deliver
pub fn sample_jpeg() -> Vec<u8> {
    let frame = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 80, 20]));
    let mut jpeg = Vec::new();
    image::DynamicImage::ImageRgb8(frame)
        .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .expect("encoding a JPEG into memory cannot fail");
    jpeg
}

/// Single-webcam provider returning [`sample_jpeg`]
#[derive(Debug)]
pub struct MockWebcamProvider {
    webcam: WebcamInfo,
}

impl MockWebcamProvider {
    pub fn new(name: &str, can_snapshot: bool) -> Self {
        Self {
            webcam: WebcamInfo {
                name: name.to_string(),
                display_name: name.to_uppercase(),
                can_snapshot,
            },
        }
    }
}

impl WebcamProvider for MockWebcamProvider {
    fn webcams(&self) -> Vec<WebcamInfo> {
        vec![self.webcam.clone()]
    }

    fn take_snapshot(&self, webcam_name: &str) -> HostResult<Vec<u8>> {
        if webcam_name != self.webcam.name {
            return Err(HostError::operation(format!("Unknown webcam {webcam_name}")));
        }
        if !self.webcam.can_snapshot {
            return Err(HostError::operation("Webcam cannot take snapshots"));
        }
        Ok(sample_jpeg())
    }
}

#[derive(Default)]
pub struct MockWebcamRegistry {
    providers: Vec<(String, Arc<dyn WebcamProvider>)>,
}

impl MockWebcamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, id: &str, provider: Arc<dyn WebcamProvider>) {
        self.providers.push((id.to_string(), provider));
    }
}

impl WebcamRegistry for MockWebcamRegistry {
    fn providers(&self) -> Vec<(String, Arc<dyn WebcamProvider>)> {
        self.providers.clone()
    }
}
