//! Logging-only host for running the bridge without a printer

use printago_connector::host::{
    FileDestination, FileStorage, HostResult, HostServices, PrinterControl, WebcamProvider,
    WebcamRegistry,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub fn services() -> HostServices {
    HostServices {
        printer: Arc::new(DryRunPrinter),
        files: Arc::new(DryRunFiles),
        webcams: Arc::new(NoWebcams),
    }
}

struct DryRunPrinter;

impl PrinterControl for DryRunPrinter {
    fn pause_print(&self) -> HostResult<()> {
        info!("dry-run: pause print");
        Ok(())
    }

    fn resume_print(&self) -> HostResult<()> {
        info!("dry-run: resume print");
        Ok(())
    }

    fn cancel_print(&self) -> HostResult<()> {
        info!("dry-run: cancel print");
        Ok(())
    }

    fn select_file(&self, path: &str, sd: bool, print_after_select: bool) -> HostResult<()> {
        info!(path, sd, print_after_select, "dry-run: select file");
        Ok(())
    }

    fn set_temperature(&self, heater: &str, value: f64) -> HostResult<()> {
        info!(heater, value, "dry-run: set temperature");
        Ok(())
    }

    fn jog(
        &self,
        axes: &BTreeMap<String, f64>,
        relative: bool,
        speed: Option<f64>,
        _tags: &[String],
    ) -> HostResult<()> {
        info!(?axes, relative, ?speed, "dry-run: jog");
        Ok(())
    }

    fn extrude(&self, amount: f64, speed: Option<f64>, _tags: &[String]) -> HostResult<()> {
        info!(amount, ?speed, "dry-run: extrude");
        Ok(())
    }

    fn home(&self, axes: &[String]) -> HostResult<()> {
        info!(?axes, "dry-run: home");
        Ok(())
    }

    fn state_id(&self) -> Option<String> {
        Some("OPERATIONAL".to_string())
    }

    fn state_string(&self) -> Option<String> {
        Some("Operational (dry run)".to_string())
    }

    fn current_data(&self) -> Option<Value> {
        Some(json!({"progress": {"completion": null}}))
    }

    fn current_temperatures(&self) -> Option<Value> {
        None
    }

    fn current_job(&self) -> Option<Value> {
        None
    }
}

/// Accepts every file and forgets it
struct DryRunFiles;

impl FileStorage for DryRunFiles {
    fn file_exists(&self, _destination: FileDestination, _path: &str) -> bool {
        true
    }

    fn add_file(&self, destination: FileDestination, path: &str, contents: Vec<u8>) -> HostResult<String> {
        info!(?destination, path, bytes = contents.len(), "dry-run: store file");
        Ok(path.to_string())
    }

    fn additional_metadata(&self, _destination: FileDestination, _path: &str) -> Option<Map<String, Value>> {
        None
    }
}

struct NoWebcams;

impl WebcamRegistry for NoWebcams {
    fn providers(&self) -> Vec<(String, Arc<dyn WebcamProvider>)> {
        Vec::new()
    }
}
