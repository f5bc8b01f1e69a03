//! Webcam listing and snapshots

use crate::host::{HostError, WebcamRegistry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Cursor;
use thiserror::Error;

/// Still-image format snapshots are delivered in
pub const SNAPSHOT_FORMAT: &str = "png";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("webcam provider not found: {0}")]
    ProviderNotFound(String),
    #[error("{0}")]
    Capture(#[from] HostError),
    #[error("could not decode snapshot: {0}")]
    Decode(#[source] image::ImageError),
    #[error("could not encode snapshot: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Serialize)]
struct WebcamEntry {
    name: String,
    display_name: String,
    can_snapshot: bool,
}

#[derive(Debug, Serialize)]
struct ProviderEntry {
    provider_id: String,
    webcams: Vec<WebcamEntry>,
}

/// Providers with at least one snapshot-capable webcam
pub fn provider_listing(registry: &dyn WebcamRegistry) -> Value {
    let providers: Vec<ProviderEntry> = registry
        .providers()
        .into_iter()
        .filter_map(|(provider_id, provider)| {
            let webcams = provider.webcams();
            if !webcams.iter().any(|w| w.can_snapshot) {
                return None;
            }
            Some(ProviderEntry {
                provider_id,
                webcams: webcams
                    .into_iter()
                    .map(|w| WebcamEntry {
                        name: w.name,
                        display_name: w.display_name,
                        can_snapshot: w.can_snapshot,
                    })
                    .collect(),
            })
        })
        .collect();

    json!(providers)
}

/// Re-encode whatever the camera produced as PNG
pub fn transcode_to_png(raw: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let decoded = image::load_from_memory(raw).map_err(SnapshotError::Decode)?;
    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(SnapshotError::Encode)?;
    Ok(png)
}

/// Capture a frame and build the `response` envelope data
pub fn capture_snapshot(
    registry: &dyn WebcamRegistry,
    provider_id: &str,
    camera_name: &str,
) -> Result<Value, SnapshotError> {
    let provider = registry
        .provider(provider_id)
        .ok_or_else(|| SnapshotError::ProviderNotFound(provider_id.to_string()))?;

    let raw = provider.take_snapshot(camera_name)?;
    let png = transcode_to_png(&raw)?;

    Ok(json!({
        "camera_provider_id": provider_id,
        "camera_name": camera_name,
        "format": SNAPSHOT_FORMAT,
        "image": STANDARD.encode(png),
    }))
}
