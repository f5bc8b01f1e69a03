//! G-code download for the `download_gcode` action

use crate::host::{FileDestination, FileStorage, HostError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Upper bound on one download
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL {0}")]
    InvalidUrl(String),
    #[error("URL {0} does not name a file")]
    MissingFileName(String),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("{0}")]
    Storage(#[from] HostError),
}

/// Last path segment of `url`, percent-decoding left to the host
pub fn file_name_from_url(url: &str) -> Result<String, DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DownloadError::MissingFileName(url.to_string()))
}

/// Storage path for a downloaded file
pub fn storage_path(prefix: &str, file_name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        format!("{prefix}{file_name}")
    } else {
        format!("{prefix}/{file_name}")
    }
}

/// Fetch `url` and store it under `prefix` in local storage.
///
/// Returns the path the host stored the file at.
pub async fn download_gcode(
    client: &reqwest::Client,
    url: &str,
    files: &Arc<dyn FileStorage>,
    prefix: &str,
) -> Result<String, DownloadError> {
    let file_name = file_name_from_url(url)?;
    let path = storage_path(prefix, &file_name);

    debug!(url, path = %path, "Downloading G-code");
    let response = client.get(url).timeout(DOWNLOAD_TIMEOUT).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(status.as_u16()));
    }
    let body = response.bytes().await?;

    let stored = files.add_file(FileDestination::Local, &path, body.to_vec())?;
    info!(url, path = %stored, bytes = body.len(), "G-code stored");
    Ok(stored)
}
