//! Upload sink: forwards raw captures to the storage endpoint.
//!
//! Wire format: `POST <endpoint>` with `{image, latitude, longitude}` where
//! `image` is a PNG data URL. Success is `{success: true, data: {...}}`;
//! failures carry `{error: "..."}`. Nothing here retries.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed position attached to uploads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which captures are forwarded to the upload sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPolicy {
    Off,
    /// Every successful capture, whatever its outcome.
    All,
    /// Captures with no known identity (unknown match or no matcher yet).
    Unknown,
}

impl FromStr for UploadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(UploadPolicy::Off),
            "all" => Ok(UploadPolicy::All),
            "unknown" => Ok(UploadPolicy::Unknown),
            other => Err(format!("unknown upload policy: {other}")),
        }
    }
}

impl fmt::Display for UploadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadPolicy::Off => "off",
            UploadPolicy::All => "all",
            UploadPolicy::Unknown => "unknown",
        })
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(String),
    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed upload response: {0}")]
    Malformed(String),
}

/// What became of a capture's upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    Skipped,
    Stored { record: serde_json::Value },
    Failed { message: String },
}

/// Accepts a PNG-encoded capture plus optional position, returns the stored record.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn submit(
        &self,
        png: Vec<u8>,
        location: Option<GeoPoint>,
    ) -> Result<serde_json::Value, UploadError>;
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    image: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

/// Encode PNG bytes as a `data:` URL.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Interpret the sink's answer.
fn interpret_response(status: u16, body: &str) -> Result<serde_json::Value, UploadError> {
    let parsed: Result<UploadResponse, _> = serde_json::from_str(body);

    if !(200..300).contains(&status) {
        let message = parsed
            .ok()
            .and_then(|r| r.error)
            .unwrap_or_else(|| body.chars().take(200).collect());
        return Err(UploadError::Rejected { status, message });
    }

    let response = parsed.map_err(|e| UploadError::Malformed(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(UploadError::Rejected { status, message: error });
    }
    if !response.success {
        return Err(UploadError::Malformed("response without success flag".into()));
    }
    Ok(response.data.unwrap_or(serde_json::Value::Null))
}

/// HTTP JSON upload sink.
pub struct HttpUploadSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploadSink {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl UploadSink for HttpUploadSink {
    async fn submit(
        &self,
        png: Vec<u8>,
        location: Option<GeoPoint>,
    ) -> Result<serde_json::Value, UploadError> {
        let image = png_data_url(&png);
        let request = UploadRequest {
            image: &image,
            latitude: location.map(|l| l.latitude),
            longitude: location.map(|l| l.longitude),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        interpret_response(status, &body)
    }
}
