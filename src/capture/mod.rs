//! CaptureAdapter - Scene Image Acquisition
//!
//! ## Responsibilities
//!
//! - Fetch one still JPEG from the IP camera on demand
//! - Bound every capture with a timeout
//! - Surface failures as typed errors, never panics
//!
//! One capture in flight at a time is a property of the orchestrator's state
//! machine, not enforced here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A captured still image
pub struct CaptureResult {
    /// JPEG image data
    pub image: Vec<u8>,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
}

/// Capture failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture timed out")]
    Timeout,

    #[error("Capture device unavailable: {0}")]
    Unavailable(String),
}

/// On-demand still capture
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    async fn capture(&self) -> Result<CaptureResult, CaptureError>;
}

/// Captures stills from an IP camera snapshot URL
pub struct IpCameraCapture {
    client: reqwest::Client,
    snapshot_url: String,
}

impl IpCameraCapture {
    pub fn new(snapshot_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            snapshot_url,
        }
    }
}

#[async_trait]
impl CaptureAdapter for IpCameraCapture {
    async fn capture(&self) -> Result<CaptureResult, CaptureError> {
        let resp = self
            .client
            .get(&self.snapshot_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CaptureError::Timeout
                } else {
                    CaptureError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(CaptureError::Unavailable(format!(
                "camera returned {}",
                resp.status()
            )));
        }

        let captured_at = Utc::now();
        let image = resp
            .bytes()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CaptureError::Timeout
                } else {
                    CaptureError::Unavailable(e.to_string())
                }
            })?
            .to_vec();

        if image.is_empty() {
            return Err(CaptureError::Unavailable("empty snapshot body".to_string()));
        }

        tracing::debug!(size = image.len(), "Snapshot captured");
        Ok(CaptureResult { image, captured_at })
    }
}
