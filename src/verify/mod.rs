//! VerificationClient - Remote Human-Presence Verdict
//!
//! ## Responsibilities
//!
//! - Submit a captured image to the visual-verification service
//! - Parse the `{human_present, confidence}` verdict
//! - Classify failures transient vs permanent for the retry policy
//!
//! The remote service is an opaque classifier. A malformed or unexpected
//! response is an error, never a "no human" verdict.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Human-presence verdict from the verification service
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VerificationResult {
    pub human_present: bool,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
}

/// Request metadata sent alongside the image
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub sensor_ids: Vec<u8>,
    pub captured_at: String,
}

/// Verification failure, classified for retry
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// Worth retrying: timeout, connect failure, 5xx
    #[error("Transient verification error: {0}")]
    Transient(String),

    /// Retrying cannot help: 4xx, malformed response
    #[error("Permanent verification error: {0}")]
    Permanent(String),
}

impl VerifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Transient(_))
    }
}

/// Image-to-verdict verification
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        image: Vec<u8>,
        request: VerifyRequest,
    ) -> Result<VerificationResult, VerifyError>;
}

/// HTTP client for the verification service
pub struct VerifyClient {
    client: reqwest::Client,
    base_url: String,
}

impl VerifyClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }
}

#[async_trait]
impl Verifier for VerifyClient {
    async fn verify(
        &self,
        image: Vec<u8>,
        request: VerifyRequest,
    ) -> Result<VerificationResult, VerifyError> {
        let url = format!("{}/v1/verify", self.base_url);

        let sensor_ids = request
            .sensor_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let form = Form::new()
            .part(
                "image",
                Part::bytes(image)
                    .file_name("snapshot.jpg")
                    .mime_str("image/jpeg")
                    .map_err(|e| VerifyError::Permanent(format!("bad mime: {}", e)))?,
            )
            .text("sensor_ids", sensor_ids)
            .text("captured_at", request.captured_at);

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VerifyError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let verdict: VerificationResult = resp
            .json()
            .await
            .map_err(|e| VerifyError::Permanent(format!("malformed response: {}", e)))?;

        validate(verdict)
    }
}

/// Map an HTTP failure status onto the retry taxonomy
fn classify_status(status: StatusCode, body: &str) -> VerifyError {
    if status.is_server_error() {
        VerifyError::Transient(format!("service returned {}: {}", status, body))
    } else {
        VerifyError::Permanent(format!("service rejected request {}: {}", status, body))
    }
}

/// Reject verdicts the service itself got wrong
fn validate(verdict: VerificationResult) -> Result<VerificationResult, VerifyError> {
    if !(0.0..=1.0).contains(&verdict.confidence) || verdict.confidence.is_nan() {
        return Err(VerifyError::Permanent(format!(
            "confidence out of range: {}",
            verdict.confidence
        )));
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_deserialization() {
        let verdict: VerificationResult =
            serde_json::from_str(r#"{"human_present": true, "confidence": 0.9}"#).unwrap();
        assert!(verdict.human_present);
        assert!((verdict.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let verdict: VerificationResult = serde_json::from_str(
            r#"{"human_present": false, "confidence": 0.1, "model": "v2"}"#,
        )
        .unwrap();
        assert!(!verdict.human_present);
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_transient());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_transient());
    }

    #[test]
    fn test_confidence_out_of_range_is_permanent() {
        let bad = VerificationResult {
            human_present: true,
            confidence: 1.7,
        };
        match validate(bad) {
            Err(VerifyError::Permanent(_)) => {}
            other => panic!("expected permanent error, got {:?}", other),
        }

        let nan = VerificationResult {
            human_present: true,
            confidence: f32::NAN,
        };
        assert!(validate(nan).is_err());
    }

    #[test]
    fn test_in_range_confidence_passes() {
        let ok = VerificationResult {
            human_present: false,
            confidence: 0.0,
        };
        assert!(validate(ok).is_ok());
    }
}
