//! AlertClient - Voice Warning Synthesis and Playback
//!
//! ## Responsibilities
//!
//! - Send the warning context to the voice-alert service
//! - Write the returned audio to the temp dir and play it through an
//!   external player process
//! - Best-effort: failures surface in the outcome, never block re-arming

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Terminal result of the alert stage
#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub played: bool,
    pub error: Option<String>,
}

/// Alert failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum AlertError {
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// Warning context for a confirmed intrusion
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub text: String,
    pub sensor_ids: Vec<u8>,
}

/// Synthesis request body
#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
}

/// Synthesize-and-play alert delivery
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn synthesize_and_play(&self, context: &AlertContext) -> Result<AlertOutcome, AlertError>;
}

/// HTTP client for the voice service plus local playback
pub struct AlertClient {
    client: reqwest::Client,
    base_url: String,
    voice_id: String,
    temp_dir: PathBuf,
    player_cmd: Vec<String>,
}

impl AlertClient {
    pub async fn new(
        base_url: String,
        voice_id: String,
        temp_dir: PathBuf,
        player_cmd: Vec<String>,
        timeout: Duration,
    ) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        fs::create_dir_all(&temp_dir).await?;

        if player_cmd.is_empty() {
            return Err(crate::error::Error::Config(
                "player command is empty".to_string(),
            ));
        }

        Ok(Self {
            client,
            base_url,
            voice_id,
            temp_dir,
            player_cmd,
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AlertError> {
        let url = format!("{}/v1/synthesize", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SynthesisRequest {
                text,
                voice_id: &self.voice_id,
            })
            .send()
            .await
            .map_err(|e| AlertError::Synthesis(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AlertError::Synthesis(format!(
                "voice service returned {}",
                resp.status()
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| AlertError::Synthesis(e.to_string()))?
            .to_vec();

        if audio.is_empty() {
            return Err(AlertError::Synthesis("empty audio body".to_string()));
        }

        Ok(audio)
    }

    async fn play(&self, path: &std::path::Path) -> Result<(), AlertError> {
        let status = Command::new(&self.player_cmd[0])
            .args(&self.player_cmd[1..])
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| AlertError::Playback(format!("{}: {}", self.player_cmd[0], e)))?;

        if !status.success() {
            return Err(AlertError::Playback(format!(
                "player exited with {}",
                status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Alerter for AlertClient {
    async fn synthesize_and_play(&self, context: &AlertContext) -> Result<AlertOutcome, AlertError> {
        tracing::info!(
            sensors = ?context.sensor_ids,
            text = %context.text,
            "Synthesizing audio alert"
        );

        let audio = self.synthesize(&context.text).await?;

        let path = self
            .temp_dir
            .join(format!("alert-{}.mp3", uuid::Uuid::new_v4()));
        fs::write(&path, &audio)
            .await
            .map_err(|e| AlertError::Playback(format!("write {}: {}", path.display(), e)))?;

        let played = self.play(&path).await;

        // Audio files are transient; failure to clean up is not an alert failure
        if let Err(e) = fs::remove_file(&path).await {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove alert audio");
        }

        played?;
        tracing::info!(size = audio.len(), "Alert playback finished");
        Ok(AlertOutcome {
            played: true,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_request_serialization() {
        let req = SynthesisRequest {
            text: "Warning: Unidentified human detected at the perimeter.",
            voice_id: "21m00Tcm4TlvDq8ikWAM",
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"text\""));
        assert!(json.contains("perimeter"));
        assert!(json.contains("\"voice_id\":\"21m00Tcm4TlvDq8ikWAM\""));
    }

    #[tokio::test]
    async fn test_empty_player_command_rejected() {
        let dir = std::env::temp_dir().join(format!("sentry-test-{}", uuid::Uuid::new_v4()));
        let result = AlertClient::new(
            "http://localhost:9100".to_string(),
            "voice".to_string(),
            dir,
            vec![],
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
    }
}
