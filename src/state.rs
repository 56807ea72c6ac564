//! Application configuration
//!
//! Environment-driven endpoint config plus tunable sections for the link,
//! debouncer, and pipeline. Defaults match the deployed hardware (9600 baud
//! sensor bridge, DroidCam-style snapshot URL).

use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Serial device the sensor microcontroller is attached to
    pub serial_port: String,
    /// Serial baud rate
    pub serial_baud: u32,
    /// IP camera snapshot URL (returns one JPEG per GET)
    pub snapshot_url: String,
    /// Visual-verification service base URL
    pub verify_url: String,
    /// Voice-alert service base URL
    pub alert_url: String,
    /// Voice id passed to the alert service
    pub alert_voice_id: String,
    /// Warning text synthesized on a confirmed intrusion
    pub alert_text: String,
    /// Audio player command (file path is appended)
    pub player_cmd: Vec<String>,
    /// Temporary directory (synthesized audio files)
    pub temp_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial_port: std::env::var("SERIAL_PORT")
                .unwrap_or_else(|_| "/dev/ttyUSB0".to_string()),
            serial_baud: std::env::var("SERIAL_BAUD")
                .ok()
                .and_then(|b| b.parse().ok())
                .unwrap_or(9600),
            snapshot_url: std::env::var("IPCAM_SNAPSHOT_URL")
                .unwrap_or_else(|_| "http://10.11.20.70:4747/photo.jpg".to_string()),
            verify_url: std::env::var("VERIFY_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            alert_url: std::env::var("ALERT_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            alert_voice_id: std::env::var("ALERT_VOICE_ID")
                .unwrap_or_else(|_| "21m00Tcm4TlvDq8ikWAM".to_string()),
            alert_text: std::env::var("ALERT_TEXT").unwrap_or_else(|_| {
                "Warning: Unidentified human detected at the perimeter.".to_string()
            }),
            player_cmd: std::env::var("PLAYER_CMD")
                .map(|c| c.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|_| {
                    ["ffplay", "-nodisp", "-autoexit", "-loglevel", "error"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/perimeter-sentry/temp")),
        }
    }
}

/// Serial link tunables
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Initial reconnect backoff
    pub reconnect_initial: Duration,
    /// Reconnect backoff cap
    pub reconnect_cap: Duration,
    /// Consecutive failed reconnects before the link is declared fatal
    pub max_reconnect_failures: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(200),
            reconnect_cap: Duration::from_secs(5),
            max_reconnect_failures: 10,
        }
    }
}

/// Debounce tunables
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Debounce window D: raw edges within this span coalesce into one event
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(300),
        }
    }
}

/// Pipeline stage tunables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capture stage timeout
    pub capture_timeout: Duration,
    /// Verification stage timeout
    pub verify_timeout: Duration,
    /// Alert stage timeout (synthesis + playback)
    pub alert_timeout: Duration,
    /// Minimum confidence for a positive verdict to trigger an alert
    pub confidence_threshold: f32,
    /// Post-run quiet period before re-arming
    pub cooldown: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(3),
            verify_timeout: Duration::from_secs(8),
            alert_timeout: Duration::from_secs(10),
            confidence_threshold: 0.6,
            cooldown: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.capture_timeout, Duration::from_secs(3));
        assert_eq!(cfg.verify_timeout, Duration::from_secs(8));
        assert_eq!(cfg.cooldown, Duration::from_secs(10));
        assert!((cfg.confidence_threshold - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_link_defaults() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.reconnect_initial, Duration::from_millis(200));
        assert_eq!(cfg.reconnect_cap, Duration::from_secs(5));
        assert_eq!(cfg.max_reconnect_failures, 10);
    }
}
