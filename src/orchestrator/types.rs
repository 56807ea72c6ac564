//! Pipeline run and mode types

use crate::debouncer::IntrusionEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::Instant;

/// Process-wide operating mode
///
/// Single authoritative value owned by the orchestrator, published read-only
/// through a watch channel. Only the orchestrator mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    /// Not responding to intrusion events; requires an arm command
    Disarmed,
    /// Idle and watching for intrusion events
    Armed,
    /// A pipeline run is in flight
    Busy,
    /// Post-run quiet period; events are discarded
    Cooldown,
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Capture,
    Verify,
    Alert,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Verify => "verify",
            Stage::Alert => "alert",
        }
    }
}

/// Terminal outcome of a pipeline run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Verification confirmed a human; the alert stage ran (its own failure,
    /// if any, is carried here rather than failing the run)
    Completed { alert_error: Option<String> },
    /// Verification answered, but without a confident human verdict
    NoHumanConfirmed { confidence: f32 },
    /// Capture never produced an image within its retry budget
    CaptureFailed,
    /// Verification errored out (permanent, or transient past its budget)
    VerificationFailed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::NoHumanConfirmed { .. } => "no_human_confirmed",
            RunOutcome::CaptureFailed => "capture_failed",
            RunOutcome::VerificationFailed => "verification_failed",
        }
    }
}

/// One end-to-end response attempt for a single intrusion event
///
/// Owned exclusively by the orchestrator; at most one non-terminal run
/// exists at any instant.
#[derive(Debug)]
pub struct PipelineRun {
    pub id: String,
    pub event: IntrusionEvent,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub started_instant: Instant,
    /// Attempt count per stage, including the first attempt
    pub attempts: HashMap<Stage, u32>,
}

impl PipelineRun {
    pub fn new(event: IntrusionEvent) -> Self {
        Self {
            id: format!("run-{}", uuid::Uuid::new_v4()),
            event,
            stage: Stage::Capture,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            attempts: HashMap::new(),
        }
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }
}

/// Per-stage audit entry for a finished run
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Audit record of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub sensors: Vec<u8>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub stages: Vec<StageRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn event() -> IntrusionEvent {
        IntrusionEvent {
            sensors: BTreeSet::from([1]),
            first_at: Instant::now(),
            last_at: Instant::now(),
            first_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_run_id_prefix() {
        let run = PipelineRun::new(event());
        assert!(run.id.starts_with("run-"));
        assert_eq!(run.stage, Stage::Capture);
        assert_eq!(run.attempts_for(Stage::Capture), 0);
    }

    #[test]
    fn test_run_record_serialization() {
        let record = RunRecord {
            run_id: "run-abc".to_string(),
            sensors: vec![1, 2],
            outcome: RunOutcome::NoHumanConfirmed { confidence: 0.2 },
            stages: vec![StageRecord {
                stage: Stage::Capture,
                attempts: 1,
                duration_ms: 120,
            }],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"outcome\":\"no_human_confirmed\""));
        assert!(json.contains("\"stage\":\"capture\""));
        assert!(json.contains("\"run_id\":\"run-abc\""));
    }
}
