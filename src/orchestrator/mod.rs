//! PipelineOrchestrator - Intrusion Response State Machine
//!
//! ## Responsibilities
//!
//! - Own `SystemMode` and the single active `PipelineRun`
//! - Drive capture -> verify -> alert with per-stage timeouts and retries
//! - Discard intrusion events while not armed (busy, cooldown, disarmed)
//! - Return to an armed state after every outcome; disarm on fatal link loss
//! - Record every run in the audit trail
//!
//! The orchestrator is a single task: all mode and run mutations happen on
//! it, so transitions need no lock. Stage attempts are spawned and tagged
//! with `{run id, stage, generation}`; an attempt that outlives its timeout
//! is abandoned, and its late result is recognized by a stale tag and
//! discarded instead of corrupting a newer attempt.

use crate::alert::{AlertContext, AlertError, AlertOutcome, Alerter};
use crate::capture::{CaptureAdapter, CaptureError, CaptureResult};
use crate::debouncer::{EventSlot, IntrusionEvent};
use crate::error::{Error, Result};
use crate::run_log::RunLogService;
use crate::state::PipelineConfig;
use crate::verify::{VerificationResult, Verifier, VerifyError, VerifyRequest};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub mod policy;
pub mod types;

pub use policy::{Backoff, RetryPolicy, StagePolicies};
pub use types::{PipelineRun, RunOutcome, RunRecord, Stage, StageRecord, SystemMode};

/// Arm/disarm command from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Arm,
    Disarm,
}

/// Cloneable handle for the external control surface
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    pub async fn arm(&self) -> Result<()> {
        self.tx
            .send(ControlCommand::Arm)
            .await
            .map_err(|_| Error::Internal("orchestrator stopped".to_string()))
    }

    pub async fn disarm(&self) -> Result<()> {
        self.tx
            .send(ControlCommand::Disarm)
            .await
            .map_err(|_| Error::Internal("orchestrator stopped".to_string()))
    }
}

/// Result of one spawned stage attempt
struct StageResult {
    run_id: String,
    stage: Stage,
    generation: u64,
    elapsed_ms: u64,
    payload: StagePayload,
}

enum StagePayload {
    Capture(std::result::Result<CaptureResult, CaptureError>),
    Verify(std::result::Result<VerificationResult, VerifyError>),
    Alert(std::result::Result<AlertOutcome, AlertError>),
}

enum VerifyStage {
    Verdict(VerificationResult),
    Failed,
}

enum Wake {
    Event(IntrusionEvent),
    Disarm,
    LinkFatal,
    ControlClosed,
}

/// PipelineOrchestrator instance
pub struct PipelineOrchestrator {
    capture: Arc<dyn CaptureAdapter>,
    verifier: Arc<dyn Verifier>,
    alerter: Arc<dyn Alerter>,
    events: Arc<EventSlot>,
    run_log: Arc<RunLogService>,
    config: PipelineConfig,
    policies: StagePolicies,
    alert_text: String,
    mode: watch::Sender<SystemMode>,
    control: mpsc::Receiver<ControlCommand>,
    link_fatal: watch::Receiver<bool>,
    results_tx: mpsc::Sender<StageResult>,
    results_rx: mpsc::Receiver<StageResult>,
    /// Tag for the newest dispatched stage attempt; anything older is stale
    generation: u64,
}

impl PipelineOrchestrator {
    /// Create a new orchestrator, initially disarmed.
    ///
    /// Returns the orchestrator plus the control handle and the read-only
    /// mode watch.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capture: Arc<dyn CaptureAdapter>,
        verifier: Arc<dyn Verifier>,
        alerter: Arc<dyn Alerter>,
        events: Arc<EventSlot>,
        run_log: Arc<RunLogService>,
        link_fatal: watch::Receiver<bool>,
        config: PipelineConfig,
        alert_text: String,
    ) -> (Self, ControlHandle, watch::Receiver<SystemMode>) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let (mode_tx, mode_rx) = watch::channel(SystemMode::Disarmed);
        let (results_tx, results_rx) = mpsc::channel(8);
        (
            Self {
                capture,
                verifier,
                alerter,
                events,
                run_log,
                config,
                policies: StagePolicies::default(),
                alert_text,
                mode: mode_tx,
                control: control_rx,
                link_fatal,
                results_tx,
                results_rx,
                generation: 0,
            },
            ControlHandle { tx: control_tx },
            mode_rx,
        )
    }

    /// Override the stage retry policies
    pub fn with_policies(mut self, policies: StagePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Start the orchestrator task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Main state machine loop
    pub async fn run(mut self) {
        tracing::info!("Pipeline orchestrator started (disarmed)");

        loop {
            if *self.mode.borrow() == SystemMode::Disarmed {
                match self.control.recv().await {
                    Some(ControlCommand::Arm) => {
                        if *self.link_fatal.borrow() {
                            tracing::warn!(
                                "Arm requested but the serial link is down; staying disarmed"
                            );
                            continue;
                        }
                        self.arm().await;
                    }
                    Some(ControlCommand::Disarm) => {}
                    None => break,
                }
                continue;
            }

            match self.wait_armed().await {
                Wake::Event(event) => {
                    self.run_pipeline(event).await;
                    if !self.cooldown().await {
                        break;
                    }
                }
                Wake::Disarm => {
                    self.set_mode(SystemMode::Disarmed, "disarm requested");
                }
                Wake::LinkFatal => {
                    self.set_mode(SystemMode::Disarmed, "serial link fatal");
                }
                Wake::ControlClosed => break,
            }
        }

        tracing::info!("Pipeline orchestrator stopped");
    }

    /// Wait for the next thing to act on while armed
    async fn wait_armed(&mut self) -> Wake {
        loop {
            tokio::select! {
                event = self.events.take() => return Wake::Event(event),
                cmd = self.control.recv() => match cmd {
                    Some(ControlCommand::Disarm) => return Wake::Disarm,
                    Some(ControlCommand::Arm) => {}
                    None => return Wake::ControlClosed,
                },
                changed = self.link_fatal.changed() => match changed {
                    Ok(()) => {
                        if *self.link_fatal.borrow_and_update() {
                            return Wake::LinkFatal;
                        }
                    }
                    // Link task gone entirely; fail safe
                    Err(_) => return Wake::LinkFatal,
                },
            }
        }
    }

    /// Drive one run through its stages and record the outcome
    async fn run_pipeline(&mut self, event: IntrusionEvent) {
        let mut run = PipelineRun::new(event);
        self.set_mode(SystemMode::Busy, "intrusion event accepted");
        tracing::info!(
            run_id = %run.id,
            sensors = ?run.event.sensors,
            first_seen = %run.event.first_timestamp,
            "Pipeline run started"
        );

        let mut stages = Vec::new();
        let outcome = self.execute(&mut run, &mut stages).await;

        tracing::info!(
            run_id = %run.id,
            outcome = outcome.as_str(),
            total_ms = run.started_instant.elapsed().as_millis() as u64,
            "Pipeline run finished"
        );

        self.run_log
            .record(RunRecord {
                run_id: run.id,
                sensors: run.event.sensors.iter().copied().collect(),
                outcome,
                stages,
                started_at: run.started_at,
                finished_at: Utc::now(),
            })
            .await;
    }

    async fn execute(
        &mut self,
        run: &mut PipelineRun,
        stages: &mut Vec<StageRecord>,
    ) -> RunOutcome {
        // Capture
        let stage_started = Instant::now();
        let captured = self.capture_stage(run).await;
        push_stage(stages, run, Stage::Capture, stage_started);
        let Some(captured) = captured else {
            return RunOutcome::CaptureFailed;
        };

        // Verify
        run.stage = Stage::Verify;
        let stage_started = Instant::now();
        let verified = self.verify_stage(run, &captured).await;
        push_stage(stages, run, Stage::Verify, stage_started);
        let verdict = match verified {
            VerifyStage::Verdict(verdict) => verdict,
            VerifyStage::Failed => return RunOutcome::VerificationFailed,
        };

        if !verdict.human_present || verdict.confidence < self.config.confidence_threshold {
            tracing::info!(
                run_id = %run.id,
                human_present = verdict.human_present,
                confidence = verdict.confidence,
                threshold = self.config.confidence_threshold,
                "No human confirmed"
            );
            return RunOutcome::NoHumanConfirmed {
                confidence: verdict.confidence,
            };
        }

        // Alert
        run.stage = Stage::Alert;
        tracing::info!(
            run_id = %run.id,
            confidence = verdict.confidence,
            "Human confirmed, alerting"
        );
        let stage_started = Instant::now();
        let alert = self.alert_stage(run).await;
        push_stage(stages, run, Stage::Alert, stage_started);

        RunOutcome::Completed {
            alert_error: alert.error,
        }
    }

    /// Capture stage: bounded retries, linear backoff
    async fn capture_stage(&mut self, run: &mut PipelineRun) -> Option<CaptureResult> {
        let policy = self.policies.capture;
        for attempt in 1..=policy.max_attempts {
            if let Some(delay) = policy.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }
            *run.attempts.entry(Stage::Capture).or_insert(0) += 1;
            self.dispatch_capture(&run.id);

            match self
                .await_stage(&run.id, Stage::Capture, self.config.capture_timeout)
                .await
            {
                Some(StagePayload::Capture(Ok(captured))) => {
                    tracing::info!(
                        run_id = %run.id,
                        attempt = attempt,
                        size = captured.image.len(),
                        "Capture succeeded"
                    );
                    return Some(captured);
                }
                Some(StagePayload::Capture(Err(e))) => {
                    tracing::warn!(
                        run_id = %run.id,
                        attempt = attempt,
                        error = %e,
                        "Capture attempt failed"
                    );
                }
                Some(_) => {
                    tracing::error!(run_id = %run.id, "Mismatched stage payload for capture");
                }
                None => {}
            }
        }
        None
    }

    /// Verify stage: transient errors retried, permanent errors final
    async fn verify_stage(&mut self, run: &mut PipelineRun, captured: &CaptureResult) -> VerifyStage {
        let policy = self.policies.verify;
        for attempt in 1..=policy.max_attempts {
            if let Some(delay) = policy.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }
            *run.attempts.entry(Stage::Verify).or_insert(0) += 1;

            let request = VerifyRequest {
                sensor_ids: run.event.sensors.iter().copied().collect(),
                captured_at: captured.captured_at.to_rfc3339(),
            };
            self.dispatch_verify(&run.id, captured.image.clone(), request);

            match self
                .await_stage(&run.id, Stage::Verify, self.config.verify_timeout)
                .await
            {
                Some(StagePayload::Verify(Ok(verdict))) => {
                    tracing::info!(
                        run_id = %run.id,
                        attempt = attempt,
                        human_present = verdict.human_present,
                        confidence = verdict.confidence,
                        "Verification verdict received"
                    );
                    return VerifyStage::Verdict(verdict);
                }
                Some(StagePayload::Verify(Err(e))) => {
                    if e.is_transient() {
                        tracing::warn!(
                            run_id = %run.id,
                            attempt = attempt,
                            error = %e,
                            "Transient verification failure"
                        );
                    } else {
                        tracing::warn!(
                            run_id = %run.id,
                            attempt = attempt,
                            error = %e,
                            "Permanent verification failure, not retrying"
                        );
                        return VerifyStage::Failed;
                    }
                }
                Some(_) => {
                    tracing::error!(run_id = %run.id, "Mismatched stage payload for verify");
                }
                None => {}
            }
        }
        VerifyStage::Failed
    }

    /// Alert stage: best-effort, failure becomes outcome.error
    async fn alert_stage(&mut self, run: &mut PipelineRun) -> AlertOutcome {
        let policy = self.policies.alert;
        let context = AlertContext {
            text: self.alert_text.clone(),
            sensor_ids: run.event.sensors.iter().copied().collect(),
        };

        let mut last_error = "alert stage never dispatched".to_string();
        for attempt in 1..=policy.max_attempts {
            if let Some(delay) = policy.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }
            *run.attempts.entry(Stage::Alert).or_insert(0) += 1;
            self.dispatch_alert(&run.id, context.clone());

            match self
                .await_stage(&run.id, Stage::Alert, self.config.alert_timeout)
                .await
            {
                Some(StagePayload::Alert(Ok(outcome))) => {
                    tracing::info!(run_id = %run.id, attempt = attempt, "Alert delivered");
                    return outcome;
                }
                Some(StagePayload::Alert(Err(e))) => {
                    tracing::warn!(
                        run_id = %run.id,
                        attempt = attempt,
                        error = %e,
                        "Alert attempt failed"
                    );
                    last_error = e.to_string();
                }
                Some(_) => {
                    tracing::error!(run_id = %run.id, "Mismatched stage payload for alert");
                }
                None => {
                    last_error = "alert stage timed out".to_string();
                }
            }
        }

        AlertOutcome {
            played: false,
            error: Some(last_error),
        }
    }

    fn dispatch_capture(&mut self, run_id: &str) {
        let tag = self.next_generation();
        let run_id = run_id.to_string();
        let capture = self.capture.clone();
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let payload = StagePayload::Capture(capture.capture().await);
            let _ = tx
                .send(StageResult {
                    run_id,
                    stage: Stage::Capture,
                    generation: tag,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    payload,
                })
                .await;
        });
    }

    fn dispatch_verify(&mut self, run_id: &str, image: Vec<u8>, request: VerifyRequest) {
        let tag = self.next_generation();
        let run_id = run_id.to_string();
        let verifier = self.verifier.clone();
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let payload = StagePayload::Verify(verifier.verify(image, request).await);
            let _ = tx
                .send(StageResult {
                    run_id,
                    stage: Stage::Verify,
                    generation: tag,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    payload,
                })
                .await;
        });
    }

    fn dispatch_alert(&mut self, run_id: &str, context: AlertContext) {
        let tag = self.next_generation();
        let run_id = run_id.to_string();
        let alerter = self.alerter.clone();
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let payload = StagePayload::Alert(alerter.synthesize_and_play(&context).await);
            let _ = tx
                .send(StageResult {
                    run_id,
                    stage: Stage::Alert,
                    generation: tag,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    payload,
                })
                .await;
        });
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Wait for the current attempt's result, discarding stale ones.
    ///
    /// Returns `None` on timeout; the attempt keeps running detached and its
    /// eventual result is dropped here by tag mismatch.
    async fn await_stage(
        &mut self,
        run_id: &str,
        stage: Stage,
        timeout: Duration,
    ) -> Option<StagePayload> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.results_rx.recv()).await {
                Ok(Some(result)) => {
                    if result.generation == self.generation
                        && result.run_id == run_id
                        && result.stage == stage
                    {
                        return Some(result.payload);
                    }
                    tracing::warn!(
                        run_id = %result.run_id,
                        stage = result.stage.as_str(),
                        generation = result.generation,
                        current_generation = self.generation,
                        elapsed_ms = result.elapsed_ms,
                        "Discarding late result from abandoned attempt"
                    );
                }
                Ok(None) => return None,
                Err(_) => {
                    tracing::warn!(
                        run_id = %run_id,
                        stage = stage.as_str(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Stage attempt timed out, abandoning"
                    );
                    return None;
                }
            }
        }
    }

    /// Post-run quiet period; events arriving meanwhile are discarded
    async fn cooldown(&mut self) -> bool {
        self.set_mode(SystemMode::Cooldown, "run finished");
        let deadline = Instant::now() + self.config.cooldown;
        let mut disarm = false;
        let mut control_closed = false;
        let mut link_watch_open = true;
        let mut fatal = *self.link_fatal.borrow();

        while !fatal {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                cmd = self.control.recv(), if !control_closed => match cmd {
                    // Takes effect at the cooldown boundary, never mid-run
                    Some(ControlCommand::Disarm) => disarm = true,
                    Some(ControlCommand::Arm) => disarm = false,
                    None => control_closed = true,
                },
                changed = self.link_fatal.changed(), if link_watch_open => match changed {
                    Ok(()) => fatal = *self.link_fatal.borrow_and_update(),
                    Err(_) => link_watch_open = false,
                },
            }
        }

        if let Some(stale) = self.events.discard().await {
            tracing::info!(
                sensors = ?stale.sensors,
                "Discarding intrusion event received during run or cooldown"
            );
        }

        if fatal {
            self.set_mode(SystemMode::Disarmed, "serial link fatal");
        } else if disarm {
            self.set_mode(SystemMode::Disarmed, "disarm requested");
        } else {
            self.set_mode(SystemMode::Armed, "cooldown complete");
        }

        !control_closed
    }

    /// Transition into Armed, dropping anything that arrived while not armed
    async fn arm(&mut self) {
        if let Some(stale) = self.events.discard().await {
            tracing::info!(
                sensors = ?stale.sensors,
                "Discarding intrusion event received while disarmed"
            );
        }
        self.set_mode(SystemMode::Armed, "armed");
    }

    fn set_mode(&self, mode: SystemMode, reason: &str) {
        let prev = *self.mode.borrow();
        if prev == mode {
            return;
        }
        tracing::info!(from = ?prev, to = ?mode, reason = reason, "System mode transition");
        let _ = self.mode.send(mode);
    }
}

fn push_stage(
    stages: &mut Vec<StageRecord>,
    run: &PipelineRun,
    stage: Stage,
    started: Instant,
) {
    stages.push(StageRecord {
        stage,
        attempts: run.attempts_for(stage),
        duration_ms: started.elapsed().as_millis() as u64,
    });
}
