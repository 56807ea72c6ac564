//! Perimeter Sentry Library
//!
//! AI-verified perimeter intrusion response pipeline.
//!
//! ## Architecture (7 Components)
//!
//! 1. SerialLink - Sensor event ingestion over the microcontroller link
//! 2. Debouncer - Edge burst coalescing into intrusion events
//! 3. CaptureAdapter - Scene image acquisition from the IP camera
//! 4. VerificationClient - Remote human-presence verdict
//! 5. AlertClient - Voice warning synthesis and playback
//! 6. PipelineOrchestrator - Mode ownership and stage coordination
//! 7. RunLogService - Audit trail of every run
//!
//! ## Design Principles
//!
//! - One owner: SystemMode and the active run are mutated only by the
//!   orchestrator task
//! - Bounded everything: debounce windows, retries, timeouts, ring buffers
//! - Fail armed: every run outcome cools down and re-arms; only fatal link
//!   loss or an explicit disarm leaves the system disarmed

pub mod alert;
pub mod capture;
pub mod debouncer;
pub mod error;
pub mod orchestrator;
pub mod run_log;
pub mod serial_link;
pub mod state;
pub mod verify;

pub use error::{Error, Result};
pub use orchestrator::{ControlHandle, PipelineOrchestrator, SystemMode};
pub use state::AppConfig;
