//! RunLogService - Pipeline Run Audit Trail (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Keep the most recent run records in a bounded ring buffer
//! - Provide audit queries (latest runs, count)
//!
//! Persistence is out of scope; the trail is in-memory only.

use crate::orchestrator::types::RunRecord;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Ring buffer for run records
struct RunRingBuffer {
    records: VecDeque<RunRecord>,
    capacity: usize,
}

impl RunRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, record: RunRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn latest(&self, count: usize) -> Vec<RunRecord> {
        self.records.iter().rev().take(count).cloned().collect()
    }
}

/// RunLogService instance
pub struct RunLogService {
    buffer: RwLock<RunRingBuffer>,
}

impl RunLogService {
    /// Create new RunLogService
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(RunRingBuffer::new(capacity)),
        }
    }

    /// Record a finished run
    pub async fn record(&self, record: RunRecord) {
        tracing::debug!(run_id = %record.run_id, outcome = record.outcome.as_str(), "Run recorded");
        self.buffer.write().await.push(record);
    }

    /// Most recent runs, newest first
    pub async fn latest(&self, count: usize) -> Vec<RunRecord> {
        self.buffer.read().await.latest(count)
    }

    /// Number of buffered records
    pub async fn count(&self) -> usize {
        self.buffer.read().await.records.len()
    }
}

impl Default for RunLogService {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::RunOutcome;
    use chrono::Utc;

    fn record(id: &str) -> RunRecord {
        RunRecord {
            run_id: id.to_string(),
            sensors: vec![1],
            outcome: RunOutcome::CaptureFailed,
            stages: vec![],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let log = RunLogService::new(2);
        log.record(record("run-1")).await;
        log.record(record("run-2")).await;
        log.record(record("run-3")).await;

        assert_eq!(log.count().await, 2);
        let latest = log.latest(10).await;
        assert_eq!(latest[0].run_id, "run-3");
        assert_eq!(latest[1].run_id, "run-2");
    }

    #[tokio::test]
    async fn test_latest_respects_count() {
        let log = RunLogService::default();
        for i in 0..5 {
            log.record(record(&format!("run-{}", i))).await;
        }
        assert_eq!(log.latest(3).await.len(), 3);
    }
}
