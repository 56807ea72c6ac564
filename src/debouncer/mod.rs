//! Debouncer - Edge Burst Coalescing
//!
//! ## Responsibilities
//!
//! - Collapse bursts of raw sensor edges into single `IntrusionEvent`s
//! - Cancel windows where every sensor clears before the debounce threshold
//! - Absorb the trailing bounce of a burst after emission
//!
//! The `Debouncer` itself is a pure function of time and the event stream:
//! every method takes its clock reading from the caller, so tests drive it
//! with synthetic instants. `spawn_debouncer` is the async driver, and
//! `EventSlot` is the latest-wins hand-off to the orchestrator (a newer
//! event supersedes an untaken one; nothing queues unboundedly).

use crate::serial_link::{EdgeType, SensorEvent};
use crate::state::DebounceConfig;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One coalesced intrusion, ready for the pipeline
#[derive(Debug, Clone)]
pub struct IntrusionEvent {
    /// Sensors that triggered within the window
    pub sensors: BTreeSet<u8>,
    /// First trigger in the burst
    pub first_at: Instant,
    /// Most recent trigger in the burst
    pub last_at: Instant,
    /// Wall-clock time of the first trigger, for the audit trail
    pub first_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// Quiet; no window open
    Idle,
    /// One sensor triggered, waiting for the window to resolve
    Accumulating {
        sensor_id: u8,
        first_at: Instant,
        first_timestamp: DateTime<Utc>,
        deadline: Instant,
    },
    /// An event was emitted; absorb the rest of the burst until quiet
    Holding { deadline: Instant },
}

/// Debounce state machine
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: State,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            window: config.window,
            state: State::Idle,
        }
    }

    /// Feed one sensor edge; `event.at` is the clock reading.
    pub fn on_event(&mut self, event: &SensorEvent) -> Option<IntrusionEvent> {
        // A deadline may have lapsed between the last poll and this edge;
        // resolve the expiry first, then absorb the edge into the hold.
        if let Some(emitted) = self.on_deadline(event.at) {
            self.absorb_or_start(event);
            return Some(emitted);
        }

        match (self.state, event.edge) {
            (State::Idle, EdgeType::Triggered) => {
                self.state = State::Accumulating {
                    sensor_id: event.sensor_id,
                    first_at: event.at,
                    first_timestamp: event.timestamp,
                    deadline: event.at + self.window,
                };
                None
            }
            (State::Idle, EdgeType::Cleared) => None,
            (
                State::Accumulating {
                    sensor_id,
                    first_at,
                    first_timestamp,
                    ..
                },
                EdgeType::Triggered,
            ) => {
                // Second trigger inside the window confirms the burst
                let mut sensors = BTreeSet::from([sensor_id]);
                sensors.insert(event.sensor_id);
                self.state = State::Holding {
                    deadline: event.at + self.window,
                };
                Some(IntrusionEvent {
                    sensors,
                    first_at,
                    last_at: event.at,
                    first_timestamp,
                })
            }
            (State::Accumulating { sensor_id, .. }, EdgeType::Cleared) => {
                if sensor_id == event.sensor_id {
                    // The only active sensor cleared below threshold: noise
                    self.state = State::Idle;
                }
                None
            }
            (State::Holding { .. }, _) => {
                self.state = State::Holding {
                    deadline: event.at + self.window,
                };
                None
            }
        }
    }

    /// Advance the clock; emits when an accumulating window expires active.
    pub fn on_deadline(&mut self, now: Instant) -> Option<IntrusionEvent> {
        match self.state {
            State::Accumulating {
                sensor_id,
                first_at,
                first_timestamp,
                deadline,
            } if now >= deadline => {
                self.state = State::Holding {
                    deadline: now + self.window,
                };
                Some(IntrusionEvent {
                    sensors: BTreeSet::from([sensor_id]),
                    first_at,
                    last_at: first_at,
                    first_timestamp,
                })
            }
            State::Holding { deadline } if now >= deadline => {
                self.state = State::Idle;
                None
            }
            _ => None,
        }
    }

    /// Next instant at which `on_deadline` should be polled
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Idle => None,
            State::Accumulating { deadline, .. } | State::Holding { deadline } => Some(*deadline),
        }
    }

    /// Apply an edge that arrived together with a deadline emission
    fn absorb_or_start(&mut self, event: &SensorEvent) {
        let _ = self.on_event(event);
    }
}

/// Latest-wins hand-off slot between the debouncer and the orchestrator
#[derive(Default)]
pub struct EventSlot {
    inner: Mutex<Option<IntrusionEvent>>,
    notify: Notify,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an event, superseding any untaken one
    pub async fn put(&self, event: IntrusionEvent) {
        let mut slot = self.inner.lock().await;
        if let Some(old) = slot.replace(event) {
            tracing::debug!(
                sensors = ?old.sensors,
                "Pending intrusion event superseded by newer burst"
            );
        }
        drop(slot);
        self.notify.notify_one();
    }

    /// Wait for the next event
    pub async fn take(&self) -> IntrusionEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.inner.lock().await.take() {
                return event;
            }
            notified.await;
        }
    }

    /// Discard any pending event, returning it for logging
    pub async fn discard(&self) -> Option<IntrusionEvent> {
        self.inner.lock().await.take()
    }
}

/// Drive the debouncer from the sensor event channel into the slot
pub fn spawn_debouncer(
    mut debouncer: Debouncer,
    mut events: mpsc::Receiver<SensorEvent>,
    slot: Arc<EventSlot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Sensor event channel closed, stopping debouncer");
                        break;
                    };
                    if let Some(intrusion) = debouncer.on_event(&event) {
                        tracing::info!(
                            sensors = ?intrusion.sensors,
                            "Intrusion event emitted"
                        );
                        slot.put(intrusion).await;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(intrusion) = debouncer.on_deadline(Instant::now()) {
                        tracing::info!(
                            sensors = ?intrusion.sensors,
                            "Intrusion event emitted at window expiry"
                        );
                        slot.put(intrusion).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: Duration = Duration::from_millis(300);

    fn debouncer() -> Debouncer {
        Debouncer::new(DebounceConfig { window: D })
    }

    fn edge(sensor_id: u8, edge: EdgeType, base: Instant, offset_ms: u64) -> SensorEvent {
        SensorEvent {
            sensor_id,
            edge,
            seq: 0,
            at: base + Duration::from_millis(offset_ms),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_trigger_then_clear_below_threshold_emits_nothing() {
        // Scenario: triggered at t=0, cleared at t=50ms
        let base = Instant::now();
        let mut d = debouncer();

        assert!(d.on_event(&edge(1, EdgeType::Triggered, base, 0)).is_none());
        assert!(d.on_event(&edge(1, EdgeType::Cleared, base, 50)).is_none());
        assert!(d.on_deadline(base + Duration::from_millis(500)).is_none());
        assert!(d.next_deadline().is_none());
    }

    #[test]
    fn test_uncleaned_trigger_emits_at_window_expiry() {
        // Scenario: triggered at t=0, never cleared -> one event at t=D
        let base = Instant::now();
        let mut d = debouncer();

        assert!(d.on_event(&edge(1, EdgeType::Triggered, base, 0)).is_none());
        assert_eq!(d.next_deadline(), Some(base + D));

        let emitted = d.on_deadline(base + D).expect("window expiry must emit");
        assert_eq!(emitted.sensors, BTreeSet::from([1]));
        assert_eq!(emitted.first_at, base);
    }

    #[test]
    fn test_second_trigger_emits_immediately() {
        let base = Instant::now();
        let mut d = debouncer();

        assert!(d.on_event(&edge(1, EdgeType::Triggered, base, 0)).is_none());
        let emitted = d
            .on_event(&edge(2, EdgeType::Triggered, base, 100))
            .expect("second trigger must emit");
        assert_eq!(emitted.sensors, BTreeSet::from([1, 2]));
        assert_eq!(emitted.last_at, base + Duration::from_millis(100));
    }

    #[test]
    fn test_burst_emits_exactly_once_regardless_of_size() {
        // Ten triggers spaced 40ms apart: one event total
        let base = Instant::now();
        let mut d = debouncer();

        let mut emitted = 0;
        for i in 0..10u64 {
            let sensor = (i % 3) as u8;
            if d
                .on_event(&edge(sensor, EdgeType::Triggered, base, i * 40))
                .is_some()
            {
                emitted += 1;
            }
        }
        // Trailing quiet: hold window lapses with no further emission
        assert!(d.on_deadline(base + Duration::from_secs(2)).is_none());
        assert_eq!(emitted, 1);
        assert!(matches!(d.state, State::Idle));
    }

    #[test]
    fn test_new_burst_after_quiet_emits_again() {
        let base = Instant::now();
        let mut d = debouncer();

        d.on_event(&edge(1, EdgeType::Triggered, base, 0));
        assert!(d.on_event(&edge(1, EdgeType::Triggered, base, 50)).is_some());

        // Quiet gap longer than the hold window, then a fresh burst
        assert!(d.on_deadline(base + Duration::from_millis(400)).is_none());
        d.on_event(&edge(2, EdgeType::Triggered, base, 1000));
        let second = d.on_event(&edge(2, EdgeType::Triggered, base, 1050));
        assert_eq!(second.expect("fresh burst").sensors, BTreeSet::from([2]));
    }

    #[test]
    fn test_clear_from_other_sensor_does_not_cancel() {
        let base = Instant::now();
        let mut d = debouncer();

        d.on_event(&edge(1, EdgeType::Triggered, base, 0));
        assert!(d.on_event(&edge(2, EdgeType::Cleared, base, 10)).is_none());

        // Sensor 1 is still active; the window still emits at expiry
        assert!(d.on_deadline(base + D).is_some());
    }

    #[test]
    fn test_late_edge_first_resolves_expired_window() {
        // The driver may deliver an edge after the deadline already passed
        let base = Instant::now();
        let mut d = debouncer();

        d.on_event(&edge(1, EdgeType::Triggered, base, 0));
        let emitted = d.on_event(&edge(2, EdgeType::Triggered, base, 500));
        // Window for sensor 1 expired at t=300; that emission surfaces here,
        // and the t=500 edge is absorbed into the hold.
        let emitted = emitted.expect("expired window must emit");
        assert_eq!(emitted.sensors, BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn test_slot_latest_wins() {
        let slot = EventSlot::new();
        let base = Instant::now();
        let event = |s: u8| IntrusionEvent {
            sensors: BTreeSet::from([s]),
            first_at: base,
            last_at: base,
            first_timestamp: Utc::now(),
        };

        slot.put(event(1)).await;
        slot.put(event(2)).await;
        let taken = slot.take().await;
        assert_eq!(taken.sensors, BTreeSet::from([2]));
        assert!(slot.discard().await.is_none());
    }
}
