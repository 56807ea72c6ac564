//! SerialLink - Sensor Event Ingestion
//!
//! ## Responsibilities
//!
//! - Read checksummed frames from the sensor microcontroller
//! - Validate frames and surface them as `SensorEvent`s
//! - Track per-sensor sequence numbers (gaps are logged, never fabricated)
//! - Reconnect on transport loss with capped exponential backoff
//! - Declare the link fatal after too many consecutive failed reconnects

use crate::error::{Error, Result};
use crate::state::LinkConfig;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub mod frame;

pub use frame::{EdgeType, FrameError, SensorFrame};

const READ_BUF_CAPACITY: usize = 256;

/// A discrete sensor edge, as received over the link
#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub sensor_id: u8,
    pub edge: EdgeType,
    pub seq: u16,
    /// Receive time, used for debounce arithmetic
    pub at: Instant,
    /// Wall-clock receive time, used for the audit trail
    pub timestamp: DateTime<Utc>,
}

/// Byte stream the link reads frames from
pub trait ByteStream: AsyncRead + Send + Unpin {}

impl<T: AsyncRead + Send + Unpin> ByteStream for T {}

/// Factory for (re)establishing the link transport
///
/// Production uses a serial port; tests hand out in-memory duplex streams.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ByteStream>>;
}

/// Serial-port transport backed by tokio-serial
pub struct SerialPortTransport {
    path: String,
    baud: u32,
}

impl SerialPortTransport {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }
}

#[async_trait]
impl LinkTransport for SerialPortTransport {
    async fn connect(&self) -> Result<Box<dyn ByteStream>> {
        let stream =
            tokio_serial::SerialStream::open(&tokio_serial::new(self.path.as_str(), self.baud))
            .map_err(|e| Error::Link(format!("open {}: {}", self.path, e)))?;
        Ok(Box::new(stream))
    }
}

/// SerialLink instance
///
/// `spawn` starts the long-lived read task. Sensor events flow out through
/// the returned channel; a fatal link failure is published on the watch and
/// ends the task.
pub struct SerialLink {
    transport: Arc<dyn LinkTransport>,
    config: LinkConfig,
    events: mpsc::Sender<SensorEvent>,
    fatal: watch::Sender<bool>,
    /// Next expected sequence number per sensor
    expected_seq: HashMap<u8, u16>,
}

impl SerialLink {
    /// Create a new link.
    ///
    /// Returns the link plus the event receiver and the fatal-error watch.
    pub fn new(
        transport: Arc<dyn LinkTransport>,
        config: LinkConfig,
    ) -> (Self, mpsc::Receiver<SensorEvent>, watch::Receiver<bool>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (fatal_tx, fatal_rx) = watch::channel(false);
        (
            Self {
                transport,
                config,
                events: event_tx,
                fatal: fatal_tx,
                expected_seq: HashMap::new(),
            },
            event_rx,
            fatal_rx,
        )
    }

    /// Start the read task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut backoff = self.config.reconnect_initial;
        let mut failures: u32 = 0;

        loop {
            match self.transport.connect().await {
                Ok(stream) => {
                    if failures > 0 {
                        tracing::info!(after_failures = failures, "Serial link reconnected");
                    } else {
                        tracing::info!("Serial link connected");
                    }
                    failures = 0;
                    backoff = self.config.reconnect_initial;

                    match self.read_frames(stream).await {
                        LinkExit::ReceiverClosed => {
                            tracing::info!("Event receiver closed, stopping serial link");
                            return;
                        }
                        LinkExit::TransportLost(reason) => {
                            tracing::warn!(reason = %reason, "Serial link lost, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_reconnect_failures {
                        tracing::error!(
                            failures = failures,
                            error = %e,
                            "Serial link fatal: reconnect budget exhausted"
                        );
                        let _ = self.fatal.send(true);
                        return;
                    }
                    tracing::warn!(
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Serial link connect failed, backing off"
                    );
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.reconnect_cap);
        }
    }

    /// Read frames until the transport fails or the receiver goes away
    async fn read_frames(&mut self, mut stream: Box<dyn ByteStream>) -> LinkExit {
        let mut buf = BytesMut::with_capacity(READ_BUF_CAPACITY);

        loop {
            // Drain every complete frame currently buffered
            loop {
                match frame::decode(&buf) {
                    frame::Decoded::Frame { frame, consumed } => {
                        buf.advance(consumed);
                        if !self.handle_frame(frame).await {
                            return LinkExit::ReceiverClosed;
                        }
                    }
                    frame::Decoded::Reject { reason, consumed } => {
                        buf.advance(consumed);
                        tracing::warn!(reason = %reason, "Discarding malformed frame");
                    }
                    frame::Decoded::Incomplete { consumed } => {
                        if consumed > 0 {
                            buf.advance(consumed);
                            tracing::debug!(bytes = consumed, "Discarding inter-frame garbage");
                        }
                        break;
                    }
                }
            }

            match stream.read_buf(&mut buf).await {
                Ok(0) => return LinkExit::TransportLost("EOF".to_string()),
                Ok(_) => {}
                Err(e) => return LinkExit::TransportLost(e.to_string()),
            }
        }
    }

    /// Convert a validated frame into a SensorEvent; false if the receiver is gone
    async fn handle_frame(&mut self, frame: SensorFrame) -> bool {
        self.note_sequence(frame.sensor_id, frame.seq);

        let event = SensorEvent {
            sensor_id: frame.sensor_id,
            edge: frame.edge,
            seq: frame.seq,
            at: Instant::now(),
            timestamp: Utc::now(),
        };

        tracing::debug!(
            sensor_id = event.sensor_id,
            edge = ?event.edge,
            seq = event.seq,
            "Sensor event received"
        );

        self.events.send(event).await.is_ok()
    }

    /// Sequence bookkeeping: gaps and duplicates are logged only.
    ///
    /// The first frame from a sensor adopts its sequence number as the
    /// baseline, so attaching mid-stream does not log a spurious gap.
    fn note_sequence(&mut self, sensor_id: u8, seq: u16) {
        match self.expected_seq.get(&sensor_id) {
            Some(&expected) if expected != seq => {
                let lost = seq.wrapping_sub(expected);
                if lost <= u16::MAX / 2 {
                    tracing::warn!(
                        sensor_id = sensor_id,
                        expected = expected,
                        got = seq,
                        lost = lost,
                        "Sequence gap on serial link"
                    );
                } else {
                    tracing::warn!(
                        sensor_id = sensor_id,
                        expected = expected,
                        got = seq,
                        "Duplicate or reordered frame on serial link"
                    );
                }
            }
            _ => {}
        }
        self.expected_seq.insert(sensor_id, seq.wrapping_add(1));
    }
}

enum LinkExit {
    /// The event receiver was dropped; the process is shutting down
    ReceiverClosed,
    /// The transport errored or hit EOF
    TransportLost(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex;

    /// Transport whose connect() hands out pre-queued duplex streams
    struct ScriptedTransport {
        streams: Mutex<Vec<Box<dyn ByteStream>>>,
    }

    impl ScriptedTransport {
        fn new(streams: Vec<Box<dyn ByteStream>>) -> Self {
            Self {
                streams: Mutex::new(streams),
            }
        }
    }

    #[async_trait]
    impl LinkTransport for ScriptedTransport {
        async fn connect(&self) -> Result<Box<dyn ByteStream>> {
            self.streams
                .lock()
                .await
                .pop()
                .ok_or_else(|| Error::Link("no more streams".to_string()))
        }
    }

    fn encoded(sensor_id: u8, edge: EdgeType, seq: u16) -> [u8; frame::FRAME_LEN] {
        SensorFrame {
            sensor_id,
            edge,
            seq,
        }
        .encode()
    }

    #[tokio::test]
    async fn test_events_flow_from_stream() {
        let (mut client, server) = tokio::io::duplex(256);
        let transport = Arc::new(ScriptedTransport::new(vec![Box::new(server)]));
        let (link, mut events, _fatal) = SerialLink::new(transport, LinkConfig::default());
        link.spawn();

        client
            .write_all(&encoded(1, EdgeType::Triggered, 10))
            .await
            .unwrap();
        client
            .write_all(&encoded(2, EdgeType::Cleared, 3))
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(first.sensor_id, 1);
        assert_eq!(first.edge, EdgeType::Triggered);
        assert_eq!(first.seq, 10);

        let second = events.recv().await.unwrap();
        assert_eq!(second.sensor_id, 2);
        assert_eq!(second.edge, EdgeType::Cleared);
    }

    #[tokio::test]
    async fn test_malformed_frames_discarded() {
        let (mut client, server) = tokio::io::duplex(256);
        let transport = Arc::new(ScriptedTransport::new(vec![Box::new(server)]));
        let (link, mut events, _fatal) = SerialLink::new(transport, LinkConfig::default());
        link.spawn();

        let mut bad = encoded(1, EdgeType::Triggered, 1);
        bad[5] ^= 0xFF;
        client.write_all(&bad).await.unwrap();
        client.write_all(&[0x00, 0x13]).await.unwrap();
        client
            .write_all(&encoded(4, EdgeType::Triggered, 2))
            .await
            .unwrap();

        // Only the valid frame surfaces
        let event = events.recv().await.unwrap();
        assert_eq!(event.sensor_id, 4);
        assert_eq!(event.seq, 2);
    }

    #[tokio::test]
    async fn test_sequence_gap_does_not_fabricate_events() {
        let (mut client, server) = tokio::io::duplex(256);
        let transport = Arc::new(ScriptedTransport::new(vec![Box::new(server)]));
        let (link, mut events, _fatal) = SerialLink::new(transport, LinkConfig::default());
        link.spawn();

        // Frames 1 then 5: the gap is logged, but exactly two events surface
        client
            .write_all(&encoded(7, EdgeType::Triggered, 1))
            .await
            .unwrap();
        client
            .write_all(&encoded(7, EdgeType::Cleared, 5))
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap().seq, 1);
        assert_eq!(events.recv().await.unwrap().seq, 5);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fatal_after_reconnect_budget() {
        // A transport that never connects again
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let config = LinkConfig {
            reconnect_initial: std::time::Duration::from_millis(1),
            reconnect_cap: std::time::Duration::from_millis(2),
            max_reconnect_failures: 3,
        };
        let (link, _events, mut fatal) = SerialLink::new(transport, config);
        let handle = link.spawn();

        fatal.changed().await.unwrap();
        assert!(*fatal.borrow());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_after_stream_loss() {
        let (mut client_a, server_a) = tokio::io::duplex(256);
        let (mut client_b, server_b) = tokio::io::duplex(256);
        // Streams pop in reverse order: a first, then b
        let transport = Arc::new(ScriptedTransport::new(vec![
            Box::new(server_b),
            Box::new(server_a),
        ]));
        let config = LinkConfig {
            reconnect_initial: std::time::Duration::from_millis(1),
            ..LinkConfig::default()
        };
        let (link, mut events, _fatal) = SerialLink::new(transport, config);
        link.spawn();

        client_a
            .write_all(&encoded(1, EdgeType::Triggered, 1))
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap().seq, 1);
        drop(client_a); // EOF forces a reconnect

        client_b
            .write_all(&encoded(1, EdgeType::Triggered, 2))
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap().seq, 2);
    }
}
