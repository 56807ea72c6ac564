//! Sensor wire frame: `[0xA5][sensor_id:u8][edge:u8][seq:u16 BE][checksum:u8]`
//!
//! Fixed 6-byte frames from the sensor microcontroller. The checksum is the
//! XOR of the four payload bytes. Decoding resynchronizes on the start byte
//! and fails closed: malformed bytes are rejected, never surfaced as events.

/// Frame start-of-frame marker
pub const SOF: u8 = 0xA5;

/// Total frame length in bytes
pub const FRAME_LEN: usize = 6;

/// Edge type reported by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EdgeType {
    Cleared = 0x00,
    Triggered = 0x01,
}

impl TryFrom<u8> for EdgeType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(Self::Cleared),
            0x01 => Ok(Self::Triggered),
            _ => Err(FrameError::UnknownEdge(value)),
        }
    }
}

/// Frame validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Checksum mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    BadChecksum { expected: u8, got: u8 },

    #[error("Unknown edge type: 0x{0:02x}")]
    UnknownEdge(u8),
}

/// A validated sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame {
    pub sensor_id: u8,
    pub edge: EdgeType,
    pub seq: u16,
}

/// Outcome of one decode attempt against the front of a byte buffer
#[derive(Debug)]
pub enum Decoded {
    /// A complete valid frame; advance `consumed` bytes
    Frame { frame: SensorFrame, consumed: usize },
    /// Malformed frame; advance `consumed` bytes and try again
    Reject { reason: FrameError, consumed: usize },
    /// Not enough bytes yet; `consumed` leading non-SOF bytes can be dropped
    Incomplete { consumed: usize },
}

impl SensorFrame {
    /// Encode this frame for the wire
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let seq = self.seq.to_be_bytes();
        let payload = [self.sensor_id, self.edge as u8, seq[0], seq[1]];
        [
            SOF,
            payload[0],
            payload[1],
            payload[2],
            payload[3],
            checksum(&payload),
        ]
    }
}

/// Attempt to decode one frame from the front of `buf`.
///
/// Leading bytes before the first SOF are reported as consumed garbage. A
/// frame that fails validation consumes only its SOF byte, so a real frame
/// starting inside the rejected span is still found on the next call.
pub fn decode(buf: &[u8]) -> Decoded {
    let start = match buf.iter().position(|&b| b == SOF) {
        Some(i) => i,
        None => {
            return Decoded::Incomplete {
                consumed: buf.len(),
            }
        }
    };

    if buf.len() - start < FRAME_LEN {
        return Decoded::Incomplete { consumed: start };
    }

    let frame = &buf[start..start + FRAME_LEN];
    let payload = [frame[1], frame[2], frame[3], frame[4]];
    let expected = checksum(&payload);
    if frame[5] != expected {
        return Decoded::Reject {
            reason: FrameError::BadChecksum {
                expected,
                got: frame[5],
            },
            consumed: start + 1,
        };
    }

    let edge = match EdgeType::try_from(frame[2]) {
        Ok(edge) => edge,
        Err(reason) => {
            return Decoded::Reject {
                reason,
                consumed: start + 1,
            }
        }
    };

    Decoded::Frame {
        frame: SensorFrame {
            sensor_id: frame[1],
            edge,
            seq: u16::from_be_bytes([frame[3], frame[4]]),
        },
        consumed: start + FRAME_LEN,
    }
}

fn checksum(payload: &[u8; 4]) -> u8 {
    payload.iter().fold(0, |acc, b| acc ^ b)
}
