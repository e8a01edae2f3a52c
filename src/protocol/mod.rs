//! Protocol drivers.
//!
//! # Design
//! A protocol driver turns inbound CAN frames into engine events and engine
//! signal values into outbound frames. The engine itself never learns frame
//! layouts: the dispatcher feeds signal updates into the driver's cache,
//! asks it to encode a protocol id on demand and pumps its cyclic machinery
//! once per tick. Decode and encode are pure with respect to the wire; all
//! state lives in the driver value the caller provides storage for.
//!
//! The [ProtocolDriver] trait is the one deliberately open seam of the
//! engine: integrators add protocols by implementing it, everything else is
//! a closed set of tagged contexts.

pub mod canopen;
pub mod dtc;
pub mod j1939;
pub mod uds;

pub mod calibration;

pub use isotp;

use bitflags::bitflags;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::engine::output::OutputType;
use crate::engine::signal::Event;

/// Most events one frame may decode into.
pub const MAX_DECODE_EVENTS: usize = 8;

/// Most frames one cyclic pump may emit per driver.
pub const MAX_CYCLIC_FRAMES: usize = 8;

/// Protocol ids (PGNs, COB-ids) one driver can map.
pub const MAX_PROTOCOL_IDS: usize = 16;

/// Signal fields packed into one frame.
pub const MAX_FRAME_FIELDS: usize = 4;

bitflags! {
    /// Transport-level frame attributes.
    pub struct FrameFlags: u32 {
        const EXTENDED = 0b0001;
        const REMOTE   = 0b0010;
    }
}

/// A CAN frame as exchanged with the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
    pub flags: FrameFlags,
    pub timestamp_us: u64,
}

impl CanFrame {
    /// Build a data frame; ids above the 11-bit range become extended.
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        let flags = if id > 0x7FF {
            FrameFlags::EXTENDED
        } else {
            FrameFlags::empty()
        };
        CanFrame {
            id,
            data,
            len: len as u8,
            flags,
            timestamp_us: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// One signal packed into a frame as a little-endian unsigned field.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub signal: u8,
    /// First byte of the field inside the frame data.
    pub start: u8,
    /// Field width in bytes: 1, 2 or 4.
    pub width: u8,
}

/// Inbound: protocol id to the signals its payload feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeMapping {
    pub id: u32,
    pub fields: Vec<FieldMapping, MAX_FRAME_FIELDS>,
}

/// Outbound: protocol id packed from cached signal values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeMapping {
    pub id: u32,
    pub fields: Vec<FieldMapping, MAX_FRAME_FIELDS>,
    /// Cyclic transmission period; zero means on-change only.
    #[serde(default)]
    pub period_ms: u32,
}

/// The uniform driver contract the dispatcher programs against.
pub trait ProtocolDriver {
    /// The output event type this driver consumes.
    fn kind(&self) -> OutputType;

    /// Parse one inbound frame into zero or more ingest events.
    fn decode(
        &mut self,
        now_us: u64,
        frame: &CanFrame,
        events: &mut Vec<Event, MAX_DECODE_EVENTS>,
    );

    /// Pack the current cached values for one protocol id.
    fn encode(&mut self, target_id: u32, now_us: u64) -> Option<CanFrame>;

    /// Emit frames whose cyclic period elapsed, plus protocol housekeeping
    /// traffic (heartbeats, emergencies, bootup).
    fn get_cyclic(
        &mut self,
        now_us: u64,
        frames: &mut Vec<CanFrame, MAX_CYCLIC_FRAMES>,
    );

    /// Update the driver's encode cache for one signal.
    fn update_signal(&mut self, signal: u8, value: i32, timestamp_us: u64);
}

/// Extract a little-endian unsigned field from frame data.
pub(crate) fn read_field(data: &[u8; 8], start: u8, width: u8) -> Option<i32> {
    let start = start as usize;
    let width = width as usize;
    if width == 0 || width > 4 || start + width > 8 {
        return None;
    }
    let mut value: u32 = 0;
    for (i, byte) in data[start..start + width].iter().enumerate() {
        value |= (*byte as u32) << (8 * i);
    }
    Some(value as i32)
}

/// Store a little-endian field into frame data.
pub(crate) fn write_field(data: &mut [u8; 8], start: u8, width: u8, value: i32) {
    let start = start as usize;
    let width = (width as usize).min(4);
    if start + width > 8 {
        return;
    }
    let raw = value as u32;
    for i in 0..width {
        data[start + i] = (raw >> (8 * i)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_round_trip() {
        let mut data = [0u8; 8];
        write_field(&mut data, 3, 2, 0x1234);
        assert_eq!(data[3], 0x34);
        assert_eq!(data[4], 0x12);
        assert_eq!(read_field(&data, 3, 2), Some(0x1234));
    }

    #[test]
    fn out_of_bounds_fields_are_rejected() {
        let data = [0u8; 8];
        assert_eq!(read_field(&data, 7, 2), None);
        assert_eq!(read_field(&data, 0, 0), None);
        assert_eq!(read_field(&data, 0, 5), None);
    }

    #[test]
    fn extended_ids_are_flagged() {
        assert!(CanFrame::new(0x18FEF100, &[]).flags.contains(FrameFlags::EXTENDED));
        assert!(!CanFrame::new(0x123, &[]).flags.contains(FrameFlags::EXTENDED));
    }
}
