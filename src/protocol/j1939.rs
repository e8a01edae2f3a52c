//! SAE J1939 driver: 29-bit id codec, parameter-group packing and the
//! standard groups the pipeline exchanges.
//!
//! Raw parameter values cross this layer unscaled; unit conversion is the
//! engine's business (scale contexts), so the decode/encode maps stay pure
//! byte extraction.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::engine::output::OutputType;
use crate::engine::signal::{Event, Status};
use crate::protocol::{
    read_field, write_field, CanFrame, DecodeMapping, EncodeMapping,
    ProtocolDriver, MAX_CYCLIC_FRAMES, MAX_DECODE_EVENTS, MAX_PROTOCOL_IDS,
};
use crate::MAX_SIGNALS;

/// Electronic engine controller 1: speed and torque.
pub const PGN_EEC1: u32 = 61444;
/// Engine temperature 1: coolant temperature.
pub const PGN_ET1: u32 = 65262;
/// Request PGN.
pub const PGN_REQUEST: u32 = 59904;
/// Active diagnostic trouble codes.
pub const PGN_DM1: u32 = 65226;
/// Previously active diagnostic trouble codes.
pub const PGN_DM2: u32 = 65227;

/// Default transmit priority for data groups.
const DEFAULT_PRIORITY: u8 = 6;

/// Assemble a 29-bit identifier: `prio(3) | EDP/DP | PF | PS | SA`.
///
/// The 18-bit PGN carries the EDP/DP bits; for destination-specific groups
/// (PF < 240) the caller folds the destination into the PGN's PS byte.
pub fn encode_id(priority: u8, pgn: u32, source_address: u8) -> u32 {
    ((priority as u32 & 0x7) << 26)
        | ((pgn & 0x3FFFF) << 8)
        | source_address as u32
}

/// The parameter group of an identifier (bits 25..8, PS masked for
/// destination-specific groups).
pub fn pgn_of(id: u32) -> u32 {
    let pgn = (id >> 8) & 0x3FFFF;
    let pf = (pgn >> 8) & 0xFF;
    if pf < 240 {
        pgn & 0x3FF00
    } else {
        pgn
    }
}

pub fn priority_of(id: u32) -> u8 {
    ((id >> 26) & 0x7) as u8
}

pub fn source_address_of(id: u32) -> u8 {
    id as u8
}

/// Pack EEC1: engine speed at 0.125 rpm/bit in bytes 3..=4, driver demand
/// torque at 1 %/bit with a -125 offset in byte 2.
pub fn encode_eec1(rpm: u32, torque_percent: i16) -> [u8; 8] {
    let mut data = [0xFFu8; 8];
    let speed = (rpm.saturating_mul(8)).min(u16::MAX as u32) as u16;
    data[2] = (torque_percent.clamp(-125, 125) + 125) as u8;
    data[3..5].copy_from_slice(&speed.to_le_bytes());
    data
}

/// Unpack EEC1 into `(rpm, torque_percent)`.
pub fn decode_eec1(data: &[u8; 8]) -> (u32, i16) {
    let speed = u16::from_le_bytes([data[3], data[4]]);
    let torque = data[2] as i16 - 125;
    (speed as u32 / 8, torque)
}

/// Pack ET1: coolant temperature at 1 degC/bit with a -40 offset in byte 0.
pub fn encode_et1(coolant_c: i16) -> [u8; 8] {
    let mut data = [0xFFu8; 8];
    data[0] = (coolant_c.clamp(-40, 210) + 40) as u8;
    data
}

/// Unpack ET1 into the coolant temperature.
pub fn decode_et1(data: &[u8; 8]) -> i16 {
    data[0] as i16 - 40
}

/// Pack a request for the given parameter group (PGN 59904 payload).
pub fn encode_request(requested_pgn: u32) -> [u8; 3] {
    [
        requested_pgn as u8,
        (requested_pgn >> 8) as u8,
        (requested_pgn >> 16) as u8,
    ]
}

/// Static driver parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct J1939Config {
    pub node_address: u8,
    #[serde(default)]
    pub decode: Vec<DecodeMapping, MAX_PROTOCOL_IDS>,
    #[serde(default)]
    pub encode: Vec<EncodeMapping, MAX_PROTOCOL_IDS>,
}

/// The J1939 protocol driver. Caller-allocated; no hidden state.
pub struct J1939Driver {
    config: J1939Config,
    /// Cached signal values for encoding, indexed by signal id.
    cache: [Option<(i32, u64)>; MAX_SIGNALS],
    /// Last cyclic transmission per encode mapping, in microseconds.
    last_tx_us: Vec<u64, MAX_PROTOCOL_IDS>,
    /// A peer requested this parameter group (via PGN 59904).
    pending_request: Option<u32>,
}

impl J1939Driver {
    pub fn new(config: J1939Config) -> Self {
        let mut last_tx_us = Vec::new();
        for _ in 0..config.encode.len() {
            // Note(unwrap): both vectors share MAX_PROTOCOL_IDS.
            last_tx_us.push(0).unwrap();
        }
        J1939Driver {
            config,
            cache: [None; MAX_SIGNALS],
            last_tx_us,
            pending_request: None,
        }
    }

    /// The parameter group a peer requested, if any. Reading clears it.
    pub fn take_request(&mut self) -> Option<u32> {
        self.pending_request.take()
    }

    fn frame_for(&self, mapping: &EncodeMapping) -> CanFrame {
        let mut data = [0xFFu8; 8];
        for field in mapping.fields.iter() {
            if let Some(Some((value, _))) =
                self.cache.get(field.signal as usize)
            {
                write_field(&mut data, field.start, field.width, *value);
            }
        }
        let id = encode_id(
            DEFAULT_PRIORITY,
            mapping.id,
            self.config.node_address,
        );
        let mut frame = CanFrame::new(id, &data);
        frame.len = 8;
        frame
    }
}

impl ProtocolDriver for J1939Driver {
    fn kind(&self) -> OutputType {
        OutputType::J1939
    }

    fn decode(
        &mut self,
        _now_us: u64,
        frame: &CanFrame,
        events: &mut Vec<Event, MAX_DECODE_EVENTS>,
    ) {
        let pgn = pgn_of(frame.id);

        if pgn == PGN_REQUEST {
            if frame.len >= 3 {
                let requested = frame.data[0] as u32
                    | (frame.data[1] as u32) << 8
                    | (frame.data[2] as u32) << 16;
                self.pending_request = Some(requested);
            }
            return;
        }

        let mapping = match self.config.decode.iter().find(|m| m.id == pgn) {
            Some(mapping) => mapping,
            None => return,
        };
        for field in mapping.fields.iter() {
            match read_field(&frame.data, field.start, field.width) {
                Some(value) => {
                    // Note(unwrap): at most MAX_FRAME_FIELDS per mapping.
                    events
                        .push(Event {
                            source: field.signal as u32,
                            value,
                            status: Status::Ok,
                            timestamp_us: frame.timestamp_us,
                        })
                        .unwrap();
                }
                None => {
                    log::debug!(
                        "j1939: field past frame end in pgn {}",
                        pgn
                    );
                }
            }
        }
    }

    fn encode(&mut self, target_id: u32, _now_us: u64) -> Option<CanFrame> {
        self.config
            .encode
            .iter()
            .find(|m| m.id == target_id)
            .map(|mapping| self.frame_for(mapping))
    }

    fn get_cyclic(
        &mut self,
        now_us: u64,
        frames: &mut Vec<CanFrame, MAX_CYCLIC_FRAMES>,
    ) {
        for (i, mapping) in self.config.encode.iter().enumerate() {
            if mapping.period_ms == 0 {
                continue;
            }
            let period_us = mapping.period_ms as u64 * 1000;
            if now_us.saturating_sub(self.last_tx_us[i]) >= period_us {
                self.last_tx_us[i] = now_us;
                if frames.push(self.frame_for(mapping)).is_err() {
                    log::warn!("j1939: cyclic frame buffer full");
                    return;
                }
            }
        }
    }

    fn update_signal(&mut self, signal: u8, value: i32, timestamp_us: u64) {
        if let Some(slot) = self.cache.get_mut(signal as usize) {
            *slot = Some((value, timestamp_us));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FieldMapping;

    #[test]
    fn id_codec_round_trips() {
        let id = encode_id(3, PGN_EEC1, 0x42);
        assert_eq!(priority_of(id), 3);
        assert_eq!(pgn_of(id), PGN_EEC1);
        assert_eq!(source_address_of(id), 0x42);
    }

    #[test]
    fn destination_specific_groups_mask_the_ps_byte() {
        // PF 0xEA (request) is destination specific: PS carries the
        // destination, the PGN does not.
        let id = encode_id(6, PGN_REQUEST | 0x25, 0x10);
        assert_eq!(pgn_of(id), PGN_REQUEST);
    }

    #[test]
    fn eec1_round_trip_is_within_quantisation() {
        for rpm in [0u32, 650, 1800, 4250] {
            for torque in [-125i16, -10, 0, 45, 125] {
                let (r, t) = decode_eec1(&encode_eec1(rpm, torque));
                assert_eq!(r, rpm);
                assert_eq!(t, torque);
            }
        }
    }

    #[test]
    fn et1_round_trip() {
        for temp in [-40i16, 0, 90, 210] {
            assert_eq!(decode_et1(&encode_et1(temp)), temp);
        }
    }

    fn driver() -> J1939Driver {
        let mut config = J1939Config {
            node_address: 0x25,
            ..J1939Config::default()
        };
        config
            .decode
            .push(DecodeMapping {
                id: 0xFF00,
                fields: Vec::from_slice(&[FieldMapping {
                    signal: 3,
                    start: 0,
                    width: 2,
                }])
                .unwrap(),
            })
            .unwrap();
        config
            .encode
            .push(EncodeMapping {
                id: 0xFF10,
                fields: Vec::from_slice(&[FieldMapping {
                    signal: 4,
                    start: 2,
                    width: 2,
                }])
                .unwrap(),
                period_ms: 100,
            })
            .unwrap();
        J1939Driver::new(config)
    }

    #[test]
    fn decode_produces_mapped_events() {
        let mut driver = driver();
        let mut frame = CanFrame::new(encode_id(6, 0xFF00, 0x80), &[]);
        frame.data[0] = 0xE8;
        frame.data[1] = 0x03;
        frame.len = 8;
        frame.timestamp_us = 555;

        let mut events = Vec::new();
        driver.decode(0, &frame, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, 3);
        assert_eq!(events[0].value, 1000);
        assert_eq!(events[0].timestamp_us, 555);
    }

    #[test]
    fn encode_packs_cached_values_and_pads_with_ff() {
        let mut driver = driver();
        driver.update_signal(4, 0x0102, 0);
        let frame = driver.encode(0xFF10, 0).unwrap();
        assert_eq!(pgn_of(frame.id), 0xFF10);
        assert_eq!(source_address_of(frame.id), 0x25);
        assert_eq!(frame.data, [0xFF, 0xFF, 0x02, 0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn cyclic_emission_is_rate_gated() {
        let mut driver = driver();
        driver.update_signal(4, 7, 0);

        let mut frames = Vec::new();
        driver.get_cyclic(100_000, &mut frames);
        assert_eq!(frames.len(), 1);

        frames.clear();
        driver.get_cyclic(150_000, &mut frames);
        assert!(frames.is_empty());

        driver.get_cyclic(200_000, &mut frames);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn request_pgn_is_latched_for_the_caller() {
        let mut driver = driver();
        let mut frame = CanFrame::new(encode_id(6, PGN_REQUEST, 0x10), &[]);
        frame.data[..3].copy_from_slice(&encode_request(PGN_DM2));
        frame.len = 3;

        let mut events = Vec::new();
        driver.decode(0, &frame, &mut events);
        assert!(events.is_empty());
        assert_eq!(driver.take_request(), Some(PGN_DM2));
        assert_eq!(driver.take_request(), None);
    }
}
