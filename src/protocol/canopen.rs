//! CANopen driver: NMT state, PDO exchange, SYNC-counted transmission,
//! heartbeat, emergency and LSS node-id queries.
//!
//! Only the OPERATIONAL state emits PDOs. Transmission types 1..=240 count
//! SYNC frames between emissions, 254 and 255 are event/period driven. The
//! driver additionally produces a bootup message after reset, a heartbeat on
//! its configured period and at most one pending emergency frame per
//! [CanOpenDriver::set_emergency] call.

use heapless::Vec;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use crate::engine::output::OutputType;
use crate::engine::signal::{Event, Status};
use crate::protocol::{
    read_field, write_field, CanFrame, DecodeMapping, ProtocolDriver,
    MAX_CYCLIC_FRAMES, MAX_DECODE_EVENTS, MAX_FRAME_FIELDS, MAX_PROTOCOL_IDS,
};
use crate::MAX_SIGNALS;

/// Function-code bases of the pre-defined connection set.
pub const COB_NMT: u32 = 0x000;
pub const COB_SYNC: u32 = 0x080;
pub const COB_EMCY_BASE: u32 = 0x080;
pub const COB_TPDO1_BASE: u32 = 0x180;
pub const COB_RPDO1_BASE: u32 = 0x200;
pub const COB_TPDO2_BASE: u32 = 0x280;
pub const COB_RPDO2_BASE: u32 = 0x300;
pub const COB_HEARTBEAT_BASE: u32 = 0x700;
/// LSS master-to-slave request channel.
pub const COB_LSS_REQUEST: u32 = 0x7E5;
/// LSS slave-to-master response channel.
pub const COB_LSS_RESPONSE: u32 = 0x7E4;

/// LSS inquire node-id command specifier.
const LSS_INQUIRE_NODE_ID: u8 = 0x5E;

/// NMT state, encoded as the heartbeat payload byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum NmtState {
    Bootup = 0x00,
    Stopped = 0x04,
    Operational = 0x05,
    PreOperational = 0x7F,
}

/// NMT module control command specifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum NmtCommand {
    Start = 0x01,
    Stop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

/// One transmit PDO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdoMapping {
    /// Full COB-id of the PDO.
    pub cob_id: u32,
    pub fields: Vec<crate::protocol::FieldMapping, MAX_FRAME_FIELDS>,
    /// 1..=240: emit after that many SYNCs; 254/255: event driven on
    /// `event_period_ms`.
    pub transmission: u8,
    #[serde(default)]
    pub event_period_ms: u32,
}

/// Static driver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanOpenConfig {
    /// Node id, 1..=127.
    pub node_id: u8,
    #[serde(default)]
    pub heartbeat_period_ms: u32,
    #[serde(default)]
    pub decode: Vec<DecodeMapping, MAX_PROTOCOL_IDS>,
    #[serde(default)]
    pub tpdos: Vec<PdoMapping, MAX_PROTOCOL_IDS>,
}

/// The CANopen protocol driver. Caller-allocated; no hidden state.
pub struct CanOpenDriver {
    config: CanOpenConfig,
    state: NmtState,
    cache: [Option<(i32, u64)>; MAX_SIGNALS],
    /// SYNCs seen since the last emission, per TPDO.
    sync_counts: Vec<u8, MAX_PROTOCOL_IDS>,
    /// Last event-driven emission, per TPDO.
    last_event_us: Vec<u64, MAX_PROTOCOL_IDS>,
    last_heartbeat_us: u64,
    pending_bootup: bool,
    pending_emergency: Option<(u16, u8)>,
    pending_lss_response: bool,
}

impl CanOpenDriver {
    pub fn new(config: CanOpenConfig) -> Self {
        let mut sync_counts = Vec::new();
        let mut last_event_us = Vec::new();
        for _ in 0..config.tpdos.len() {
            // Note(unwrap): per-TPDO vectors share MAX_PROTOCOL_IDS.
            sync_counts.push(0).unwrap();
            last_event_us.push(0).unwrap();
        }
        CanOpenDriver {
            config,
            state: NmtState::PreOperational,
            cache: [None; MAX_SIGNALS],
            sync_counts,
            last_event_us,
            last_heartbeat_us: 0,
            pending_bootup: true,
            pending_emergency: None,
            pending_lss_response: false,
        }
    }

    pub fn nmt_state(&self) -> NmtState {
        self.state
    }

    /// Queue an emergency frame; emitted once by the next cyclic pump.
    pub fn set_emergency(&mut self, error_code: u16, error_register: u8) {
        self.pending_emergency = Some((error_code, error_register));
    }

    fn pdo_frame(&self, mapping: &PdoMapping) -> CanFrame {
        let mut data = [0u8; 8];
        for field in mapping.fields.iter() {
            if let Some(Some((value, _))) =
                self.cache.get(field.signal as usize)
            {
                write_field(&mut data, field.start, field.width, *value);
            }
        }
        let mut frame = CanFrame::new(mapping.cob_id, &data);
        frame.len = 8;
        frame
    }

    fn apply_nmt(&mut self, command: NmtCommand) {
        self.state = match command {
            NmtCommand::Start => NmtState::Operational,
            NmtCommand::Stop => NmtState::Stopped,
            NmtCommand::EnterPreOperational => NmtState::PreOperational,
            NmtCommand::ResetNode | NmtCommand::ResetCommunication => {
                self.pending_bootup = true;
                for count in self.sync_counts.iter_mut() {
                    *count = 0;
                }
                NmtState::PreOperational
            }
        };
    }
}

impl ProtocolDriver for CanOpenDriver {
    fn kind(&self) -> OutputType {
        OutputType::CanOpen
    }

    fn decode(
        &mut self,
        _now_us: u64,
        frame: &CanFrame,
        events: &mut Vec<Event, MAX_DECODE_EVENTS>,
    ) {
        if frame.id == COB_NMT {
            if frame.len < 2 {
                return;
            }
            let addressed =
                frame.data[1] == 0 || frame.data[1] == self.config.node_id;
            if !addressed {
                return;
            }
            match NmtCommand::try_from(frame.data[0]) {
                Ok(command) => self.apply_nmt(command),
                Err(_) => {
                    log::debug!("canopen: unknown nmt command {:#x}", frame.data[0])
                }
            }
            return;
        }

        if frame.id == COB_SYNC {
            for count in self.sync_counts.iter_mut() {
                *count = count.saturating_add(1);
            }
            return;
        }

        if frame.id == COB_LSS_REQUEST {
            if frame.len >= 1 && frame.data[0] == LSS_INQUIRE_NODE_ID {
                self.pending_lss_response = true;
            }
            return;
        }

        let mapping =
            match self.config.decode.iter().find(|m| m.id == frame.id) {
                Some(mapping) => mapping,
                None => return,
            };
        for field in mapping.fields.iter() {
            if let Some(value) =
                read_field(&frame.data, field.start, field.width)
            {
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
        }
    }

    fn encode(&mut self, target_id: u32, _now_us: u64) -> Option<CanFrame> {
        if self.state != NmtState::Operational {
            return None;
        }
        self.config
            .tpdos
            .iter()
            .find(|m| m.cob_id == target_id)
            .map(|mapping| self.pdo_frame(mapping))
    }

    fn get_cyclic(
        &mut self,
        now_us: u64,
        frames: &mut Vec<CanFrame, MAX_CYCLIC_FRAMES>,
    ) {
        let heartbeat_id = COB_HEARTBEAT_BASE + self.config.node_id as u32;

        if self.pending_bootup {
            self.pending_bootup = false;
            let _ = frames
                .push(CanFrame::new(heartbeat_id, &[NmtState::Bootup as u8]));
        }

        if self.config.heartbeat_period_ms > 0 {
            let period_us = self.config.heartbeat_period_ms as u64 * 1000;
            if now_us.saturating_sub(self.last_heartbeat_us) >= period_us {
                self.last_heartbeat_us = now_us;
                let _ = frames
                    .push(CanFrame::new(heartbeat_id, &[self.state as u8]));
            }
        }

        if let Some((code, register)) = self.pending_emergency.take() {
            let emcy_id = COB_EMCY_BASE + self.config.node_id as u32;
            let payload = [
                code as u8,
                (code >> 8) as u8,
                register,
                0,
                0,
                0,
                0,
                0,
            ];
            let _ = frames.push(CanFrame::new(emcy_id, &payload));
        }

        if self.pending_lss_response {
            self.pending_lss_response = false;
            let _ = frames.push(CanFrame::new(
                COB_LSS_RESPONSE,
                &[LSS_INQUIRE_NODE_ID, self.config.node_id],
            ));
        }

        if self.state != NmtState::Operational {
            return;
        }
        for i in 0..self.config.tpdos.len() {
            let mapping = &self.config.tpdos[i];
            let due = match mapping.transmission {
                1..=240 => self.sync_counts[i] >= mapping.transmission,
                254 | 255 => {
                    mapping.event_period_ms > 0
                        && now_us.saturating_sub(self.last_event_us[i])
                            >= mapping.event_period_ms as u64 * 1000
                }
                _ => false,
            };
            if !due {
                continue;
            }
            let frame = self.pdo_frame(mapping);
            if frames.push(frame).is_err() {
                log::warn!("canopen: cyclic frame buffer full");
                return;
            }
            self.sync_counts[i] = 0;
            self.last_event_us[i] = now_us;
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

    fn driver() -> CanOpenDriver {
        let mut config = CanOpenConfig {
            node_id: 0x20,
            heartbeat_period_ms: 500,
            decode: Vec::new(),
            tpdos: Vec::new(),
        };
        config
            .decode
            .push(DecodeMapping {
                id: COB_RPDO1_BASE + 0x20,
                fields: Vec::from_slice(&[FieldMapping {
                    signal: 2,
                    start: 0,
                    width: 2,
                }])
                .unwrap(),
            })
            .unwrap();
        config
            .tpdos
            .push(PdoMapping {
                cob_id: COB_TPDO1_BASE + 0x20,
                fields: Vec::from_slice(&[FieldMapping {
                    signal: 5,
                    start: 0,
                    width: 2,
                }])
                .unwrap(),
                transmission: 255,
                event_period_ms: 100,
            })
            .unwrap();
        CanOpenDriver::new(config)
    }

    fn nmt(command: NmtCommand, node: u8) -> CanFrame {
        CanFrame::new(COB_NMT, &[command as u8, node])
    }

    #[test]
    fn bootup_is_emitted_once() {
        let mut driver = driver();
        let mut frames = Vec::new();
        driver.get_cyclic(0, &mut frames);
        assert_eq!(frames[0].id, COB_HEARTBEAT_BASE + 0x20);
        assert_eq!(frames[0].payload(), &[0x00]);

        frames.clear();
        driver.get_cyclic(1, &mut frames);
        assert!(frames.iter().all(|f| f.payload() != [0x00u8]));
    }

    #[test]
    fn pdos_require_operational_state() {
        let mut driver = driver();
        driver.update_signal(5, 0xBEEF_u16 as i32, 0);

        let mut frames = Vec::new();
        driver.get_cyclic(1_000_000, &mut frames);
        assert!(frames
            .iter()
            .all(|f| f.id != COB_TPDO1_BASE + 0x20));

        let mut events = Vec::new();
        driver.decode(0, &nmt(NmtCommand::Start, 0x20), &mut events);
        assert_eq!(driver.nmt_state(), NmtState::Operational);

        frames.clear();
        driver.get_cyclic(2_000_000, &mut frames);
        let pdo = frames
            .iter()
            .find(|f| f.id == COB_TPDO1_BASE + 0x20)
            .unwrap();
        assert_eq!(&pdo.data[..2], &[0xEF, 0xBE]);
    }

    #[test]
    fn sync_counted_transmission() {
        let mut driver = driver();
        driver.config.tpdos[0].transmission = 3;
        let mut events = Vec::new();
        driver.decode(0, &nmt(NmtCommand::Start, 0), &mut events);

        let sync = CanFrame::new(COB_SYNC, &[]);
        let mut frames = Vec::new();

        for _ in 0..2 {
            driver.decode(0, &sync, &mut events);
        }
        driver.get_cyclic(10, &mut frames);
        assert!(frames.iter().all(|f| f.id != COB_TPDO1_BASE + 0x20));

        driver.decode(0, &sync, &mut events);
        driver.get_cyclic(20, &mut frames);
        assert!(frames.iter().any(|f| f.id == COB_TPDO1_BASE + 0x20));
    }

    #[test]
    fn rpdo_decodes_into_events() {
        let mut driver = driver();
        let mut frame = CanFrame::new(COB_RPDO1_BASE + 0x20, &[0x10, 0x27]);
        frame.timestamp_us = 42;
        let mut events = Vec::new();
        driver.decode(0, &frame, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, 2);
        assert_eq!(events[0].value, 10_000);
        assert_eq!(events[0].timestamp_us, 42);
    }

    #[test]
    fn nmt_addressing_honours_node_id() {
        let mut driver = driver();
        let mut events = Vec::new();
        driver.decode(0, &nmt(NmtCommand::Start, 0x33), &mut events);
        assert_eq!(driver.nmt_state(), NmtState::PreOperational);
        driver.decode(0, &nmt(NmtCommand::Start, 0x20), &mut events);
        assert_eq!(driver.nmt_state(), NmtState::Operational);
        driver.decode(0, &nmt(NmtCommand::Stop, 0), &mut events);
        assert_eq!(driver.nmt_state(), NmtState::Stopped);
    }

    #[test]
    fn reset_queues_bootup_again() {
        let mut driver = driver();
        let mut frames = Vec::new();
        driver.get_cyclic(0, &mut frames);

        let mut events = Vec::new();
        driver.decode(0, &nmt(NmtCommand::ResetNode, 0x20), &mut events);
        frames.clear();
        driver.get_cyclic(1, &mut frames);
        assert!(frames
            .iter()
            .any(|f| f.id == COB_HEARTBEAT_BASE + 0x20
                && f.payload() == [0x00]));
    }

    #[test]
    fn emergency_is_sent_once_per_set() {
        let mut driver = driver();
        driver.set_emergency(0x3100, 0x04);

        let mut frames = Vec::new();
        driver.get_cyclic(0, &mut frames);
        let emcy = frames
            .iter()
            .find(|f| f.id == COB_EMCY_BASE + 0x20)
            .unwrap();
        assert_eq!(&emcy.data[..3], &[0x00, 0x31, 0x04]);

        frames.clear();
        driver.get_cyclic(1, &mut frames);
        assert!(frames.iter().all(|f| f.id != COB_EMCY_BASE + 0x20));
    }

    #[test]
    fn lss_inquiry_gets_the_node_id() {
        let mut driver = driver();
        let mut events = Vec::new();
        driver.decode(
            0,
            &CanFrame::new(COB_LSS_REQUEST, &[LSS_INQUIRE_NODE_ID]),
            &mut events,
        );
        let mut frames = Vec::new();
        driver.get_cyclic(0, &mut frames);
        let response = frames
            .iter()
            .find(|f| f.id == COB_LSS_RESPONSE)
            .unwrap();
        assert_eq!(response.payload(), &[LSS_INQUIRE_NODE_ID, 0x20]);
    }
}
