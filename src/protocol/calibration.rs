//! UDS-backed calibration registry.
//!
//! Exposes the engine's live remap and scale parameters as data identifiers
//! and gates every write behind a calibration mode toggled by routine
//! control. Outside calibration mode writes are refused with NRC 0x33, on
//! top of the session and security gating the UDS server already applies.
//!
//! Wire layout (all fields big-endian):
//! - Scale DID `0xC100 + i`: factor i32, offset i32, clamp_min i32,
//!   clamp_max i32, presence flags u8 (bit0 min, bit1 max).
//! - Remap DID `0xC200 + i`: invert u8, deadzone u32.
//! - Routine `0xFF00`: start enters calibration mode, stop leaves it,
//!   request-results reports it.

use heapless::Vec;

use crate::engine::Engine;
use crate::protocol::uds::{Nrc, RoutineOp, UdsBackend, MAX_SEED, UDS_BUFFER};

/// First scale-context data identifier.
pub const DID_SCALE_BASE: u16 = 0xC100;
/// First remap-context data identifier.
pub const DID_REMAP_BASE: u16 = 0xC200;
/// Calibration mode routine identifier.
pub const RID_CALIBRATION_MODE: u16 = 0xFF00;

const SCALE_RECORD_LEN: usize = 17;
const REMAP_RECORD_LEN: usize = 5;

/// Session-independent registry state, owned by the application.
#[derive(Debug, Default)]
pub struct CalibrationState {
    active: bool,
    seed_counter: u32,
    last_seed: [u8; 4],
}

impl CalibrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calibration_active(&self) -> bool {
        self.active
    }
}

/// Borrows the engine for the duration of one UDS request.
pub struct EngineCalibration<'a, 'q> {
    state: &'a mut CalibrationState,
    engine: &'a mut Engine<'q>,
}

impl<'a, 'q> EngineCalibration<'a, 'q> {
    pub fn new(
        state: &'a mut CalibrationState,
        engine: &'a mut Engine<'q>,
    ) -> Self {
        EngineCalibration { state, engine }
    }
}

fn push_i32(out: &mut Vec<u8, UDS_BUFFER>, value: i32) -> Result<(), Nrc> {
    out.extend_from_slice(&value.to_be_bytes())
        .map_err(|_| Nrc::RequestOutOfRange)
}

fn read_i32(data: &[u8]) -> i32 {
    i32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

impl UdsBackend for EngineCalibration<'_, '_> {
    fn read_did(
        &mut self,
        did: u16,
        out: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        if (DID_SCALE_BASE..DID_SCALE_BASE + 0x100).contains(&did) {
            let index = (did - DID_SCALE_BASE) as usize;
            let scale = self
                .engine
                .scale_config(index)
                .ok_or(Nrc::RequestOutOfRange)?;
            push_i32(out, scale.factor)?;
            push_i32(out, scale.offset)?;
            push_i32(out, scale.clamp_min.unwrap_or(0))?;
            push_i32(out, scale.clamp_max.unwrap_or(0))?;
            let flags = u8::from(scale.clamp_min.is_some())
                | (u8::from(scale.clamp_max.is_some()) << 1);
            out.push(flags).map_err(|_| Nrc::RequestOutOfRange)?;
            return Ok(());
        }

        if (DID_REMAP_BASE..DID_REMAP_BASE + 0x100).contains(&did) {
            let index = (did - DID_REMAP_BASE) as usize;
            let remap = self
                .engine
                .remap_config(index)
                .ok_or(Nrc::RequestOutOfRange)?;
            out.push(remap.invert as u8)
                .map_err(|_| Nrc::RequestOutOfRange)?;
            out.extend_from_slice(&remap.deadzone.to_be_bytes())
                .map_err(|_| Nrc::RequestOutOfRange)?;
            return Ok(());
        }

        Err(Nrc::RequestOutOfRange)
    }

    fn write_did(&mut self, did: u16, data: &[u8]) -> Result<(), Nrc> {
        if !self.state.active {
            return Err(Nrc::SecurityAccessDenied);
        }

        if (DID_SCALE_BASE..DID_SCALE_BASE + 0x100).contains(&did) {
            if data.len() != SCALE_RECORD_LEN {
                return Err(Nrc::IncorrectMessageLength);
            }
            let index = (did - DID_SCALE_BASE) as usize;
            let flags = data[16];
            let clamp_min =
                (flags & 0x01 != 0).then(|| read_i32(&data[8..12]));
            let clamp_max =
                (flags & 0x02 != 0).then(|| read_i32(&data[12..16]));
            if let (Some(min), Some(max)) = (clamp_min, clamp_max) {
                if min > max {
                    return Err(Nrc::RequestOutOfRange);
                }
            }
            if !self.engine.set_scale_params(
                index,
                read_i32(&data[0..4]),
                read_i32(&data[4..8]),
                clamp_min,
                clamp_max,
            ) {
                return Err(Nrc::RequestOutOfRange);
            }
            return Ok(());
        }

        if (DID_REMAP_BASE..DID_REMAP_BASE + 0x100).contains(&did) {
            if data.len() != REMAP_RECORD_LEN {
                return Err(Nrc::IncorrectMessageLength);
            }
            let index = (did - DID_REMAP_BASE) as usize;
            let deadzone = u32::from_be_bytes([
                data[1], data[2], data[3], data[4],
            ]);
            if !self.engine.set_remap_params(index, data[0] != 0, deadzone) {
                return Err(Nrc::RequestOutOfRange);
            }
            return Ok(());
        }

        Err(Nrc::RequestOutOfRange)
    }

    fn routine(
        &mut self,
        op: RoutineOp,
        rid: u16,
        _payload: &[u8],
        out: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        if rid != RID_CALIBRATION_MODE {
            return Err(Nrc::RequestOutOfRange);
        }
        match op {
            RoutineOp::Start => self.state.active = true,
            RoutineOp::Stop => self.state.active = false,
            RoutineOp::RequestResults => out
                .push(self.state.active as u8)
                .map_err(|_| Nrc::RequestOutOfRange)?,
        }
        Ok(())
    }

    fn security_seed(
        &mut self,
        _level: u8,
        seed: &mut Vec<u8, MAX_SEED>,
    ) -> Result<(), Nrc> {
        // Knuth multiplicative scramble of a monotonic counter. Real
        // deployments replace this backend with their own key scheme.
        self.state.seed_counter = self.state.seed_counter.wrapping_add(1);
        let raw = self
            .state
            .seed_counter
            .wrapping_mul(2_654_435_761)
            .to_be_bytes();
        self.state.last_seed = raw;
        seed.extend_from_slice(&raw)
            .map_err(|_| Nrc::RequestOutOfRange)
    }

    fn security_key_valid(&mut self, _level: u8, key: &[u8]) -> bool {
        key.len() == 4
            && key
                .iter()
                .zip(self.state.last_seed.iter())
                .all(|(k, s)| *k == *s ^ 0xA5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{
        EngineConfig, RemapConfig, ScaleConfig, SignalConfig,
    };
    use crate::protocol::uds::{UdsConfig, UdsServer};

    fn engine() -> Engine<'static> {
        let mut config = EngineConfig::default();
        for _ in 0..4 {
            config.signals.push(SignalConfig::default()).unwrap();
        }
        config
            .scales
            .push(ScaleConfig {
                input: 0,
                output: 1,
                factor: 1000,
                offset: 0,
                clamp_min: None,
                clamp_max: Some(10_000),
                enabled: true,
            })
            .unwrap();
        config
            .remaps
            .push(RemapConfig {
                input: 0,
                output: 2,
                invert: false,
                deadzone: 0,
                enabled: true,
            })
            .unwrap();
        Engine::new(config, None).unwrap()
    }

    fn unlock(
        server: &mut UdsServer,
        state: &mut CalibrationState,
        engine: &mut Engine,
        now_us: u64,
    ) {
        let mut response = Vec::new();
        let mut backend = EngineCalibration::new(state, engine);
        server.process_request(&[0x10, 0x03], now_us, &mut backend, &mut response);
        server.process_request(&[0x27, 0x01], now_us, &mut backend, &mut response);
        let seed: [u8; 4] = response[2..6].try_into().unwrap();
        let mut key = heapless::Vec::<u8, 8>::new();
        key.extend_from_slice(&[0x27, 0x02]).unwrap();
        for byte in seed {
            key.push(byte ^ 0xA5).unwrap();
        }
        server.process_request(&key, now_us, &mut backend, &mut response);
        assert_eq!(&response[..], &[0x67, 0x02]);
    }

    #[test]
    fn scale_did_reads_live_parameters() {
        let mut engine = engine();
        let mut state = CalibrationState::new();
        let mut backend = EngineCalibration::new(&mut state, &mut engine);

        let mut out = Vec::new();
        backend.read_did(DID_SCALE_BASE, &mut out).unwrap();
        assert_eq!(read_i32(&out[0..4]), 1000);
        assert_eq!(read_i32(&out[4..8]), 0);
        assert_eq!(read_i32(&out[12..16]), 10_000);
        assert_eq!(out[16], 0b10);
    }

    #[test]
    fn writes_outside_calibration_mode_are_refused() {
        let mut engine = engine();
        let mut state = CalibrationState::new();
        let mut backend = EngineCalibration::new(&mut state, &mut engine);

        let record = [0u8; SCALE_RECORD_LEN];
        assert_eq!(
            backend.write_did(DID_SCALE_BASE, &record),
            Err(Nrc::SecurityAccessDenied)
        );
    }

    #[test]
    fn full_calibration_round_trip_through_the_server() {
        let mut engine = engine();
        let mut state = CalibrationState::new();
        let mut server = UdsServer::new(UdsConfig::default());
        unlock(&mut server, &mut state, &mut engine, 0);

        let mut response = Vec::new();

        // Writes are still refused until calibration mode starts.
        let mut record = heapless::Vec::<u8, 32>::new();
        record.extend_from_slice(&[0x2E, 0xC1, 0x00]).unwrap();
        record.extend_from_slice(&2000i32.to_be_bytes()).unwrap();
        record.extend_from_slice(&100i32.to_be_bytes()).unwrap();
        record.extend_from_slice(&0i32.to_be_bytes()).unwrap();
        record.extend_from_slice(&5000i32.to_be_bytes()).unwrap();
        record.push(0b10).unwrap();

        let mut backend = EngineCalibration::new(&mut state, &mut engine);
        server.process_request(&record, 10, &mut backend, &mut response);
        assert_eq!(&response[..], &[0x7F, 0x2E, 0x33]);

        // Enter calibration mode via routine control.
        server.process_request(
            &[0x31, 0x01, 0xFF, 0x00],
            20,
            &mut backend,
            &mut response,
        );
        assert_eq!(&response[..], &[0x71, 0x01, 0xFF, 0x00]);

        server.process_request(&record, 30, &mut backend, &mut response);
        assert_eq!(&response[..], &[0x6E, 0xC1, 0x00]);

        drop(backend);
        let scale = engine.scale_config(0).unwrap();
        assert_eq!(scale.factor, 2000);
        assert_eq!(scale.offset, 100);
        assert_eq!(scale.clamp_min, None);
        assert_eq!(scale.clamp_max, Some(5000));
    }

    #[test]
    fn remap_did_round_trip() {
        let mut engine = engine();
        let mut state = CalibrationState::new();
        state.active = true;
        let mut backend = EngineCalibration::new(&mut state, &mut engine);

        let mut record = heapless::Vec::<u8, 8>::new();
        record.push(1).unwrap();
        record.extend_from_slice(&250u32.to_be_bytes()).unwrap();
        backend.write_did(DID_REMAP_BASE, &record).unwrap();

        let mut out = Vec::new();
        backend.read_did(DID_REMAP_BASE, &mut out).unwrap();
        assert_eq!(out[0], 1);
        assert_eq!(&out[1..5], &250u32.to_be_bytes());
    }

    #[test]
    fn unknown_dids_are_out_of_range() {
        let mut engine = engine();
        let mut state = CalibrationState::new();
        let mut backend = EngineCalibration::new(&mut state, &mut engine);
        let mut out = Vec::new();
        assert_eq!(
            backend.read_did(0x1234, &mut out),
            Err(Nrc::RequestOutOfRange)
        );
        // Context indices past the configured arrays are rejected too.
        assert_eq!(
            backend.read_did(DID_SCALE_BASE + 7, &mut out),
            Err(Nrc::RequestOutOfRange)
        );
    }
}
