//! Diagnostic trouble code management and J1939 DM1/DM2 construction.

use heapless::Vec;

use crate::MAX_DTCS;

/// Lamp severity attached to a trouble code, ordered by urgency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Lamp {
    Off = 0,
    Amber = 1,
    AmberFlash = 2,
    Red = 3,
}

/// Lifecycle state of a trouble code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtcState {
    Inactive,
    Pending,
    Confirmed,
    Stored,
}

/// One trouble code, keyed by `(spn, fmi)`.
#[derive(Debug, Copy, Clone)]
pub struct Dtc {
    pub spn: u32,
    pub fmi: u8,
    pub occurrence_count: u8,
    pub state: DtcState,
    pub lamp: Lamp,
    pub first_detected_us: u64,
    pub last_active_us: u64,
}

/// Static manager parameters.
#[derive(Debug, Copy, Clone)]
pub struct DtcConfig {
    /// DM1 broadcast period.
    pub dm1_period_ms: u32,
    /// Clearing removes codes outright instead of keeping them for DM2.
    pub remove_on_clear: bool,
}

impl Default for DtcConfig {
    fn default() -> Self {
        DtcConfig {
            dm1_period_ms: 1000,
            remove_on_clear: false,
        }
    }
}

/// Bounded trouble code table with DM1/DM2 framing.
pub struct DtcManager {
    config: DtcConfig,
    table: Vec<Dtc, MAX_DTCS>,
    last_dm1_us: u64,
    /// Codes lost because the table was full.
    dropped: u32,
}

impl DtcManager {
    pub fn new(config: DtcConfig) -> Self {
        DtcManager {
            config,
            table: Vec::new(),
            last_dm1_us: 0,
            dropped: 0,
        }
    }

    /// Mark a code active, inserting or re-activating as needed.
    ///
    /// # Returns
    /// False when the code was new and the table was full.
    pub fn set_active(
        &mut self,
        spn: u32,
        fmi: u8,
        lamp: Lamp,
        now_us: u64,
    ) -> bool {
        if let Some(dtc) = self
            .table
            .iter_mut()
            .find(|d| d.spn == spn && d.fmi == fmi)
        {
            dtc.occurrence_count = dtc.occurrence_count.saturating_add(1);
            dtc.last_active_us = now_us;
            dtc.state = DtcState::Confirmed;
            dtc.lamp = lamp;
            return true;
        }

        let dtc = Dtc {
            spn,
            fmi,
            occurrence_count: 1,
            state: DtcState::Confirmed,
            lamp,
            first_detected_us: now_us,
            last_active_us: now_us,
        };
        if self.table.push(dtc).is_err() {
            self.dropped = self.dropped.saturating_add(1);
            log::warn!("dtc: table full, dropping spn {} fmi {}", spn, fmi);
            return false;
        }
        true
    }

    /// Clear one code: stored for DM2, or removed when so configured.
    pub fn clear(&mut self, spn: u32, fmi: u8) {
        if self.config.remove_on_clear {
            self.remove_matching(|d| d.spn == spn && d.fmi == fmi);
            return;
        }
        if let Some(dtc) = self
            .table
            .iter_mut()
            .find(|d| d.spn == spn && d.fmi == fmi)
        {
            dtc.state = DtcState::Stored;
            dtc.lamp = Lamp::Off;
        }
    }

    /// Clear every active code.
    pub fn clear_all(&mut self) {
        if self.config.remove_on_clear {
            self.remove_matching(|d| d.state == DtcState::Confirmed);
            return;
        }
        for dtc in self.table.iter_mut() {
            if dtc.state == DtcState::Confirmed {
                dtc.state = DtcState::Stored;
                dtc.lamp = Lamp::Off;
            }
        }
    }

    /// Drop previously-active codes (the DM2 set, after DM3).
    pub fn purge_stored(&mut self) {
        self.remove_matching(|d| d.state == DtcState::Stored);
    }

    /// Remove matching entries, preserving report order.
    fn remove_matching(&mut self, matches: impl Fn(&Dtc) -> bool) {
        let mut i = 0;
        while i < self.table.len() {
            if matches(&self.table[i]) {
                self.table.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// The worst lamp across active codes.
    pub fn mil_status(&self) -> Lamp {
        self.table
            .iter()
            .filter(|d| d.state == DtcState::Confirmed)
            .map(|d| d.lamp)
            .max()
            .unwrap_or(Lamp::Off)
    }

    pub fn active_count(&self) -> usize {
        self.table
            .iter()
            .filter(|d| d.state == DtcState::Confirmed)
            .count()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Whether a DM1 broadcast is due; asking arms the next period.
    pub fn dm1_due(&mut self, now_us: u64) -> bool {
        let period_us = self.config.dm1_period_ms as u64 * 1000;
        if now_us.saturating_sub(self.last_dm1_us) >= period_us {
            self.last_dm1_us = now_us;
            true
        } else {
            false
        }
    }

    /// Build the DM1 payload: lamp summary plus the first active code.
    pub fn dm1_frame(&self) -> [u8; 8] {
        let first = self
            .table
            .iter()
            .find(|d| d.state == DtcState::Confirmed);
        frame_for(self.mil_status(), first)
    }

    /// Build the DM2 payload from the stored set.
    pub fn dm2_frame(&self) -> [u8; 8] {
        let first = self.table.iter().find(|d| d.state == DtcState::Stored);
        let lamp = self
            .table
            .iter()
            .filter(|d| d.state == DtcState::Stored)
            .map(|d| d.lamp)
            .max()
            .unwrap_or(Lamp::Off);
        frame_for(lamp, first)
    }
}

/// Byte 0 packs four 2-bit lamp-status fields (MIL, red stop, amber
/// warning, protect), byte 1 the matching flash patterns, bytes 2..=5 the
/// first code as 19-bit SPN, 5-bit FMI and 7-bit occurrence count. The
/// remainder pads with 0xFF.
fn frame_for(lamp: Lamp, first: Option<&Dtc>) -> [u8; 8] {
    let mut data = [0xFFu8; 8];

    let mil: u8 = u8::from(lamp != Lamp::Off) * 0b01;
    let red: u8 = u8::from(lamp == Lamp::Red) * 0b01;
    let amber: u8 =
        u8::from(lamp == Lamp::Amber || lamp == Lamp::AmberFlash) * 0b01;
    data[0] = (mil << 6) | (red << 4) | (amber << 2);

    // Flash fields: steady (0b11) everywhere except a flashing amber lamp.
    let amber_flash: u8 = if lamp == Lamp::AmberFlash { 0b00 } else { 0b11 };
    data[1] = 0b1111_0011 | (amber_flash << 2);

    match first {
        Some(dtc) => {
            data[2] = dtc.spn as u8;
            data[3] = (dtc.spn >> 8) as u8;
            data[4] = (((dtc.spn >> 16) as u8 & 0x07) << 5) | (dtc.fmi & 0x1F);
            data[5] = dtc.occurrence_count & 0x7F;
        }
        None => {
            data[2] = 0;
            data[3] = 0;
            data[4] = 0;
            data[5] = 0;
        }
    }
    data
}

/// Unpack the DTC field of a DM1/DM2 payload: `(spn, fmi, occurrences)`.
pub fn parse_dtc(data: &[u8; 8]) -> (u32, u8, u8) {
    let spn = data[2] as u32
        | (data[3] as u32) << 8
        | (((data[4] >> 5) & 0x07) as u32) << 16;
    let fmi = data[4] & 0x1F;
    let occurrence = data[5] & 0x7F;
    (spn, fmi, occurrence)
}
