//! Output events, the per-tick output buffer, and engine statistics.

use enum_iterator::Sequence;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::MAX_OUTPUT_EVENTS;

/// Where the post-tick dispatcher routes an output event.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    Sequence,
)]
#[repr(u8)]
pub enum OutputType {
    Can = 0,
    J1939 = 1,
    CanOpen = 2,
    Gpio = 3,
    Pwm = 4,
    Dac = 5,
    Spi = 6,
    I2c = 7,
    Uart = 8,
    Modbus = 9,
}

/// One egress record produced by the engine for the dispatcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub kind: OutputType,
    /// Protocol id (PGN, COB-id) or sink register, depending on `kind`.
    pub target_id: u32,
    /// Hardware instance the sink call addresses.
    pub device_index: u8,
    pub value: i32,
    pub flags: u32,
    pub timestamp_us: u64,
}

/// Append-only per-tick event buffer.
///
/// The engine never overwrites buffered events; emissions past the capacity
/// are shed and counted.
pub(crate) struct OutputBuffer {
    events: heapless::Vec<OutputEvent, MAX_OUTPUT_EVENTS>,
    limit: usize,
    dropped_this_tick: u32,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        OutputBuffer {
            events: heapless::Vec::new(),
            limit: limit.clamp(1, MAX_OUTPUT_EVENTS),
            dropped_this_tick: 0,
        }
    }

    /// Append an event; returns false when the buffer is at capacity.
    pub fn push(&mut self, event: OutputEvent) -> bool {
        if self.events.len() >= self.limit || self.events.push(event).is_err()
        {
            self.dropped_this_tick = self.dropped_this_tick.saturating_add(1);
            return false;
        }
        true
    }

    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    pub fn emitted(&self) -> u32 {
        self.events.len() as u32
    }

    pub fn dropped(&self) -> u32 {
        self.dropped_this_tick
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped_this_tick = 0;
    }
}

/// Counters for a single engine tick.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TickStats {
    /// Raw samples drained from the hardware queue.
    pub samples_ingested: u32,
    /// Events applied to the signal table (samples plus caller events).
    pub events_ingested: u32,
    /// Output events appended to the buffer this tick.
    pub events_emitted: u32,
    /// Output events shed because the buffer was full.
    pub events_dropped: u32,
    /// Caller events referencing an out-of-range signal, dropped.
    pub events_rejected: u32,
    /// Merges whose tolerance check failed this tick.
    pub merges_inconsistent: u32,
    /// Fault monitors currently in the faulted state.
    pub faults_active: u32,
    /// Raw-wake callbacks fired during ingest.
    pub raw_wakes: u32,
}

/// Cumulative statistics across all ticks, plus the queue's own counters
/// sampled at the last tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub ticks: u64,
    pub events_ingested: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub events_rejected: u64,
    pub merges_inconsistent: u64,
    pub raw_wakes: u64,
    /// Samples shed by the hardware queue, as of the last tick.
    pub samples_dropped: u32,
    /// Step wall time as reported by the caller, O(1) per report.
    pub last_step_us: u32,
    pub min_step_us: u32,
    pub max_step_us: u32,
}

impl Default for EngineStats {
    fn default() -> Self {
        EngineStats {
            ticks: 0,
            events_ingested: 0,
            events_emitted: 0,
            events_dropped: 0,
            events_rejected: 0,
            merges_inconsistent: 0,
            raw_wakes: 0,
            samples_dropped: 0,
            last_step_us: 0,
            min_step_us: u32::MAX,
            max_step_us: 0,
        }
    }
}

impl EngineStats {
    pub(crate) fn absorb(&mut self, tick: &TickStats) {
        self.ticks += 1;
        self.events_ingested += tick.events_ingested as u64;
        self.events_emitted += tick.events_emitted as u64;
        self.events_dropped += tick.events_dropped as u64;
        self.events_rejected += tick.events_rejected as u64;
        self.merges_inconsistent += tick.merges_inconsistent as u64;
        self.raw_wakes += tick.raw_wakes as u64;
    }

    pub(crate) fn record_step_time(&mut self, duration_us: u32) {
        self.last_step_us = duration_us;
        self.min_step_us = self.min_step_us.min(duration_us);
        self.max_step_us = self.max_step_us.max(duration_us);
    }
}
