//! Canonical signal storage and the event vocabulary.
//!
//! Every logical quantity in a pipeline lives in exactly one slot of the
//! [SignalBank], addressed by the index the configuration generator assigned
//! at build time. There is no hashing and no runtime registration.

use enum_iterator::Sequence;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::MAX_SIGNALS;

/// Signal health, ordered from healthy to unusable.
///
/// The ordering is a join lattice: combining two statuses always yields the
/// worse of the two, and the numeric discriminants are transported verbatim
/// in protocol frames that carry status.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    Sequence,
)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Degraded = 1,
    OutOfRange = 2,
    Error = 3,
    Timeout = 4,
    Inconsistent = 5,
}

impl Status {
    /// Combine two statuses, keeping the worse one.
    #[inline]
    pub fn join(self, other: Status) -> Status {
        self.max(other)
    }

    /// True for statuses a voter may still consume (below [Status::Error]).
    #[inline]
    pub fn usable(self) -> bool {
        self < Status::Error
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Ok
    }
}

/// One slot of the signal table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Signal {
    pub value: i32,
    pub status: Status,
    pub timestamp_us: u64,
    /// Maximum event age before the staleness phase raises [Status::Timeout].
    /// Zero disables the check.
    pub stale_us: u64,
    /// Set by every producer in the current tick, cleared at end of tick.
    pub updated: bool,
}

impl Signal {
    const fn new(stale_us: u64) -> Self {
        Signal {
            value: 0,
            status: Status::Ok,
            timestamp_us: 0,
            stale_us,
            updated: false,
        }
    }
}

/// An immutable input record targeting one signal slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Event {
    pub source: u32,
    pub value: i32,
    pub status: Status,
    pub timestamp_us: u64,
}

/// The dense signal table.
///
/// Writes distinguish the ingest baseline from in-tick production: the first
/// event reaching a slot in a tick replaces its status (this is how a signal
/// recovers), every later write in the same tick can only raise it.
pub struct SignalBank {
    slots: heapless::Vec<Signal, MAX_SIGNALS>,
}

impl SignalBank {
    /// Build a bank with one slot per staleness threshold. Slot count is
    /// frozen for the process lifetime.
    pub(crate) fn new(stale_us: impl Iterator<Item = u64>) -> Self {
        let mut slots = heapless::Vec::new();
        for stale in stale_us {
            // Note(unwrap): the configuration was validated against
            // MAX_SIGNALS before the bank is built.
            slots.push(Signal::new(stale)).unwrap();
        }
        SignalBank { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: u8) -> Option<&Signal> {
        self.slots.get(index as usize)
    }

    #[inline]
    pub(crate) fn slot(&self, index: u8) -> &Signal {
        &self.slots[index as usize]
    }

    /// Ingest-phase write: the first event in a tick rebases the status,
    /// later events in the same batch join upward. The later value always
    /// wins.
    pub(crate) fn ingest(
        &mut self,
        index: u8,
        value: i32,
        status: Status,
        timestamp_us: u64,
    ) {
        let slot = &mut self.slots[index as usize];
        slot.status = if slot.updated {
            slot.status.join(status)
        } else {
            status
        };
        slot.value = value;
        slot.timestamp_us = timestamp_us;
        slot.updated = true;
    }

    /// Producer write (merge, transform, fault, verified, PID). The first
    /// write to a slot in a tick rebases the status — this is how a produced
    /// signal recovers once its inputs are healthy again — while later
    /// writes in the same tick only raise it. The updated flag and timestamp
    /// move only when the write changes the slot, so re-producing an
    /// unchanged value neither re-triggers on-change outputs nor disturbs an
    /// otherwise idle tick.
    pub(crate) fn produce(
        &mut self,
        index: u8,
        value: i32,
        status: Status,
        timestamp_us: u64,
    ) {
        let slot = &mut self.slots[index as usize];
        let status = if slot.updated {
            slot.status.join(status)
        } else {
            status
        };
        if value != slot.value || status != slot.status {
            slot.value = value;
            slot.status = status;
            slot.timestamp_us = timestamp_us;
            slot.updated = true;
        }
    }

    /// Raise a slot's status without touching value, timestamp or the
    /// updated flag.
    pub(crate) fn raise(&mut self, index: u8, status: Status) {
        let slot = &mut self.slots[index as usize];
        slot.status = slot.status.join(status);
    }

    pub(crate) fn clear_updated(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.updated = false;
        }
    }
}
