//! Fault monitors with two-phase wake and reversible limp-home.
//!
//! # Design
//! Detection runs in two places. The raw wake fires synchronously during
//! ingest, before any filtering or voting, so a hard out-of-range sample can
//! reach a user callback with minimum latency. The processed check runs as
//! its own engine phase against the filtered signal table and drives the
//! fault signal and the limp-home override.
//!
//! Limp-home replaces the parameters of one scale context while a fault is
//! active. The originals are saved exactly once; a second fault on the same
//! monitor only refreshes the override, and the first restore after the
//! fault has stayed clear for the configured delay copies the originals back
//! verbatim.

use crate::engine::config::{FaultConfig, ScaleConfig};
use crate::engine::signal::{Signal, Status};

/// Scale parameters preserved across a limp-home override.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct SavedScale {
    factor: i32,
    clamp_min: Option<i32>,
    clamp_max: Option<i32>,
}

pub(crate) struct FaultMonitor {
    pub cfg: FaultConfig,
    pub active: bool,
    saved: Option<SavedScale>,
    /// When the fault last transitioned to clear, while a restore or fault
    /// signal release is still pending.
    clear_since_us: Option<u64>,
}

/// What the engine must do after evaluating one monitor.
pub(crate) enum FaultTransition {
    None,
    /// The monitor entered the faulted state this tick.
    Raised,
    /// The monitor left the faulted state this tick. With a zero restore
    /// delay the saved parameters were already handed back.
    Cleared { restored: bool },
    /// The restore delay elapsed on a later tick: saved parameters were
    /// handed back and the fault signal must be zeroed.
    Restored,
}

impl FaultMonitor {
    pub fn new(cfg: FaultConfig) -> Self {
        FaultMonitor {
            cfg,
            active: false,
            saved: None,
            clear_since_us: None,
        }
    }

    /// True while the limp-home override holds the target scale.
    pub fn limp_active(&self) -> bool {
        self.saved.is_some()
    }

    /// Raw ingest-phase check: does this value violate the monitor's range?
    pub fn raw_violation(&self, signal: u8, value: i32) -> bool {
        self.cfg.enabled
            && self.cfg.check_range
            && self.cfg.input == signal
            && (value < self.cfg.min || value > self.cfg.max)
    }

    /// Processed check against the filtered signal.
    fn faulted(&self, signal: &Signal, now_us: u64) -> bool {
        if self.cfg.check_range
            && (signal.value < self.cfg.min || signal.value > self.cfg.max)
        {
            return true;
        }
        if self.cfg.check_staleness
            && now_us.saturating_sub(signal.timestamp_us)
                > self.cfg.stale_timeout_us
        {
            return true;
        }
        self.cfg.check_status && signal.status >= Status::Error
    }

    /// Advance the monitor by one tick.
    ///
    /// # Args
    /// * `signal` - The watched signal, copied out of the table.
    /// * `scale` - The limp-home target scale context, when configured.
    /// * `now_us` - The current tick time.
    pub fn update(
        &mut self,
        signal: &Signal,
        scale: Option<&mut ScaleConfig>,
        now_us: u64,
    ) -> FaultTransition {
        let faulted = self.faulted(signal, now_us);

        if faulted && !self.active {
            self.active = true;
            self.clear_since_us = None;
            if let (Some(limp), Some(scale)) = (self.cfg.limp_home, scale) {
                if self.saved.is_none() {
                    self.saved = Some(SavedScale {
                        factor: scale.factor,
                        clamp_min: scale.clamp_min,
                        clamp_max: scale.clamp_max,
                    });
                }
                scale.factor = limp.factor;
                scale.clamp_min = limp.clamp_min;
                scale.clamp_max = limp.clamp_max;
            }
            return FaultTransition::Raised;
        }

        let just_cleared = !faulted && self.active;
        if just_cleared {
            self.active = false;
            self.clear_since_us = Some(now_us);
        }

        if !self.active {
            if let Some(since) = self.clear_since_us {
                let delay_us = self
                    .cfg
                    .limp_home
                    .map(|limp| limp.restore_delay_ms as u64 * 1000)
                    .unwrap_or(0);
                if now_us.saturating_sub(since) >= delay_us {
                    self.clear_since_us = None;
                    if let (Some(saved), Some(scale)) =
                        (self.saved.take(), scale)
                    {
                        scale.factor = saved.factor;
                        scale.clamp_min = saved.clamp_min;
                        scale.clamp_max = saved.clamp_max;
                    }
                    return if just_cleared {
                        FaultTransition::Cleared { restored: true }
                    } else {
                        FaultTransition::Restored
                    };
                }
            }
        }

        if just_cleared {
            FaultTransition::Cleared { restored: false }
        } else {
            FaultTransition::None
        }
    }
}
