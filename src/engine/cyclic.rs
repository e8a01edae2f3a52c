//! Drift-free cyclic output scheduling.
//!
//! Deadlines are absolute microseconds on the shared monotonic clock and
//! advance by exactly one period per emission, never re-based on `now`, so
//! the long-term average rate equals the configured rate regardless of tick
//! jitter. A context that missed several deadlines catches up one emission
//! per tick to keep per-tick work bounded.

use crate::engine::config::CyclicConfig;

pub(crate) struct CyclicOutput {
    pub cfg: CyclicConfig,
    next_deadline_us: u64,
}

impl CyclicOutput {
    pub fn new(cfg: CyclicConfig) -> Self {
        let period = cfg.period_us;
        CyclicOutput {
            cfg,
            next_deadline_us: period,
        }
    }

    pub fn due(&self, now_us: u64) -> bool {
        self.cfg.enabled && now_us >= self.next_deadline_us
    }

    /// Advance the deadline after one emission.
    pub fn advance(&mut self) {
        self.next_deadline_us += self.cfg.period_us;
    }

    #[cfg(test)]
    pub fn next_deadline_us(&self) -> u64 {
        self.next_deadline_us
    }
}

/// Evaluation order: higher priority first, declaration order within equal
/// priorities.
pub(crate) fn emission_order<const N: usize>(
    cyclics: &[CyclicOutput],
) -> heapless::Vec<u8, N> {
    let mut order: heapless::Vec<u8, N> = heapless::Vec::new();
    for i in 0..cyclics.len() {
        // Note(unwrap): both vectors share the same capacity bound.
        order.push(i as u8).unwrap();
    }
    order.sort_unstable_by_key(|&i| {
        (core::cmp::Reverse(cyclics[i as usize].cfg.priority), i)
    });
    order
}
