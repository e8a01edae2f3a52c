//! Verified outputs: command mirroring with feedback cross-check.

use crate::engine::config::VerifiedOutputConfig;
use crate::engine::signal::{SignalBank, Status};

pub(crate) struct VerifiedOutput {
    pub cfg: VerifiedOutputConfig,
    last_command: i32,
    command_timestamp_us: u64,
    /// A command was latched and the initial verify window has not closed.
    waiting: bool,
    /// A command has been seen at all; nothing is produced before that.
    armed: bool,
    failed: bool,
}

pub(crate) struct VerifyResult {
    pub value: i32,
    pub status: Status,
}

impl VerifiedOutput {
    pub fn new(cfg: VerifiedOutputConfig) -> Self {
        VerifiedOutput {
            cfg,
            last_command: 0,
            command_timestamp_us: 0,
            waiting: false,
            armed: false,
            failed: false,
        }
    }

    /// Run one tick of the verification machine.
    ///
    /// # Returns
    /// A write for the output signal when the mirrored value or the verify
    /// verdict changed this tick.
    pub fn update(
        &mut self,
        bank: &SignalBank,
        now_us: u64,
    ) -> Option<VerifyResult> {
        let command = bank.slot(self.cfg.command);

        if command.updated {
            self.last_command = command.value;
            self.command_timestamp_us = now_us;
            self.waiting = true;
            self.armed = true;
            self.failed = false;
            return Some(VerifyResult {
                value: self.last_command,
                status: Status::Ok,
            });
        }

        if !self.armed {
            return None;
        }

        let window_closed = now_us.saturating_sub(self.command_timestamp_us)
            >= self.cfg.verify_timeout_us;
        if !window_closed {
            return None;
        }

        let check_due = self.waiting || self.cfg.continuous;
        if !check_due {
            return None;
        }

        let feedback = bank.slot(self.cfg.verification);
        let pass = (feedback.value as i64 - self.last_command as i64)
            .unsigned_abs()
            <= self.cfg.tolerance as u64;

        let first_check = self.waiting;
        self.waiting = false;

        if pass {
            if self.failed || first_check {
                self.failed = false;
                return Some(VerifyResult {
                    value: self.last_command,
                    status: Status::Ok,
                });
            }
        } else if !self.failed {
            self.failed = true;
            return Some(VerifyResult {
                value: self.last_command,
                status: Status::Error,
            });
        }
        None
    }
}
