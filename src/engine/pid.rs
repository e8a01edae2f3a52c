//! Discrete PID controller.
//!
//! All gains are in thousandths; `ki` applies per second of accumulated
//! error and `kd` per second of error slope. The integral accumulates in
//! error-microseconds inside an i64 with trapezoidal weighting and is
//! clamped against the configured windup bounds in those raw units. Every
//! intermediate stays in i64 arithmetic; the final division by 1000 maps
//! back into the signal domain.

use crate::engine::config::PidConfig;

const US_PER_S: i64 = 1_000_000;

pub(crate) struct Pid {
    pub cfg: PidConfig,
    integral: i64,
    last_error: i64,
    last_setpoint: i32,
    last_time_us: u64,
    first_run: bool,
}

impl Pid {
    pub fn new(cfg: PidConfig) -> Self {
        Pid {
            cfg,
            integral: 0,
            last_error: 0,
            last_setpoint: 0,
            last_time_us: 0,
            first_run: true,
        }
    }

    /// Forget all accumulated state; the next update runs like the first.
    pub fn reset(&mut self) {
        self.integral = 0;
        self.last_error = 0;
        self.last_setpoint = 0;
        self.last_time_us = 0;
        self.first_run = true;
    }

    /// Evaluate the controller.
    ///
    /// # Returns
    /// The clamped controller output, or `None` when a fixed sample time is
    /// configured and has not elapsed yet.
    pub fn update(
        &mut self,
        setpoint: i32,
        measurement: i32,
        now_us: u64,
    ) -> Option<i32> {
        if self.cfg.sample_time_us > 0
            && !self.first_run
            && now_us.saturating_sub(self.last_time_us)
                < self.cfg.sample_time_us
        {
            return None;
        }

        let error = setpoint as i64 - measurement as i64;

        if self.cfg.reset_on_setpoint_change
            && !self.first_run
            && setpoint != self.last_setpoint
        {
            self.integral = 0;
            self.last_error = 0;
        }

        let mut out = (self.cfg.kp as i64).saturating_mul(error);

        if !self.first_run {
            let dt_us = now_us.saturating_sub(self.last_time_us) as i64;

            if error.unsigned_abs() > self.cfg.deadband as u64 {
                let area = (error + self.last_error)
                    .saturating_mul(dt_us)
                    / 2;
                self.integral = self
                    .integral
                    .saturating_add(area)
                    .clamp(self.cfg.integral_min, self.cfg.integral_max);
            }
            out = out.saturating_add(
                (self.cfg.ki as i64).saturating_mul(self.integral) / US_PER_S,
            );

            if self.cfg.kd != 0 && dt_us > 0 {
                let slope = (error - self.last_error)
                    .saturating_mul(US_PER_S)
                    / dt_us;
                out = out
                    .saturating_add((self.cfg.kd as i64).saturating_mul(slope));
            }
        }

        self.last_error = error;
        self.last_setpoint = setpoint;
        self.last_time_us = now_us;
        self.first_run = false;

        let out = (out / 1000)
            .clamp(self.cfg.output_min as i64, self.cfg.output_max as i64);
        Some(out as i32)
    }
}
