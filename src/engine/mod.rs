//! The deterministic signal-processing engine.
//!
//! # Design
//! One call to [Engine::step] advances the whole pipeline by a tick, in
//! strictly ordered phases:
//!
//! 1. Ingest: drain the hardware sample queue and apply caller events, with
//!    raw-wake range checks before any filtering.
//! 2. Input staleness detection.
//! 3. Merges (voting), in declaration order.
//! 4. Remaps.
//! 5. Scales.
//! 6. Fault monitors, including limp-home engage/restore.
//! 7. PID controllers.
//! 8. Verified outputs.
//! 9. On-change output emission.
//! 10. Cyclic output emission, priority then declaration order.
//! 11. Clear the per-tick `updated` flags.
//!
//! The step is single-threaded and never blocks; the sample queue is the
//! only structure shared with other contexts. Work per tick is bounded by
//! the configured context counts, with no unbounded iteration anywhere.

pub mod config;
pub mod output;
pub mod sample_queue;
pub mod signal;

mod cyclic;
mod fault;
mod merge;
mod pid;
mod transform;
mod verify;

use heapless::Vec;

use crate::{
    MAX_CYCLIC_OUTPUTS, MAX_FAULT_MONITORS, MAX_INPUTS, MAX_MERGES,
    MAX_ONCHANGE_OUTPUTS, MAX_OUTPUT_EVENTS, MAX_PIDS, MAX_REMAPS, MAX_SCALES,
    MAX_VERIFIED_OUTPUTS,
};

use config::{
    ConfigError, EngineConfig, InputConfig, MergeConfig, OnChangeConfig,
    RemapConfig, ScaleConfig, WakeHandler,
};
use cyclic::CyclicOutput;
use fault::{FaultMonitor, FaultTransition};
use output::{EngineStats, OutputBuffer, OutputEvent, TickStats};
use pid::Pid;
use sample_queue::SampleQueue;
use signal::{Event, Signal, SignalBank, Status};
use verify::VerifiedOutput;

/// The engine instance. Constructed once from a validated configuration and
/// stepped by exactly one context.
pub struct Engine<'q> {
    signals: SignalBank,
    inputs: Vec<InputConfig, MAX_INPUTS>,
    merges: Vec<MergeConfig, MAX_MERGES>,
    remaps: Vec<RemapConfig, MAX_REMAPS>,
    scales: Vec<ScaleConfig, MAX_SCALES>,
    faults: Vec<FaultMonitor, MAX_FAULT_MONITORS>,
    pids: Vec<Pid, MAX_PIDS>,
    verified: Vec<VerifiedOutput, MAX_VERIFIED_OUTPUTS>,
    on_change: Vec<OnChangeConfig, MAX_ONCHANGE_OUTPUTS>,
    cyclics: Vec<CyclicOutput, MAX_CYCLIC_OUTPUTS>,
    cyclic_order: Vec<u8, MAX_CYCLIC_OUTPUTS>,
    output: OutputBuffer,
    stats: EngineStats,
    queue: Option<&'q SampleQueue>,
}

impl<'q> Engine<'q> {
    /// Validate the configuration and build the engine.
    ///
    /// # Args
    /// * `config` - The frozen pipeline description.
    /// * `queue` - The hardware sample queue shared with producer contexts,
    ///   if hardware inputs are configured.
    pub fn new(
        config: EngineConfig,
        queue: Option<&'q SampleQueue>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if let (Some(queue), Some(limit)) =
            (queue, config.sample_queue_limit)
        {
            queue.set_limit(limit);
        }

        log::info!(
            "engine: {} signals, {} inputs, {} merges, {} transforms, \
             {} faults, {} pids, {} outputs",
            config.signals.len(),
            config.inputs.len(),
            config.merges.len(),
            config.remaps.len() + config.scales.len(),
            config.faults.len(),
            config.pids.len(),
            config.on_change.len() + config.cyclics.len(),
        );

        let signals =
            SignalBank::new(config.signals.iter().map(|s| s.stale_us));
        let output = OutputBuffer::new(
            config.output_capacity.unwrap_or(MAX_OUTPUT_EVENTS),
        );

        let mut faults: Vec<FaultMonitor, MAX_FAULT_MONITORS> = Vec::new();
        for cfg in config.faults.into_iter() {
            // Note(unwrap): context vectors share the capacity of their
            // configuration counterparts.
            faults.push(FaultMonitor::new(cfg)).ok().unwrap();
        }
        let mut pids: Vec<Pid, MAX_PIDS> = Vec::new();
        for cfg in config.pids.into_iter() {
            pids.push(Pid::new(cfg)).ok().unwrap();
        }
        let mut verified: Vec<VerifiedOutput, MAX_VERIFIED_OUTPUTS> =
            Vec::new();
        for cfg in config.verified.into_iter() {
            verified.push(VerifiedOutput::new(cfg)).ok().unwrap();
        }
        let mut cyclics: Vec<CyclicOutput, MAX_CYCLIC_OUTPUTS> = Vec::new();
        for cfg in config.cyclics.into_iter() {
            cyclics.push(CyclicOutput::new(cfg)).ok().unwrap();
        }
        let cyclic_order = cyclic::emission_order(&cyclics);

        Ok(Engine {
            signals,
            inputs: config.inputs,
            merges: config.merges,
            remaps: config.remaps,
            scales: config.scales,
            faults,
            pids,
            verified,
            on_change: config.on_change,
            cyclics,
            cyclic_order,
            output,
            stats: EngineStats::default(),
            queue,
        })
    }

    /// Run one tick.
    ///
    /// Drains the hardware sample queue, applies `events`, and evaluates
    /// every configured context in phase order. The produced output events
    /// stay buffered until the next step so the post-tick dispatcher can
    /// drain [Self::outputs].
    pub fn step(&mut self, now_us: u64, events: &[Event]) -> TickStats {
        let mut tick = TickStats::default();
        self.output.clear();

        // Phase 1: ingest.
        if let Some(queue) = self.queue {
            while let Some(sample) = queue.pop() {
                tick.samples_ingested += 1;
                let signal = self
                    .inputs
                    .iter()
                    .find(|input| input.source == sample.source)
                    .map(|input| input.signal);
                match signal {
                    Some(signal) => ingest(
                        &mut self.signals,
                        &self.faults,
                        &mut tick,
                        signal,
                        sample.value as i32,
                        Status::Ok,
                        sample.timestamp_us,
                    ),
                    None => {
                        log::debug!(
                            "engine: sample from unbound source {}",
                            sample.source
                        );
                        tick.events_rejected += 1;
                    }
                }
            }
        }
        for event in events {
            if event.source >= self.signals.len() as u32 {
                log::debug!(
                    "engine: event for unknown signal {}",
                    event.source
                );
                tick.events_rejected += 1;
                continue;
            }
            ingest(
                &mut self.signals,
                &self.faults,
                &mut tick,
                event.source as u8,
                event.value,
                event.status,
                event.timestamp_us,
            );
        }

        // Phase 2: input staleness.
        for index in 0..self.signals.len() as u8 {
            let slot = self.signals.slot(index);
            if slot.stale_us > 0
                && now_us.saturating_sub(slot.timestamp_us) > slot.stale_us
            {
                self.signals.raise(index, Status::Timeout);
            }
        }

        // Phase 3: merges.
        for i in 0..self.merges.len() {
            if !self.merges[i].enabled {
                continue;
            }
            let outcome =
                merge::evaluate(&self.merges[i], &self.signals, now_us);
            if outcome.inconsistent {
                tick.merges_inconsistent += 1;
            }
            let output_index = self.merges[i].output;
            let value = outcome
                .value
                .unwrap_or_else(|| self.signals.slot(output_index).value);
            self.signals
                .produce(output_index, value, outcome.status, now_us);
        }

        // Phase 4: remaps.
        for i in 0..self.remaps.len() {
            let cfg = self.remaps[i];
            if !cfg.enabled {
                continue;
            }
            let input = *self.signals.slot(cfg.input);
            if input.status == Status::Ok {
                let value =
                    transform::remap(input.value, cfg.invert, cfg.deadzone);
                self.signals.produce(cfg.output, value, Status::Ok, now_us);
            } else {
                let value = self.signals.slot(cfg.output).value;
                self.signals.produce(cfg.output, value, input.status, now_us);
            }
        }

        // Phase 5: scales.
        for i in 0..self.scales.len() {
            let cfg = self.scales[i];
            if !cfg.enabled {
                continue;
            }
            let input = *self.signals.slot(cfg.input);
            if input.status == Status::Ok {
                let value = transform::scale(
                    input.value,
                    cfg.factor,
                    cfg.offset,
                    cfg.clamp_min,
                    cfg.clamp_max,
                );
                self.signals.produce(cfg.output, value, Status::Ok, now_us);
            } else {
                let value = self.signals.slot(cfg.output).value;
                self.signals.produce(cfg.output, value, input.status, now_us);
            }
        }

        // Phase 6: fault monitors.
        for i in 0..self.faults.len() {
            if !self.faults[i].cfg.enabled {
                continue;
            }
            let watched = *self.signals.slot(self.faults[i].cfg.input);
            let scale_index =
                self.faults[i].cfg.limp_home.map(|l| l.scale as usize);
            let monitor = &mut self.faults[i];
            let scale = scale_index.map(|s| &mut self.scales[s]);
            let transition = monitor.update(&watched, scale, now_us);
            let fault_signal = monitor.cfg.fault_signal;
            let level = monitor.cfg.fault_level;
            let wake = monitor.cfg.wake;
            match transition {
                FaultTransition::Raised => {
                    self.signals.produce(
                        fault_signal,
                        level as i32,
                        Status::Ok,
                        now_us,
                    );
                    if let Some(wake) = wake {
                        wake(i as u8, watched.value, level);
                    }
                }
                FaultTransition::Cleared { restored } => {
                    if let Some(wake) = wake {
                        wake(i as u8, watched.value, 0);
                    }
                    if restored {
                        self.signals
                            .produce(fault_signal, 0, Status::Ok, now_us);
                    }
                }
                FaultTransition::Restored => {
                    self.signals.produce(fault_signal, 0, Status::Ok, now_us);
                }
                FaultTransition::None => {}
            }
            if self.faults[i].active {
                tick.faults_active += 1;
            }
        }

        // Phase 7: PID controllers.
        for i in 0..self.pids.len() {
            if !self.pids[i].cfg.enabled {
                continue;
            }
            let cfg = self.pids[i].cfg;
            let setpoint = *self.signals.slot(cfg.setpoint);
            let measurement = *self.signals.slot(cfg.measurement);
            if let Some(value) =
                self.pids[i].update(setpoint.value, measurement.value, now_us)
            {
                self.signals.produce(
                    cfg.output,
                    value,
                    setpoint.status.join(measurement.status),
                    now_us,
                );
            }
        }

        // Phase 8: verified outputs.
        for i in 0..self.verified.len() {
            if !self.verified[i].cfg.enabled {
                continue;
            }
            let output_index = self.verified[i].cfg.output;
            let result = self.verified[i].update(&self.signals, now_us);
            if let Some(result) = result {
                self.signals.produce(
                    output_index,
                    result.value,
                    result.status,
                    now_us,
                );
            }
        }

        // Phase 9: on-change outputs.
        for binding in self.on_change.iter() {
            if !binding.enabled {
                continue;
            }
            let slot = self.signals.slot(binding.signal);
            if slot.updated {
                self.output.push(OutputEvent {
                    kind: binding.kind,
                    target_id: binding.target_id,
                    device_index: binding.device_index,
                    value: slot.value,
                    flags: binding.flags,
                    timestamp_us: now_us,
                });
            }
        }

        // Phase 10: cyclic outputs, at most one emission per context.
        for k in 0..self.cyclic_order.len() {
            let index = self.cyclic_order[k] as usize;
            if !self.cyclics[index].due(now_us) {
                continue;
            }
            let cfg = self.cyclics[index].cfg;
            let slot = self.signals.slot(cfg.signal);
            self.output.push(OutputEvent {
                kind: cfg.kind,
                target_id: cfg.target_id,
                device_index: cfg.device_index,
                value: slot.value,
                flags: cfg.flags,
                timestamp_us: now_us,
            });
            self.cyclics[index].advance();
        }

        // Phase 11: end of tick.
        self.signals.clear_updated();

        tick.events_emitted = self.output.emitted();
        tick.events_dropped = self.output.dropped();
        self.stats.absorb(&tick);
        if let Some(queue) = self.queue {
            self.stats.samples_dropped = queue.dropped();
        }
        tick
    }

    /// The output events produced by the last step, for the dispatcher.
    pub fn outputs(&self) -> &[OutputEvent] {
        self.output.events()
    }

    pub fn signal(&self, index: u8) -> Option<&Signal> {
        self.signals.get(index)
    }

    pub fn signal_value(&self, index: u8) -> Option<i32> {
        self.signals.get(index).map(|s| s.value)
    }

    pub fn signal_status(&self, index: u8) -> Option<Status> {
        self.signals.get(index).map(|s| s.status)
    }

    /// Cumulative statistics since construction or the last reset.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EngineStats::default();
    }

    /// Record how long the last step took, as measured by the caller on its
    /// own clock. Feeds the min/max step time statistics.
    pub fn record_step_time(&mut self, duration_us: u32) {
        self.stats.record_step_time(duration_us);
    }

    pub fn set_merge_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.merges.get_mut(index) {
            Some(merge) => {
                merge.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_remap_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.remaps.get_mut(index) {
            Some(remap) => {
                remap.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_scale_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.scales.get_mut(index) {
            Some(scale) => {
                scale.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_fault_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.faults.get_mut(index) {
            Some(fault) => {
                fault.cfg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabling a PID resets its accumulated state.
    pub fn set_pid_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.pids.get_mut(index) {
            Some(pid) => {
                if enabled && !pid.cfg.enabled {
                    pid.reset();
                }
                pid.cfg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_verified_enabled(
        &mut self,
        index: usize,
        enabled: bool,
    ) -> bool {
        match self.verified.get_mut(index) {
            Some(verified) => {
                verified.cfg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_cyclic_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.cyclics.get_mut(index) {
            Some(cyclic) => {
                cyclic.cfg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Register the raw-wake callback of a fault monitor.
    pub fn set_wake_handler(
        &mut self,
        index: usize,
        handler: WakeHandler,
    ) -> bool {
        match self.faults.get_mut(index) {
            Some(fault) => {
                fault.cfg.wake = Some(handler);
                true
            }
            None => false,
        }
    }

    /// True while the monitor observes its fault condition.
    pub fn fault_active(&self, index: usize) -> Option<bool> {
        self.faults.get(index).map(|f| f.active)
    }

    /// True while the monitor's limp-home override holds its target scale.
    pub fn limp_active(&self, index: usize) -> Option<bool> {
        self.faults.get(index).map(|f| f.limp_active())
    }

    /// The live parameters of a scale context (calibration surface).
    pub fn scale_config(&self, index: usize) -> Option<&ScaleConfig> {
        self.scales.get(index)
    }

    /// Replace the tunable parameters of a scale context.
    pub fn set_scale_params(
        &mut self,
        index: usize,
        factor: i32,
        offset: i32,
        clamp_min: Option<i32>,
        clamp_max: Option<i32>,
    ) -> bool {
        match self.scales.get_mut(index) {
            Some(scale) => {
                scale.factor = factor;
                scale.offset = offset;
                scale.clamp_min = clamp_min;
                scale.clamp_max = clamp_max;
                true
            }
            None => false,
        }
    }

    /// The live parameters of a remap context (calibration surface).
    pub fn remap_config(&self, index: usize) -> Option<&RemapConfig> {
        self.remaps.get(index)
    }

    /// Replace the tunable parameters of a remap context.
    pub fn set_remap_params(
        &mut self,
        index: usize,
        invert: bool,
        deadzone: u32,
    ) -> bool {
        match self.remaps.get_mut(index) {
            Some(remap) => {
                remap.invert = invert;
                remap.deadzone = deadzone;
                true
            }
            None => false,
        }
    }

    pub fn scale_count(&self) -> usize {
        self.scales.len()
    }

    pub fn remap_count(&self) -> usize {
        self.remaps.len()
    }
}

/// Apply one event to the signal table, running raw-wake checks first.
fn ingest(
    signals: &mut SignalBank,
    faults: &[FaultMonitor],
    tick: &mut TickStats,
    index: u8,
    value: i32,
    status: Status,
    timestamp_us: u64,
) {
    for (m, monitor) in faults.iter().enumerate() {
        if monitor.raw_violation(index, value) {
            tick.raw_wakes += 1;
            if let Some(wake) = monitor.cfg.wake {
                wake(m as u8, value, monitor.cfg.fault_level);
            }
        }
    }
    signals.ingest(index, value, status, timestamp_us);
    tick.events_ingested += 1;
}
