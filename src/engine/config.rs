//! Frozen engine configuration.
//!
//! The whole pipeline is described by one [EngineConfig] value handed to the
//! engine at construction. In production the configuration is emitted by the
//! build-time generator as a plain data table (JSON); everything here
//! round-trips through serde so that boundary stays declarative. Validation
//! happens once, at init: a configuration referencing a signal slot that does
//! not exist is rejected and the engine refuses to run.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::engine::output::OutputType;
use crate::{
    MAX_CYCLIC_OUTPUTS, MAX_FAULT_MONITORS, MAX_INPUTS, MAX_MERGES,
    MAX_MERGE_INPUTS, MAX_ONCHANGE_OUTPUTS, MAX_OUTPUT_EVENTS, MAX_PIDS,
    MAX_REMAPS, MAX_SCALES, MAX_SIGNALS, MAX_VERIFIED_OUTPUTS,
    SAMPLE_QUEUE_DEPTH,
};

/// Raw-wake callback: `(monitor index, raw value, fault level)`.
///
/// Runs synchronously during ingest, before any filtering or voting. The
/// handler must be bounded and non-blocking and must not call back into the
/// engine; arming a pin or flag is the intended scope.
pub type WakeHandler = fn(monitor: u8, raw_value: i32, level: u8);

fn enabled() -> bool {
    true
}

/// Per-slot signal parameters.
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Maximum event age before the staleness phase raises Timeout.
    /// Zero disables the check.
    #[serde(default)]
    pub stale_us: u64,
}

/// Binds a hardware sample source to a signal slot.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub source: u16,
    pub signal: u8,
}

/// Voting method of a merge context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeMethod {
    Median,
    Average,
    Min,
    Max,
}

/// Fuses 2..=8 input signals into one output signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    pub inputs: Vec<u8, MAX_MERGE_INPUTS>,
    pub output: u8,
    pub method: MergeMethod,
    /// Maximum deviation of any input from the result before the output is
    /// marked inconsistent. Zero disables the check.
    #[serde(default)]
    pub tolerance: u32,
    /// Maximum input age for an input to take part in the vote.
    #[serde(default)]
    pub stale_us: u64,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Inverts and/or deadzones a signal.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct RemapConfig {
    pub input: u8,
    pub output: u8,
    #[serde(default)]
    pub invert: bool,
    /// Symmetric deadzone: inputs with `|v| <= deadzone` map to zero.
    #[serde(default)]
    pub deadzone: u32,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Linear transform `out = clamp(in * factor / 1000 + offset)`.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub input: u8,
    pub output: u8,
    /// Gain in thousandths.
    pub factor: i32,
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub clamp_min: Option<i32>,
    #[serde(default)]
    pub clamp_max: Option<i32>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Reversible degradation applied to a scale context while a fault persists.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct LimpHomeConfig {
    /// Index into the scale context array.
    pub scale: u8,
    /// Override gain in thousandths.
    pub factor: i32,
    #[serde(default)]
    pub clamp_min: Option<i32>,
    #[serde(default)]
    pub clamp_max: Option<i32>,
    /// How long the fault must stay clear before the original scale
    /// parameters are restored. Zero restores immediately.
    #[serde(default)]
    pub restore_delay_ms: u32,
}

/// Watches one signal for range, staleness and status faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultConfig {
    pub input: u8,
    /// Signal raised to `fault_level` while the fault is active.
    pub fault_signal: u8,
    #[serde(default)]
    pub check_staleness: bool,
    #[serde(default)]
    pub stale_timeout_us: u64,
    #[serde(default)]
    pub check_range: bool,
    #[serde(default)]
    pub min: i32,
    #[serde(default)]
    pub max: i32,
    /// Fault when the input status reaches Error or worse.
    #[serde(default)]
    pub check_status: bool,
    /// Severity 0..=7 written into the fault signal.
    pub fault_level: u8,
    #[serde(default)]
    pub limp_home: Option<LimpHomeConfig>,
    /// Raw-wake callback, registered in code rather than in the table.
    #[serde(skip)]
    pub wake: Option<WakeHandler>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Discrete PID controller with thousandths-scaled gains.
///
/// `ki` is per second of accumulated error, `kd` per second of error slope;
/// both are integrated/differentiated on the microsecond clock internally.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    pub setpoint: u8,
    pub measurement: u8,
    pub output: u8,
    pub kp: i32,
    pub ki: i32,
    pub kd: i32,
    pub output_min: i32,
    pub output_max: i32,
    pub integral_min: i64,
    pub integral_max: i64,
    /// Errors at or below this magnitude do not accumulate integral.
    #[serde(default)]
    pub deadband: u32,
    /// Fixed evaluation period; zero evaluates every tick.
    #[serde(default)]
    pub sample_time_us: u64,
    #[serde(default)]
    pub reset_on_setpoint_change: bool,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Mirrors a command signal and cross-checks it against a feedback signal.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct VerifiedOutputConfig {
    pub command: u8,
    pub verification: u8,
    pub output: u8,
    /// Maximum accepted deviation between command and feedback.
    pub tolerance: u32,
    /// Time the feedback path is given before the first comparison.
    pub verify_timeout_us: u64,
    /// Keep comparing every tick once the initial window has passed.
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Emits an output event whenever the source signal updates.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct OnChangeConfig {
    pub signal: u8,
    pub kind: OutputType,
    pub target_id: u32,
    #[serde(default)]
    pub device_index: u8,
    #[serde(default)]
    pub flags: u32,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// Emits the current source signal value on a fixed period.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct CyclicConfig {
    pub kind: OutputType,
    pub target_id: u32,
    #[serde(default)]
    pub device_index: u8,
    pub signal: u8,
    pub period_us: u64,
    /// Higher priority wins on simultaneous deadlines.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub flags: u32,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

/// The complete frozen pipeline description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// One entry per signal slot; the length is the signal count.
    pub signals: Vec<SignalConfig, MAX_SIGNALS>,
    #[serde(default)]
    pub inputs: Vec<InputConfig, MAX_INPUTS>,
    #[serde(default)]
    pub merges: Vec<MergeConfig, MAX_MERGES>,
    #[serde(default)]
    pub remaps: Vec<RemapConfig, MAX_REMAPS>,
    #[serde(default)]
    pub scales: Vec<ScaleConfig, MAX_SCALES>,
    #[serde(default)]
    pub faults: Vec<FaultConfig, MAX_FAULT_MONITORS>,
    #[serde(default)]
    pub pids: Vec<PidConfig, MAX_PIDS>,
    #[serde(default)]
    pub verified: Vec<VerifiedOutputConfig, MAX_VERIFIED_OUTPUTS>,
    #[serde(default)]
    pub on_change: Vec<OnChangeConfig, MAX_ONCHANGE_OUTPUTS>,
    #[serde(default)]
    pub cyclics: Vec<CyclicConfig, MAX_CYCLIC_OUTPUTS>,
    /// Runtime cap on the hardware sample queue depth.
    #[serde(default)]
    pub sample_queue_limit: Option<usize>,
    /// Runtime cap on the per-tick output event buffer.
    #[serde(default)]
    pub output_capacity: Option<usize>,
}

/// Init-time rejection reasons. The engine refuses to run on any of these.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The signal table must hold at least one slot.
    NoSignals,
    /// A context references a signal slot past the table.
    SignalIndex { context: &'static str, index: u8 },
    /// A merge must name between 2 and 8 inputs.
    MergeInputs { merge: usize },
    /// clamp_min above clamp_max.
    ClampOrder { context: &'static str, index: usize },
    /// Fault levels are 0..=7.
    FaultLevel { monitor: usize },
    /// A limp-home block references a scale context past the array.
    LimpScale { monitor: usize },
    /// Cyclic periods must be non-zero.
    CyclicPeriod { cyclic: usize },
    /// PID output or integral bounds are inverted.
    PidBounds { pid: usize },
    /// Queue or buffer capacity outside the compiled storage.
    Capacity { context: &'static str },
}

impl EngineConfig {
    /// Parse a configuration table emitted by the build-time generator.
    pub fn from_json(table: &[u8]) -> Result<Self, serde_json_core::de::Error> {
        serde_json_core::from_slice(table).map(|(config, _)| config)
    }

    /// Check every cross-reference and bound. Called by the engine at init.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.signals.len() as u8;
        if n == 0 {
            return Err(ConfigError::NoSignals);
        }

        let check = |context: &'static str, index: u8| {
            if index < n {
                Ok(())
            } else {
                Err(ConfigError::SignalIndex { context, index })
            }
        };

        for input in self.inputs.iter() {
            check("input", input.signal)?;
        }

        for (i, merge) in self.merges.iter().enumerate() {
            if merge.inputs.len() < 2 {
                return Err(ConfigError::MergeInputs { merge: i });
            }
            for &input in merge.inputs.iter() {
                check("merge input", input)?;
            }
            check("merge output", merge.output)?;
        }

        for remap in self.remaps.iter() {
            check("remap input", remap.input)?;
            check("remap output", remap.output)?;
        }

        for (i, scale) in self.scales.iter().enumerate() {
            check("scale input", scale.input)?;
            check("scale output", scale.output)?;
            clamp_order("scale", i, scale.clamp_min, scale.clamp_max)?;
        }

        for (i, fault) in self.faults.iter().enumerate() {
            check("fault input", fault.input)?;
            check("fault signal", fault.fault_signal)?;
            if fault.fault_level > 7 {
                return Err(ConfigError::FaultLevel { monitor: i });
            }
            if let Some(limp) = &fault.limp_home {
                if limp.scale as usize >= self.scales.len() {
                    return Err(ConfigError::LimpScale { monitor: i });
                }
                clamp_order("limp home", i, limp.clamp_min, limp.clamp_max)?;
            }
        }

        for (i, pid) in self.pids.iter().enumerate() {
            check("pid setpoint", pid.setpoint)?;
            check("pid measurement", pid.measurement)?;
            check("pid output", pid.output)?;
            if pid.output_min > pid.output_max
                || pid.integral_min > pid.integral_max
            {
                return Err(ConfigError::PidBounds { pid: i });
            }
        }

        for verified in self.verified.iter() {
            check("verified command", verified.command)?;
            check("verified feedback", verified.verification)?;
            check("verified output", verified.output)?;
        }

        for binding in self.on_change.iter() {
            check("on-change source", binding.signal)?;
        }

        for (i, cyclic) in self.cyclics.iter().enumerate() {
            check("cyclic source", cyclic.signal)?;
            if cyclic.period_us == 0 {
                return Err(ConfigError::CyclicPeriod { cyclic: i });
            }
        }

        if let Some(limit) = self.sample_queue_limit {
            if limit == 0 || limit > SAMPLE_QUEUE_DEPTH {
                return Err(ConfigError::Capacity {
                    context: "sample queue",
                });
            }
        }
        if let Some(capacity) = self.output_capacity {
            if capacity == 0 || capacity > MAX_OUTPUT_EVENTS {
                return Err(ConfigError::Capacity {
                    context: "output buffer",
                });
            }
        }

        Ok(())
    }
}

fn clamp_order(
    context: &'static str,
    index: usize,
    min: Option<i32>,
    max: Option<i32>,
) -> Result<(), ConfigError> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => {
            Err(ConfigError::ClampOrder { context, index })
        }
        _ => Ok(()),
    }
}
