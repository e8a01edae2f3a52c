//! # Fusor
//!
//! A deterministic signal-processing engine for declarative sensor fusion
//! on safety-critical embedded targets. Hardware samples enter through a
//! lock-free ringbuffer, one pure engine step per tick fuses and checks
//! them, and validated output events leave through a post-tick dispatcher
//! into protocol drivers and platform sinks.
//!
//! ## Features
//! * Ordered, bounded voting over redundant inputs with tolerance checks
//! * Status lattice propagated through every processing stage
//! * Raw-wake fault callbacks ahead of all filtering
//! * Reversible limp-home degradation of scale contexts
//! * Drift-free cyclic emission on absolute deadlines
//! * Fixed-point PID control and verified (read-back) outputs
//! * J1939 and CANopen drivers, a DTC manager with DM1/DM2 framing, and a
//!   UDS server over the workspace ISO-TP crate
//! * Zero allocation and no blocking anywhere on the data path
//!
//! ## Structure
//! - [engine]: sample queue, signal table, the engine step and its contexts
//! - [platform]: the hardware abstraction consumed by the dispatcher
//! - [protocol]: protocol drivers, DTC manager, UDS server, calibration
//!
//! The configuration is a plain data table ([engine::config::EngineConfig])
//! produced by the build-time generator and validated at init; everything
//! the engine touches afterwards is fixed-capacity.
#![cfg_attr(not(test), no_std)]
#![deny(warnings)]

pub mod engine;
pub mod platform;
pub mod protocol;

pub use engine::config::EngineConfig;
pub use engine::output::{EngineStats, OutputEvent, OutputType, TickStats};
pub use engine::sample_queue::{RawSample, SampleQueue};
pub use engine::signal::{Event, Signal, Status};
pub use engine::Engine;
pub use platform::{Platform, SinkError};
pub use protocol::{CanFrame, ProtocolDriver};

/// Signal slots an engine can hold.
pub const MAX_SIGNALS: usize = 64;

/// Hardware input bindings.
pub const MAX_INPUTS: usize = 32;

/// Merge (voting) contexts.
pub const MAX_MERGES: usize = 16;

/// Input signals per merge context.
pub const MAX_MERGE_INPUTS: usize = 8;

/// Remap contexts.
pub const MAX_REMAPS: usize = 16;

/// Scale contexts.
pub const MAX_SCALES: usize = 16;

/// Fault monitors.
pub const MAX_FAULT_MONITORS: usize = 16;

/// PID controllers.
pub const MAX_PIDS: usize = 8;

/// Verified outputs.
pub const MAX_VERIFIED_OUTPUTS: usize = 8;

/// On-change output bindings.
pub const MAX_ONCHANGE_OUTPUTS: usize = 16;

/// Cyclic output contexts.
pub const MAX_CYCLIC_OUTPUTS: usize = 16;

/// Per-tick output event buffer capacity.
pub const MAX_OUTPUT_EVENTS: usize = 32;

/// Hardware sample queue depth. Must be a power of two.
pub const SAMPLE_QUEUE_DEPTH: usize = 64;

/// Diagnostic trouble code table capacity.
pub const MAX_DTCS: usize = 16;
