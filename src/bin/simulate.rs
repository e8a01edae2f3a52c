//! # Simulate
//!
//! A host-side simulation of a small fusion pipeline: three noisy redundant
//! temperature sensors vote into a canonical signal, a scale converts it to
//! milli-degrees, a fault monitor with limp-home watches the raw channel,
//! and the result leaves as a cyclic J1939 parameter group.
//!
//! ## Features
//! * Deterministic simulated clock and sensor noise
//! * Fault injection window demonstrating limp-home engage and restore
//! * Full post-tick dispatch through the J1939 driver
//! * Engine and dispatcher statistics on exit
//!
//! Run with `cargo run --bin simulate`.

use std::io::Write;

use rand_core::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

use fusor::engine::config::{
    EngineConfig, FaultConfig, LimpHomeConfig, MergeConfig, MergeMethod,
    OnChangeConfig, ScaleConfig, SignalConfig,
};
use fusor::platform::dispatch::{dispatch, DispatchStats};
use fusor::platform::{Platform, SinkError};
use fusor::protocol::j1939::{J1939Config, J1939Driver};
use fusor::protocol::{CanFrame, EncodeMapping, FieldMapping, ProtocolDriver};
use fusor::{Engine, OutputType, RawSample, SampleQueue};

/// Raw sensor channels.
const RAW: [u8; 3] = [0, 1, 2];
/// Voted temperature.
const VOTED: u8 = 3;
/// Scaled output in milli-degrees.
const MILLI_DEG: u8 = 4;
/// Fault level indicator.
const FAULT: u8 = 5;

const TICK_US: u64 = 10_000;
const TICKS: u64 = 1_000;

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(
                std::io::stderr(),
                "[{}] {}",
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// A platform that counts frames instead of touching hardware.
struct SimPlatform {
    now_us: u64,
    can_frames: u32,
}

impl Platform for SimPlatform {
    fn now_us(&self) -> u64 {
        self.now_us
    }

    fn gpio_set(&mut self, _: u8, _: bool) -> Result<(), SinkError> {
        Ok(())
    }

    fn pwm_set(&mut self, _: u8, _: i32) -> Result<(), SinkError> {
        Ok(())
    }

    fn dac_write(&mut self, _: u8, _: i32) -> Result<(), SinkError> {
        Ok(())
    }

    fn uart_send(&mut self, _: u8, _: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn spi_send(&mut self, _: u8, _: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn i2c_write(&mut self, _: u8, _: u8, _: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn i2c_read(
        &mut self,
        _: u8,
        _: u8,
        buffer: &mut [u8],
    ) -> Result<(), SinkError> {
        buffer.fill(0);
        Ok(())
    }

    fn can_send(&mut self, _: u8, _: &CanFrame) -> Result<(), SinkError> {
        self.can_frames += 1;
        Ok(())
    }

    fn modbus_write(&mut self, _: u8, _: u16, _: u16) -> Result<(), SinkError> {
        Ok(())
    }
}

fn pipeline() -> EngineConfig {
    let mut config = EngineConfig::default();
    for _ in 0..6 {
        config.signals.push(SignalConfig::default()).unwrap();
    }
    config
        .merges
        .push(MergeConfig {
            inputs: heapless::Vec::from_slice(&RAW).unwrap(),
            output: VOTED,
            method: MergeMethod::Median,
            tolerance: 80,
            stale_us: 50_000,
            enabled: true,
        })
        .unwrap();
    config
        .scales
        .push(ScaleConfig {
            input: VOTED,
            output: MILLI_DEG,
            factor: 250,
            offset: -40_000,
            clamp_min: Some(-40_000),
            clamp_max: Some(150_000),
            enabled: true,
        })
        .unwrap();
    config
        .faults
        .push(FaultConfig {
            input: RAW[2],
            fault_signal: FAULT,
            check_staleness: false,
            stale_timeout_us: 0,
            check_range: true,
            min: 0,
            max: 700,
            check_status: false,
            fault_level: 3,
            limp_home: Some(LimpHomeConfig {
                scale: 0,
                factor: 125,
                clamp_min: Some(-40_000),
                clamp_max: Some(75_000),
                restore_delay_ms: 500,
            }),
            wake: None,
            enabled: true,
        })
        .unwrap();
    config
        .on_change
        .push(OnChangeConfig {
            signal: MILLI_DEG,
            kind: OutputType::J1939,
            target_id: 0xFF40,
            device_index: 0,
            flags: 0,
            enabled: true,
        })
        .unwrap();
    config
}

fn raised_alarm(monitor: u8, raw_value: i32, level: u8) {
    log::info!(
        "wake: monitor {} saw {} (level {})",
        monitor,
        raw_value,
        level
    );
}

fn main() {
    let _ = log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Info));

    static QUEUE: SampleQueue = SampleQueue::new();

    let mut config = pipeline();
    for (i, &signal) in RAW.iter().enumerate() {
        config
            .inputs
            .push(fusor::engine::config::InputConfig {
                source: 0x10 + i as u16,
                signal,
            })
            .unwrap();
    }

    let mut engine = Engine::new(config, Some(&QUEUE)).unwrap();
    engine.set_wake_handler(0, raised_alarm);

    let mut driver_config = J1939Config {
        node_address: 0x42,
        ..J1939Config::default()
    };
    driver_config
        .encode
        .push(EncodeMapping {
            id: 0xFF40,
            fields: heapless::Vec::from_slice(&[FieldMapping {
                signal: MILLI_DEG,
                start: 0,
                width: 4,
            }])
            .unwrap(),
            period_ms: 100,
        })
        .unwrap();
    let mut driver = J1939Driver::new(driver_config);

    let mut platform = SimPlatform {
        now_us: 0,
        can_frames: 0,
    };
    let mut rng = XorShiftRng::seed_from_u64(0x5EED);
    let mut dispatch_totals = DispatchStats::default();

    for tick in 0..TICKS {
        let now_us = tick * TICK_US;
        platform.now_us = now_us;

        // Sensor "interrupts": a slow ramp plus per-channel noise. Channel 2
        // sticks high for a while mid-run to exercise the fault path.
        let base = 200 + (tick / 10) as u32;
        for i in 0..RAW.len() {
            let noise = rng.next_u32() % 7;
            let mut value = base + noise;
            if i == 2 && (400..430).contains(&tick) {
                value = 900;
            }
            QUEUE.push(RawSample {
                source: 0x10 + i as u16,
                value,
                timestamp_us: now_us,
            });
        }

        engine.step(now_us, &[]);

        let mut drivers: [&mut dyn ProtocolDriver; 1] = [&mut driver];
        let stats = dispatch(&engine, now_us, &mut platform, &mut drivers);
        dispatch_totals.dispatched += stats.dispatched;
        dispatch_totals.sink_failures += stats.sink_failures;
        dispatch_totals.cyclic_frames += stats.cyclic_frames;

        if tick % 100 == 0 {
            log::info!(
                "t={:>5}ms voted={:?} milli_deg={:?} status={:?} limp={:?}",
                now_us / 1000,
                engine.signal_value(VOTED),
                engine.signal_value(MILLI_DEG),
                engine.signal_status(MILLI_DEG),
                engine.limp_active(0),
            );
        }
    }

    let stats = engine.stats();
    println!("ticks:            {}", stats.ticks);
    println!("events ingested:  {}", stats.events_ingested);
    println!("events emitted:   {}", stats.events_emitted);
    println!("merge conflicts:  {}", stats.merges_inconsistent);
    println!("raw wakes:        {}", stats.raw_wakes);
    println!("samples dropped:  {}", stats.samples_dropped);
    println!("dispatched:       {}", dispatch_totals.dispatched);
    println!("cyclic frames:    {}", dispatch_totals.cyclic_frames);
    println!("can frames:       {}", platform.can_frames);
    assert_eq!(dispatch_totals.sink_failures, 0);

    // The stuck channel must not have corrupted the voted value: the median
    // rejects a single outlier.
    let voted = engine.signal_value(VOTED).unwrap();
    assert!((0..=700).contains(&voted), "voted = {}", voted);
}
