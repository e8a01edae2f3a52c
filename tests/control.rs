//! Closed-loop control through the engine: a PID regulating a simulated
//! plant, and a verified output watching an actuator echo.

use fusor::engine::config::{
    EngineConfig, PidConfig, SignalConfig, VerifiedOutputConfig,
};
use fusor::{Engine, Event, Status};

fn config_with_signals(count: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    for _ in 0..count {
        config.signals.push(SignalConfig::default()).unwrap();
    }
    config
}

fn ok_event(source: u32, value: i32, timestamp_us: u64) -> Event {
    Event {
        source,
        value,
        status: Status::Ok,
        timestamp_us,
    }
}

const SETPOINT: u8 = 0;
const MEASUREMENT: u8 = 1;
const DRIVE: u8 = 2;

#[test]
fn pid_drives_a_first_order_plant_to_the_setpoint() {
    let mut config = config_with_signals(3);
    config
        .pids
        .push(PidConfig {
            setpoint: SETPOINT,
            measurement: MEASUREMENT,
            output: DRIVE,
            kp: 400,
            ki: 2_000,
            kd: 0,
            output_min: -1_000,
            output_max: 1_000,
            integral_min: -500_000_000,
            integral_max: 500_000_000,
            deadband: 0,
            sample_time_us: 10_000,
            reset_on_setpoint_change: true,
            enabled: true,
        })
        .unwrap();
    let mut engine = Engine::new(config, None).unwrap();

    // First-order plant: the state chases the drive each 10 ms tick.
    let mut plant = 0i64;
    let mut now = 0u64;
    for _ in 0..400 {
        engine.step(
            now,
            &[
                ok_event(SETPOINT as u32, 500, now),
                ok_event(MEASUREMENT as u32, plant as i32, now),
            ],
        );
        let drive = engine.signal_value(DRIVE).unwrap() as i64;
        plant += (drive - plant) / 8;
        now += 10_000;
    }

    let error = (500 - plant).abs();
    assert!(error <= 5, "plant settled at {}", plant);

    // The drive signal carries the joined health of its inputs.
    assert_eq!(engine.signal_status(DRIVE), Some(Status::Ok));
}

#[test]
fn pid_output_inherits_degraded_inputs() {
    let mut config = config_with_signals(3);
    config
        .pids
        .push(PidConfig {
            setpoint: SETPOINT,
            measurement: MEASUREMENT,
            output: DRIVE,
            kp: 1_000,
            ki: 0,
            kd: 0,
            output_min: -1_000,
            output_max: 1_000,
            integral_min: 0,
            integral_max: 0,
            deadband: 0,
            sample_time_us: 0,
            reset_on_setpoint_change: false,
            enabled: true,
        })
        .unwrap();
    let mut engine = Engine::new(config, None).unwrap();

    engine.step(
        0,
        &[
            ok_event(SETPOINT as u32, 100, 0),
            Event {
                source: MEASUREMENT as u32,
                value: 40,
                status: Status::Degraded,
                timestamp_us: 0,
            },
        ],
    );
    assert_eq!(engine.signal_value(DRIVE), Some(60));
    assert_eq!(engine.signal_status(DRIVE), Some(Status::Degraded));
}

#[test]
fn verified_output_flags_a_stuck_actuator() {
    const COMMAND: u8 = 0;
    const FEEDBACK: u8 = 1;
    const VERIFIED: u8 = 2;

    let mut config = config_with_signals(3);
    config
        .verified
        .push(VerifiedOutputConfig {
            command: COMMAND,
            verification: FEEDBACK,
            output: VERIFIED,
            tolerance: 10,
            verify_timeout_us: 50_000,
            continuous: true,
            enabled: true,
        })
        .unwrap();
    let mut engine = Engine::new(config, None).unwrap();

    // Command goes out; the actuator echoes it within tolerance.
    engine.step(0, &[ok_event(COMMAND as u32, 300, 0)]);
    assert_eq!(engine.signal_value(VERIFIED), Some(300));
    engine.step(20_000, &[ok_event(FEEDBACK as u32, 295, 20_000)]);
    engine.step(60_000, &[]);
    assert_eq!(engine.signal_status(VERIFIED), Some(Status::Ok));

    // The actuator sticks while the command moves on.
    engine.step(100_000, &[ok_event(COMMAND as u32, 600, 100_000)]);
    engine.step(200_000, &[]);
    assert_eq!(engine.signal_value(VERIFIED), Some(600));
    assert_eq!(engine.signal_status(VERIFIED), Some(Status::Error));
}
