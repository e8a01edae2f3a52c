//! Post-tick output dispatcher.
//!
//! After an engine step the host calls [dispatch] to drain the output event
//! buffer. Protocol-bound events are handed to the matching protocol driver
//! for encoding and the resulting frames put on the CAN sink; everything
//! else maps onto a direct platform call. Sink failures are logged and
//! counted; there is no back-pressure into the engine.

use crate::engine::output::{OutputEvent, OutputType};
use crate::engine::Engine;
use crate::platform::Platform;
use crate::protocol::{CanFrame, ProtocolDriver, MAX_CYCLIC_FRAMES};

/// Counters produced by one dispatch pass.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events routed to a sink or encoder.
    pub dispatched: u32,
    /// Sink calls that returned an error.
    pub sink_failures: u32,
    /// Protocol events with no driver or no encode mapping.
    pub unrouted: u32,
    /// Frames emitted by the drivers' own cyclic machinery.
    pub cyclic_frames: u32,
}

/// Drain the engine's output buffer into the platform and drivers.
///
/// # Args
/// * `engine` - The engine whose last step produced the events.
/// * `now_us` - The current monotonic time.
/// * `platform` - The hardware sink provider.
/// * `drivers` - The active protocol drivers, at most one per output type.
pub fn dispatch<P: Platform>(
    engine: &Engine,
    now_us: u64,
    platform: &mut P,
    drivers: &mut [&mut dyn ProtocolDriver],
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    // Refresh the drivers' encode caches from the signal table. Drivers
    // ignore signals outside their maps.
    for driver in drivers.iter_mut() {
        for index in 0..u8::MAX {
            match engine.signal(index) {
                Some(signal) => driver.update_signal(
                    index,
                    signal.value,
                    signal.timestamp_us,
                ),
                None => break,
            }
        }
    }

    for event in engine.outputs() {
        let sent = match event.kind {
            OutputType::Can | OutputType::J1939 | OutputType::CanOpen => {
                route_frame(event, now_us, platform, drivers, &mut stats)
            }
            OutputType::Gpio => {
                platform.gpio_set(event.device_index, event.value != 0)
            }
            OutputType::Pwm => {
                platform.pwm_set(event.device_index, event.value)
            }
            OutputType::Dac => {
                platform.dac_write(event.device_index, event.value)
            }
            OutputType::Uart => platform
                .uart_send(event.device_index, &event.value.to_be_bytes()),
            OutputType::Spi => platform
                .spi_send(event.device_index, &event.value.to_be_bytes()),
            OutputType::I2c => platform.i2c_write(
                event.device_index,
                (event.target_id & 0x7F) as u8,
                &event.value.to_be_bytes(),
            ),
            OutputType::Modbus => platform.modbus_write(
                event.device_index,
                event.target_id as u16,
                event.value as u16,
            ),
        };

        match sent {
            Ok(()) => stats.dispatched += 1,
            Err(error) => {
                log::warn!(
                    "dispatch: {:?} sink failed: {:?}",
                    event.kind,
                    error
                );
                stats.sink_failures += 1;
            }
        }
    }

    // Give every driver its chance to emit cyclic, heartbeat and emergency
    // traffic on the same clock.
    for driver in drivers.iter_mut() {
        let mut frames: heapless::Vec<CanFrame, MAX_CYCLIC_FRAMES> =
            heapless::Vec::new();
        driver.get_cyclic(now_us, &mut frames);
        for frame in frames.iter() {
            stats.cyclic_frames += 1;
            if let Err(error) = platform.can_send(0, frame) {
                log::warn!("dispatch: cyclic can send failed: {:?}", error);
                stats.sink_failures += 1;
            }
        }
    }

    stats
}

fn route_frame<P: Platform>(
    event: &OutputEvent,
    now_us: u64,
    platform: &mut P,
    drivers: &mut [&mut dyn ProtocolDriver],
    stats: &mut DispatchStats,
) -> Result<(), crate::platform::SinkError> {
    for driver in drivers.iter_mut() {
        if driver.kind() != event.kind {
            continue;
        }
        return match driver.encode(event.target_id, now_us) {
            Some(frame) => platform.can_send(event.device_index, &frame),
            None => {
                log::debug!(
                    "dispatch: no encode mapping for id {:#x}",
                    event.target_id
                );
                stats.unrouted += 1;
                Ok(())
            }
        };
    }

    // A plain CAN event without a driver carries its value directly.
    if event.kind == OutputType::Can {
        let frame =
            CanFrame::new(event.target_id, &event.value.to_be_bytes());
        return platform.can_send(event.device_index, &frame);
    }

    stats.unrouted += 1;
    Ok(())
}
