//! Platform abstraction.
//!
//! # Design
//! The engine core never touches a peripheral: everything hardware-shaped is
//! reached through the [Platform] trait, supplied by the integrator at
//! construction of the dispatcher. Production code implements it on top of
//! the real HAL; tests inject [RecordingPlatform]. Every sink is best-effort
//! and non-blocking: a failing sink is logged and counted, never retried and
//! never allowed to stall the engine.
//!
//! Logging goes through the `log` facade; the host installs whatever logger
//! fits the target.

pub mod dispatch;

use crate::protocol::CanFrame;

/// Why a sink rejected an output. Purely diagnostic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The peripheral could not accept the request right now.
    Busy,
    /// The peripheral reported a hard fault.
    Fault,
    /// No such peripheral instance on this platform.
    Unsupported,
}

/// The hardware services consumed by the dispatcher.
///
/// All sinks take a device index selecting the peripheral instance.
pub trait Platform {
    /// Free-running monotonic microsecond clock.
    fn now_us(&self) -> u64;

    fn gpio_set(&mut self, index: u8, state: bool) -> Result<(), SinkError>;
    fn pwm_set(&mut self, index: u8, duty: i32) -> Result<(), SinkError>;
    fn dac_write(&mut self, index: u8, value: i32) -> Result<(), SinkError>;
    fn uart_send(&mut self, index: u8, data: &[u8]) -> Result<(), SinkError>;
    fn spi_send(&mut self, index: u8, data: &[u8]) -> Result<(), SinkError>;
    fn i2c_write(
        &mut self,
        index: u8,
        address: u8,
        data: &[u8],
    ) -> Result<(), SinkError>;
    fn i2c_read(
        &mut self,
        index: u8,
        address: u8,
        buffer: &mut [u8],
    ) -> Result<(), SinkError>;
    fn can_send(&mut self, index: u8, frame: &CanFrame)
        -> Result<(), SinkError>;
    fn modbus_write(
        &mut self,
        index: u8,
        register: u16,
        value: u16,
    ) -> Result<(), SinkError>;
}

/// One recorded sink call, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Gpio { index: u8, state: bool },
    Pwm { index: u8, duty: i32 },
    Dac { index: u8, value: i32 },
    Uart { index: u8, data: heapless::Vec<u8, 8> },
    Spi { index: u8, data: heapless::Vec<u8, 8> },
    I2c { index: u8, address: u8, data: heapless::Vec<u8, 8> },
    Can { index: u8, frame: CanFrame },
    Modbus { index: u8, register: u16, value: u16 },
}

/// Capture the head of a payload for the recording buffer.
fn recorded_bytes(data: &[u8]) -> heapless::Vec<u8, 8> {
    // Note(unwrap): the slice is clipped to the vector capacity.
    heapless::Vec::from_slice(&data[..data.len().min(8)]).unwrap()
}

/// A platform double that records every sink call.
///
/// `fail_sinks` makes every sink return [SinkError::Fault] while still
/// recording the call, for exercising the failure accounting.
#[derive(Default)]
pub struct RecordingPlatform {
    pub now_us: u64,
    pub fail_sinks: bool,
    pub calls: heapless::Vec<SinkCall, 64>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, call: SinkCall) -> Result<(), SinkError> {
        // Note(unwrap): tests that overflow the recording buffer are broken
        // tests; 64 calls is far beyond any scenario here.
        self.calls.push(call).unwrap();
        if self.fail_sinks {
            Err(SinkError::Fault)
        } else {
            Ok(())
        }
    }
}

impl Platform for RecordingPlatform {
    fn now_us(&self) -> u64 {
        self.now_us
    }

    fn gpio_set(&mut self, index: u8, state: bool) -> Result<(), SinkError> {
        self.record(SinkCall::Gpio { index, state })
    }

    fn pwm_set(&mut self, index: u8, duty: i32) -> Result<(), SinkError> {
        self.record(SinkCall::Pwm { index, duty })
    }

    fn dac_write(&mut self, index: u8, value: i32) -> Result<(), SinkError> {
        self.record(SinkCall::Dac { index, value })
    }

    fn uart_send(&mut self, index: u8, data: &[u8]) -> Result<(), SinkError> {
        self.record(SinkCall::Uart {
            index,
            data: recorded_bytes(data),
        })
    }

    fn spi_send(&mut self, index: u8, data: &[u8]) -> Result<(), SinkError> {
        self.record(SinkCall::Spi {
            index,
            data: recorded_bytes(data),
        })
    }

    fn i2c_write(
        &mut self,
        index: u8,
        address: u8,
        data: &[u8],
    ) -> Result<(), SinkError> {
        self.record(SinkCall::I2c {
            index,
            address,
            data: recorded_bytes(data),
        })
    }

    fn i2c_read(
        &mut self,
        _index: u8,
        _address: u8,
        buffer: &mut [u8],
    ) -> Result<(), SinkError> {
        buffer.fill(0);
        if self.fail_sinks {
            Err(SinkError::Fault)
        } else {
            Ok(())
        }
    }

    fn can_send(
        &mut self,
        index: u8,
        frame: &CanFrame,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Can {
            index,
            frame: *frame,
        })
    }

    fn modbus_write(
        &mut self,
        index: u8,
        register: u16,
        value: u16,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Modbus {
            index,
            register,
            value,
        })
    }
}
