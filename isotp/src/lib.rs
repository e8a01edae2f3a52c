//! ISO 15765-2 (ISO-TP) transport layer state machine for CAN.
//!
//! # Design
//! The transport machine is a pure state machine on the caller's monotonic
//! clock: it never talks to a CAN controller itself. Inbound frames are fed
//! through [IsoTp::on_frame], outbound frames are pulled from
//! [IsoTp::periodic] (and from the flow-control responses returned by
//! [IsoTp::on_frame]); the caller owns the wire. All storage is borrowed from
//! the caller at construction so the machine is free of allocation.
//!
//! Both transfer directions run independently, so a request/response protocol
//! such as UDS can be serviced full duplex on one id pair.
#![cfg_attr(not(test), no_std)]

use num_enum::TryFromPrimitive;

/// Longest message a first frame can announce (12-bit length field).
pub const MAX_MESSAGE_LEN: usize = 4095;

/// Payload bytes carried by a first frame alongside the length.
const FF_PAYLOAD: usize = 6;

/// Payload bytes carried by each consecutive frame.
const CF_PAYLOAD: usize = 7;

/// A classic CAN frame as exchanged with the transport machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
}

impl Frame {
    /// Build a frame from a payload slice, optionally padded to 8 bytes.
    ///
    /// # Args
    /// * `id` - The arbitration id to send with.
    /// * `payload` - The PCI byte(s) and data. Must be 8 bytes or fewer.
    /// * `padding` - Fill byte for the unused tail, if frame padding is on.
    fn assemble(id: u32, payload: &[u8], padding: Option<u8>) -> Self {
        let mut data = [padding.unwrap_or(0); 8];
        data[..payload.len()].copy_from_slice(payload);
        let len = match padding {
            Some(_) => 8,
            None => payload.len() as u8,
        };
        Frame { id, data, len }
    }
}

/// Protocol control information, encoded in the high nibble of byte 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum Pci {
    Single = 0x0,
    First = 0x1,
    Consecutive = 0x2,
    FlowControl = 0x3,
}

/// Flow status values carried in the low nibble of a flow control frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FlowStatus {
    ContinueToSend = 0x0,
    Wait = 0x1,
    Overflow = 0x2,
}

/// The protocol timer that expired when a timeout error is surfaced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeoutKind {
    /// A due frame could not be put on the wire in time.
    NAs,
    /// The peer did not answer a first frame or block with flow control.
    NBs,
    /// The peer stalled between consecutive frames.
    NCr,
}

/// Errors surfaced by the transport machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// A transmission is already in progress.
    Busy,
    /// The payload is empty, or longer than the tx buffer or 4095 bytes.
    Bounds,
    /// The peer rejected our first frame with a flow status of overflow.
    Overflow,
    /// A protocol-violating frame forced an abort.
    Malformed,
    /// A protocol timer expired; the affected direction was reset.
    Timeout(TimeoutKind),
}

/// Static transport parameters.
///
/// `block_size` and `st_min` are what we advertise to the peer in our flow
/// control frames; the pacing of our own consecutive frames is dictated by
/// the values the peer advertises to us. `st_min` is the raw wire encoding
/// (see [st_min_to_us]).
#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub tx_id: u32,
    pub rx_id: u32,
    pub block_size: u8,
    pub st_min: u8,
    pub n_as_ms: u32,
    pub n_bs_ms: u32,
    pub n_cr_ms: u32,
    pub padding: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tx_id: 0,
            rx_id: 0,
            block_size: 0,
            st_min: 0,
            n_as_ms: 1000,
            n_bs_ms: 1000,
            n_cr_ms: 1000,
            padding: None,
        }
    }
}

/// Decode a raw STmin byte into microseconds.
///
/// 0x00..=0x7F encode whole milliseconds, 0xF1..=0xF9 encode 100..900 µs.
/// All reserved values degrade to no separation time.
pub fn st_min_to_us(raw: u8) -> u64 {
    match raw {
        0x00..=0x7F => raw as u64 * 1000,
        0xF1..=0xF9 => (raw as u64 - 0xF0) * 100,
        _ => 0,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RxState {
    Idle,
    Receiving,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxState {
    Idle,
    StartSingle,
    StartFirst,
    WaitFlowControl,
    Sending,
}

/// An ISO-TP endpoint over one CAN id pair.
///
/// Reception and transmission buffers are borrowed from the caller; their
/// lengths bound the largest message in each direction. A first frame that
/// announces more than the rx buffer holds is answered with a flow status of
/// overflow and dropped.
pub struct IsoTp<'b> {
    config: Config,
    rx_buf: &'b mut [u8],
    tx_buf: &'b mut [u8],

    rx_state: RxState,
    rx_len: usize,
    rx_expected: usize,
    rx_sn: u8,
    rx_block_count: u8,
    rx_deadline_us: u64,
    rx_ready: bool,

    tx_state: TxState,
    tx_len: usize,
    tx_offset: usize,
    tx_sn: u8,
    tx_bs: u8,
    tx_bs_sent: u8,
    tx_st_min_us: u64,
    tx_next_cf_us: u64,
    tx_deadline_us: u64,
}

impl<'b> IsoTp<'b> {
    /// Construct an endpoint.
    ///
    /// # Args
    /// * `config` - Transport parameters. Timeouts default to 1000 ms each.
    /// * `rx_buf` - Reassembly storage for inbound messages.
    /// * `tx_buf` - Segmentation storage for outbound messages.
    pub fn new(
        config: Config,
        rx_buf: &'b mut [u8],
        tx_buf: &'b mut [u8],
    ) -> Self {
        IsoTp {
            config,
            rx_buf,
            tx_buf,
            rx_state: RxState::Idle,
            rx_len: 0,
            rx_expected: 0,
            rx_sn: 0,
            rx_block_count: 0,
            rx_deadline_us: 0,
            rx_ready: false,
            tx_state: TxState::Idle,
            tx_len: 0,
            tx_offset: 0,
            tx_sn: 0,
            tx_bs: 0,
            tx_bs_sent: 0,
            tx_st_min_us: 0,
            tx_next_cf_us: 0,
            tx_deadline_us: 0,
        }
    }

    /// Queue a message for transmission.
    ///
    /// Messages of up to 7 bytes go out as a single frame; anything longer is
    /// segmented into a first frame plus consecutive frames paced by the
    /// peer's flow control. Frames are emitted by subsequent [Self::periodic]
    /// calls.
    ///
    /// # Args
    /// * `data` - The message payload.
    /// * `now_us` - The current monotonic time.
    pub fn send(&mut self, data: &[u8], _now_us: u64) -> Result<(), Error> {
        if self.tx_state != TxState::Idle {
            return Err(Error::Busy);
        }
        if data.is_empty()
            || data.len() > self.tx_buf.len()
            || data.len() > MAX_MESSAGE_LEN
        {
            return Err(Error::Bounds);
        }

        self.tx_buf[..data.len()].copy_from_slice(data);
        self.tx_len = data.len();
        self.tx_offset = 0;
        self.tx_state = if data.len() <= CF_PAYLOAD {
            TxState::StartSingle
        } else {
            TxState::StartFirst
        };
        Ok(())
    }

    /// Feed an inbound frame into the machine.
    ///
    /// # Returns
    /// A flow control frame to put on the wire, if the inbound frame demands
    /// an immediate response.
    pub fn on_frame(
        &mut self,
        frame: &Frame,
        now_us: u64,
    ) -> Result<Option<Frame>, Error> {
        if frame.id != self.config.rx_id || frame.len == 0 {
            return Ok(None);
        }

        let pci = match Pci::try_from(frame.data[0] >> 4) {
            Ok(pci) => pci,
            // Reserved PCI type: not ISO-TP traffic, ignore.
            Err(_) => return Ok(None),
        };

        match pci {
            Pci::Single => self.on_single(frame),
            Pci::First => self.on_first(frame, now_us),
            Pci::Consecutive => self.on_consecutive(frame, now_us),
            Pci::FlowControl => self.on_flow_control(frame, now_us),
        }
    }

    /// Run the protocol timers and pull the next outbound frame.
    ///
    /// Must be called on a cadence comfortably shorter than the configured
    /// timeouts. A timeout error resets the affected direction; the other
    /// direction is untouched.
    ///
    /// # Args
    /// * `now_us` - The current monotonic time.
    ///
    /// # Returns
    /// The next frame to put on the wire, if one is due.
    pub fn periodic(&mut self, now_us: u64) -> Result<Option<Frame>, Error> {
        if self.rx_state == RxState::Receiving && now_us > self.rx_deadline_us
        {
            self.reset_rx();
            return Err(Error::Timeout(TimeoutKind::NCr));
        }

        match self.tx_state {
            TxState::Idle => Ok(None),
            TxState::StartSingle => {
                let mut payload = [0u8; 8];
                payload[0] = self.tx_len as u8;
                payload[1..1 + self.tx_len]
                    .copy_from_slice(&self.tx_buf[..self.tx_len]);
                self.tx_state = TxState::Idle;
                Ok(Some(Frame::assemble(
                    self.config.tx_id,
                    &payload[..1 + self.tx_len],
                    self.config.padding,
                )))
            }
            TxState::StartFirst => {
                let mut payload = [0u8; 8];
                payload[0] = 0x10 | ((self.tx_len >> 8) as u8 & 0x0F);
                payload[1] = self.tx_len as u8;
                payload[2..].copy_from_slice(&self.tx_buf[..FF_PAYLOAD]);
                self.tx_offset = FF_PAYLOAD;
                self.tx_sn = 1;
                self.tx_state = TxState::WaitFlowControl;
                self.tx_deadline_us =
                    now_us + self.config.n_bs_ms as u64 * 1000;
                Ok(Some(Frame::assemble(
                    self.config.tx_id,
                    &payload,
                    self.config.padding,
                )))
            }
            TxState::WaitFlowControl => {
                if now_us > self.tx_deadline_us {
                    self.reset_tx();
                    Err(Error::Timeout(TimeoutKind::NBs))
                } else {
                    Ok(None)
                }
            }
            TxState::Sending => {
                if now_us < self.tx_next_cf_us {
                    return Ok(None);
                }
                if now_us
                    > self.tx_next_cf_us + self.config.n_as_ms as u64 * 1000
                {
                    self.reset_tx();
                    return Err(Error::Timeout(TimeoutKind::NAs));
                }
                Ok(Some(self.next_consecutive(now_us)))
            }
        }
    }

    /// True when no transmission is queued or in flight.
    pub fn tx_done(&self) -> bool {
        self.tx_state == TxState::Idle
    }

    /// The completed inbound message, until the consumer acknowledges it.
    pub fn rx_available(&self) -> Option<&[u8]> {
        if self.rx_ready {
            Some(&self.rx_buf[..self.rx_len])
        } else {
            None
        }
    }

    /// Release the reassembly buffer for the next inbound message.
    pub fn rx_ack(&mut self) {
        self.rx_ready = false;
        self.rx_len = 0;
    }

    /// Abort both directions and drop any pending inbound message.
    pub fn abort(&mut self) {
        self.reset_rx();
        self.reset_tx();
        self.rx_ack();
    }

    fn on_single(&mut self, frame: &Frame) -> Result<Option<Frame>, Error> {
        // A new message start replaces any partial reception.
        self.reset_rx();
        if self.rx_ready {
            // The consumer has not drained the previous message yet.
            log::debug!("isotp: single frame dropped, rx not acknowledged");
            return Ok(None);
        }

        let len = (frame.data[0] & 0x0F) as usize;
        if len == 0 || len > CF_PAYLOAD || frame.len as usize - 1 < len {
            return Ok(None);
        }
        if len > self.rx_buf.len() {
            log::debug!("isotp: single frame exceeds rx buffer");
            return Ok(None);
        }

        self.rx_buf[..len].copy_from_slice(&frame.data[1..1 + len]);
        self.rx_len = len;
        self.rx_ready = true;
        Ok(None)
    }

    fn on_first(
        &mut self,
        frame: &Frame,
        now_us: u64,
    ) -> Result<Option<Frame>, Error> {
        self.reset_rx();
        if self.rx_ready {
            log::debug!("isotp: first frame dropped, rx not acknowledged");
            return Ok(None);
        }
        if frame.len < 8 {
            return Ok(None);
        }

        let expected =
            (((frame.data[0] & 0x0F) as usize) << 8) | frame.data[1] as usize;
        // Messages short enough for a single frame must not be segmented.
        if expected <= CF_PAYLOAD {
            return Ok(None);
        }
        if expected > self.rx_buf.len() {
            return Ok(Some(self.flow_control(FlowStatus::Overflow)));
        }

        self.rx_buf[..FF_PAYLOAD].copy_from_slice(&frame.data[2..8]);
        self.rx_len = FF_PAYLOAD;
        self.rx_expected = expected;
        self.rx_sn = 1;
        self.rx_block_count = 0;
        self.rx_state = RxState::Receiving;
        self.rx_deadline_us = now_us + self.config.n_cr_ms as u64 * 1000;
        Ok(Some(self.flow_control(FlowStatus::ContinueToSend)))
    }

    fn on_consecutive(
        &mut self,
        frame: &Frame,
        now_us: u64,
    ) -> Result<Option<Frame>, Error> {
        if self.rx_state != RxState::Receiving {
            return Ok(None);
        }

        let sn = frame.data[0] & 0x0F;
        if sn != self.rx_sn {
            // Out-of-order consecutive frame: abort reception silently.
            log::debug!("isotp: sequence error, got {} want {}", sn, self.rx_sn);
            self.reset_rx();
            return Ok(None);
        }

        let take = CF_PAYLOAD.min(self.rx_expected - self.rx_len);
        if (frame.len as usize) < 1 + take {
            self.reset_rx();
            return Ok(None);
        }

        self.rx_buf[self.rx_len..self.rx_len + take]
            .copy_from_slice(&frame.data[1..1 + take]);
        self.rx_len += take;
        self.rx_sn = (self.rx_sn + 1) & 0x0F;
        self.rx_deadline_us = now_us + self.config.n_cr_ms as u64 * 1000;

        if self.rx_len == self.rx_expected {
            self.rx_state = RxState::Idle;
            self.rx_ready = true;
            return Ok(None);
        }

        if self.config.block_size != 0 {
            self.rx_block_count += 1;
            if self.rx_block_count == self.config.block_size {
                self.rx_block_count = 0;
                return Ok(Some(self.flow_control(FlowStatus::ContinueToSend)));
            }
        }
        Ok(None)
    }

    fn on_flow_control(
        &mut self,
        frame: &Frame,
        now_us: u64,
    ) -> Result<Option<Frame>, Error> {
        if self.tx_state != TxState::WaitFlowControl || frame.len < 3 {
            return Ok(None);
        }

        match FlowStatus::try_from(frame.data[0] & 0x0F) {
            Ok(FlowStatus::ContinueToSend) => {
                self.tx_bs = frame.data[1];
                self.tx_bs_sent = 0;
                self.tx_st_min_us = st_min_to_us(frame.data[2]);
                self.tx_state = TxState::Sending;
                self.tx_next_cf_us = now_us;
                Ok(None)
            }
            Ok(FlowStatus::Wait) => {
                self.tx_deadline_us =
                    now_us + self.config.n_bs_ms as u64 * 1000;
                Ok(None)
            }
            Ok(FlowStatus::Overflow) => {
                self.reset_tx();
                Err(Error::Overflow)
            }
            Err(_) => {
                self.reset_tx();
                Err(Error::Malformed)
            }
        }
    }

    fn next_consecutive(&mut self, now_us: u64) -> Frame {
        let take = CF_PAYLOAD.min(self.tx_len - self.tx_offset);
        let mut payload = [0u8; 8];
        payload[0] = 0x20 | self.tx_sn;
        payload[1..1 + take]
            .copy_from_slice(&self.tx_buf[self.tx_offset..self.tx_offset + take]);

        self.tx_offset += take;
        self.tx_sn = (self.tx_sn + 1) & 0x0F;
        self.tx_next_cf_us = now_us + self.tx_st_min_us;

        if self.tx_offset == self.tx_len {
            self.reset_tx();
        } else if self.tx_bs != 0 {
            self.tx_bs_sent += 1;
            if self.tx_bs_sent == self.tx_bs {
                self.tx_bs_sent = 0;
                self.tx_state = TxState::WaitFlowControl;
                self.tx_deadline_us = now_us + self.config.n_bs_ms as u64 * 1000;
            }
        }

        Frame::assemble(
            self.config.tx_id,
            &payload[..1 + take],
            self.config.padding,
        )
    }

    fn flow_control(&self, status: FlowStatus) -> Frame {
        let payload = [
            0x30 | status as u8,
            self.config.block_size,
            self.config.st_min,
        ];
        Frame::assemble(self.config.tx_id, &payload, self.config.padding)
    }

    fn reset_rx(&mut self) {
        self.rx_state = RxState::Idle;
        self.rx_expected = 0;
        self.rx_sn = 0;
        self.rx_block_count = 0;
        // rx_len and rx_ready survive: they describe a completed message.
        if !self.rx_ready {
            self.rx_len = 0;
        }
    }

    fn reset_tx(&mut self) {
        self.tx_state = TxState::Idle;
        self.tx_len = 0;
        self.tx_offset = 0;
        self.tx_sn = 0;
        self.tx_bs = 0;
        self.tx_bs_sent = 0;
    }
}
