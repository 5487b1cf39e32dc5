//! The Modbus logical frame: a function code, an address/count pair and an
//! inline data buffer, shared by the RTU and TCP codecs and by every
//! application role (Client, Server, Bridge).

use std::fmt;

/// A Modbus function code.
pub type FunctionCode = u8;

pub const FC_READ_COILS: FunctionCode = 0x01;
pub const FC_READ_DISCRETE_INPUTS: FunctionCode = 0x02;
pub const FC_READ_HOLDING_REGISTERS: FunctionCode = 0x03;
pub const FC_READ_INPUT_REGISTERS: FunctionCode = 0x04;
pub const FC_WRITE_SINGLE_COIL: FunctionCode = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: FunctionCode = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: FunctionCode = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: FunctionCode = 0x10;

/// Bit set in the function code of an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

pub const MAX_REGISTER_READ_COUNT: u16 = 125;
pub const MAX_REGISTER_WRITE_COUNT: u16 = 123;
pub const MAX_COIL_READ_COUNT: u16 = 2000;
pub const MAX_COIL_WRITE_COUNT: u16 = 1968;

/// Maximum number of 16 bit words carried inline by a [`Frame`].
pub const MAX_WORDS: usize = 125;

/// Whether a [`Frame`] represents a request from a Client or a response
/// from a Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Request,
    Response,
}

/// A Server (slave) exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    SlaveDeviceBusy = 0x06,
    GatewayTargetFailedToRespond = 0x0B,
}

impl Exception {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::GatewayTargetFailedToRespond => "gateway target failed to respond",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for Exception {}

/// A fixed-capacity, inline container of up to [`MAX_WORDS`] 16 bit words.
///
/// Realises the "fixed-capacity container with a `len` field" design note:
/// no heap allocation is used to carry frame payloads.
#[derive(Debug, Clone, Copy)]
pub struct WordBuffer {
    words: [u16; MAX_WORDS],
    len: usize,
}

impl WordBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; MAX_WORDS],
            len: 0,
        }
    }

    #[must_use]
    pub fn from_slice(words: &[u16]) -> Self {
        let mut buf = Self::new();
        for &w in words {
            buf.push(w);
        }
        buf
    }

    /// Appends a word. Silently drops words beyond [`MAX_WORDS`]; callers
    /// are expected to have validated `reg_count` against the per-fc limit
    /// before filling the buffer.
    pub fn push(&mut self, word: u16) {
        if self.len < MAX_WORDS {
            self.words[self.len] = word;
            self.len += 1;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.words[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for WordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for WordBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for WordBuffer {}

impl std::ops::Index<usize> for WordBuffer {
    type Output = u16;

    fn index(&self, idx: usize) -> &u16 {
        &self.as_slice()[idx]
    }
}

impl<'a> IntoIterator for &'a WordBuffer {
    type Item = &'a u16;
    type IntoIter = std::slice::Iter<'a, u16>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

/// The logical Modbus PDU plus addressing, shared between the RTU and TCP
/// codecs and every application role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub slave_id: u8,
    pub fc: FunctionCode,
    pub reg_address: u16,
    pub reg_count: u16,
    pub data: WordBuffer,
    /// `0` means no exception; otherwise one of the [`Exception`] codes.
    pub exception_code: u8,
}

impl Frame {
    #[must_use]
    pub fn request(slave_id: u8, fc: FunctionCode, reg_address: u16, reg_count: u16) -> Self {
        Self {
            frame_type: FrameType::Request,
            slave_id,
            fc,
            reg_address,
            reg_count,
            data: WordBuffer::new(),
            exception_code: 0,
        }
    }

    #[must_use]
    pub fn response(slave_id: u8, fc: FunctionCode, reg_address: u16, reg_count: u16) -> Self {
        Self {
            frame_type: FrameType::Response,
            slave_id,
            fc,
            reg_address,
            reg_count,
            data: WordBuffer::new(),
            exception_code: 0,
        }
    }

    #[must_use]
    pub fn exception_response(slave_id: u8, fc: FunctionCode, exception: Exception) -> Self {
        Self {
            frame_type: FrameType::Response,
            slave_id,
            fc,
            reg_address: 0,
            reg_count: 0,
            data: WordBuffer::new(),
            exception_code: exception.code(),
        }
    }

    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.exception_code != 0
    }

    #[must_use]
    pub fn exception(&self) -> Option<Exception> {
        Exception::from_code(self.exception_code)
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.slave_id == 0
    }
}

#[must_use]
pub fn is_supported_fc(fc: FunctionCode) -> bool {
    matches!(
        fc,
        FC_READ_COILS
            | FC_READ_DISCRETE_INPUTS
            | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS
            | FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER
            | FC_WRITE_MULTIPLE_COILS
            | FC_WRITE_MULTIPLE_REGISTERS
    )
}

#[must_use]
pub fn is_write_fc(fc: FunctionCode) -> bool {
    matches!(
        fc,
        FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER
            | FC_WRITE_MULTIPLE_COILS
            | FC_WRITE_MULTIPLE_REGISTERS
    )
}

#[must_use]
pub fn is_coil_fc(fc: FunctionCode) -> bool {
    matches!(
        fc,
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_WRITE_SINGLE_COIL | FC_WRITE_MULTIPLE_COILS
    )
}

/// The maximum `reg_count` permitted for a given function code, or `None`
/// for an unsupported function code.
#[must_use]
pub fn max_reg_count(fc: FunctionCode) -> Option<u16> {
    match fc {
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => Some(MAX_REGISTER_READ_COUNT),
        FC_WRITE_MULTIPLE_REGISTERS => Some(MAX_REGISTER_WRITE_COUNT),
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS => Some(MAX_COIL_READ_COUNT),
        FC_WRITE_MULTIPLE_COILS => Some(MAX_COIL_WRITE_COUNT),
        FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => Some(1),
        _ => None,
    }
}

/// Shared validation enforced at the codec boundary for both wire formats:
/// supported fc, `reg_count` within the per-fc limit, broadcast only valid
/// for write requests, exception codes only on responses, and payload
/// length consistent with `fc`/`reg_count`.
#[must_use]
pub fn is_valid_frame(frame: &Frame) -> bool {
    if !is_supported_fc(frame.fc) {
        return false;
    }

    if frame.frame_type == FrameType::Response && frame.is_exception() {
        return frame.data.is_empty() && frame.exception().is_some();
    }

    if frame.is_broadcast() && (frame.frame_type != FrameType::Request || !is_write_fc(frame.fc))
    {
        return false;
    }

    let Some(max_count) = max_reg_count(frame.fc) else {
        return false;
    };
    if frame.reg_count == 0 || frame.reg_count > max_count {
        return false;
    }

    match frame.frame_type {
        FrameType::Request => match frame.fc {
            FC_READ_COILS
            | FC_READ_DISCRETE_INPUTS
            | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS => frame.data.is_empty(),
            FC_WRITE_SINGLE_COIL | FC_WRITE_SINGLE_REGISTER => frame.data.len() == 1,
            FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
                frame.data.len() == frame.reg_count as usize
            }
            _ => unreachable!(),
        },
        FrameType::Response => match frame.fc {
            FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS => frame.data.len() == frame.reg_count as usize,
            FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER
            | FC_WRITE_MULTIPLE_COILS
            | FC_WRITE_MULTIPLE_REGISTERS => frame.data.is_empty(),
            _ => unreachable!(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_buffer_round_trips() {
        let buf = WordBuffer::from_slice(&[1, 2, 3]);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn valid_read_request() {
        let req = Frame::request(1, FC_READ_HOLDING_REGISTERS, 100, 1);
        assert!(is_valid_frame(&req));
    }

    #[test]
    fn rejects_register_read_over_limit() {
        let within_limit = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 125);
        assert!(is_valid_frame(&within_limit));

        let over_limit = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 126);
        assert!(!is_valid_frame(&over_limit));
    }

    #[test]
    fn rejects_zero_count() {
        let req = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 0);
        assert!(!is_valid_frame(&req));
    }

    #[test]
    fn broadcast_only_valid_for_write_requests() {
        let write = Frame::request(0, FC_WRITE_SINGLE_REGISTER, 0, 1);
        let mut write = write;
        write.data.push(42);
        assert!(is_valid_frame(&write));

        let read = Frame::request(0, FC_READ_HOLDING_REGISTERS, 0, 1);
        assert!(!is_valid_frame(&read));
    }

    #[test]
    fn exception_response_has_no_data() {
        let rsp = Frame::exception_response(1, FC_READ_HOLDING_REGISTERS, Exception::IllegalDataAddress);
        assert!(is_valid_frame(&rsp));
        assert!(rsp.data.is_empty());
    }
}
