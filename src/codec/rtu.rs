//! Modbus RTU wire codec: `slave_id | PDU | CRC16`.
//!
//! The CRC implementation mirrors the teacher's `codec::rtu::calc_crc`
//! table-free bit-shift form exactly, including its polynomial and seed.

use crate::{
    codec::{self, Role},
    error::CodecError,
    frame::{self, Exception, Frame, FrameType, WordBuffer},
};

/// Minimum possible RTU frame: slave id + 1 byte fc + 2 byte CRC.
const MIN_FRAME_LEN: usize = 4;

/// Modbus CRC-16 (polynomial 0xA001, seed 0xFFFF).
#[must_use]
pub fn calc_crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn check_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    calc_crc16(body) == expected
}

/// Encodes a [`Frame`] as a complete RTU wire frame, appending the CRC.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if `frame` fails
/// [`frame::is_valid_frame`], or [`CodecError::UnsupportedFunction`] for an
/// unrecognised function code.
pub fn encode_rtu(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    if !frame::is_valid_frame(frame) {
        return Err(CodecError::InvalidFrame);
    }

    let mut out = Vec::with_capacity(frame.data.len() * 2 + 8);
    out.push(frame.slave_id);
    encode_pdu(frame, &mut out)?;

    let crc = calc_crc16(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

pub(crate) fn encode_pdu(frame: &Frame, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if frame.is_exception() {
        out.push(frame.fc | frame::EXCEPTION_BIT);
        out.push(frame.exception_code);
        return Ok(());
    }

    match (frame.frame_type, frame.fc) {
        (FrameType::Request, fc)
            if matches!(
                fc,
                frame::FC_READ_COILS
                    | frame::FC_READ_DISCRETE_INPUTS
                    | frame::FC_READ_HOLDING_REGISTERS
                    | frame::FC_READ_INPUT_REGISTERS
            ) =>
        {
            out.push(fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.reg_count.to_be_bytes());
        }
        (FrameType::Request, frame::FC_WRITE_SINGLE_COIL) => {
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&codec::coil_word_to_wire(frame.data[0]).to_be_bytes());
        }
        (FrameType::Request, frame::FC_WRITE_SINGLE_REGISTER) => {
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.data[0].to_be_bytes());
        }
        (FrameType::Request, frame::FC_WRITE_MULTIPLE_COILS) => {
            let bytes = codec::pack_coils(frame.data.as_slice());
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.reg_count.to_be_bytes());
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        (FrameType::Request, frame::FC_WRITE_MULTIPLE_REGISTERS) => {
            let bytes = codec::pack_registers(frame.data.as_slice());
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.reg_count.to_be_bytes());
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        (FrameType::Response, fc)
            if matches!(
                fc,
                frame::FC_READ_COILS | frame::FC_READ_DISCRETE_INPUTS
            ) =>
        {
            let bytes = codec::pack_coils(frame.data.as_slice());
            out.push(fc);
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        (FrameType::Response, fc)
            if matches!(
                fc,
                frame::FC_READ_HOLDING_REGISTERS | frame::FC_READ_INPUT_REGISTERS
            ) =>
        {
            let bytes = codec::pack_registers(frame.data.as_slice());
            out.push(fc);
            out.push(bytes.len() as u8);
            out.extend_from_slice(&bytes);
        }
        (FrameType::Response, frame::FC_WRITE_SINGLE_COIL) => {
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&codec::coil_word_to_wire(frame.data[0]).to_be_bytes());
        }
        (FrameType::Response, frame::FC_WRITE_SINGLE_REGISTER) => {
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.data[0].to_be_bytes());
        }
        (FrameType::Response, frame::FC_WRITE_MULTIPLE_COILS | frame::FC_WRITE_MULTIPLE_REGISTERS) => {
            out.push(frame.fc);
            out.extend_from_slice(&frame.reg_address.to_be_bytes());
            out.extend_from_slice(&frame.reg_count.to_be_bytes());
        }
        (_, fc) => return Err(CodecError::UnsupportedFunction(fc)),
    }
    Ok(())
}

/// Decodes a complete RTU wire frame (already delimited by the Interface's
/// silence-time framing) into a [`Frame`], for the given `role`: a Client
/// decodes responses, a Server decodes requests.
///
/// # Errors
///
/// Returns [`CodecError::TooShort`] if the buffer cannot hold a minimal
/// frame, [`CodecError::CrcMismatch`] on a failed CRC check, and
/// [`CodecError::UnsupportedFunction`]/[`CodecError::InvalidFrame`] for
/// malformed PDU contents.
pub fn decode_rtu(bytes: &[u8], role: Role) -> Result<Frame, CodecError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(CodecError::TooShort(bytes.len()));
    }
    if !check_crc(bytes) {
        return Err(CodecError::CrcMismatch);
    }

    let slave_id = bytes[0];
    let pdu = &bytes[1..bytes.len() - 2];
    let frame_type = role.decodes();
    let frame = decode_pdu(slave_id, frame_type, pdu)?;

    if !frame::is_valid_frame(&frame) {
        return Err(CodecError::InvalidFrame);
    }
    Ok(frame)
}

pub(crate) fn decode_pdu(slave_id: u8, frame_type: FrameType, pdu: &[u8]) -> Result<Frame, CodecError> {
    let &fc_byte = pdu.first().ok_or(CodecError::TooShort(0))?;
    let body = &pdu[1..];

    if fc_byte & frame::EXCEPTION_BIT != 0 {
        let fc = fc_byte & !frame::EXCEPTION_BIT;
        let &code = body.first().ok_or(CodecError::TooShort(pdu.len()))?;
        Exception::from_code(code).ok_or(CodecError::InvalidFrame)?;
        return Ok(Frame {
            frame_type: FrameType::Response,
            slave_id,
            fc,
            reg_address: 0,
            reg_count: 0,
            data: WordBuffer::new(),
            exception_code: code,
        });
    }

    let fc = fc_byte;
    match (frame_type, fc) {
        (FrameType::Request, _)
            if matches!(
                fc,
                frame::FC_READ_COILS
                    | frame::FC_READ_DISCRETE_INPUTS
                    | frame::FC_READ_HOLDING_REGISTERS
                    | frame::FC_READ_INPUT_REGISTERS
            ) =>
        {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let reg_count = u16::from_be_bytes([body[2], body[3]]);
            Ok(Frame::request(slave_id, fc, reg_address, reg_count))
        }
        (FrameType::Request, frame::FC_WRITE_SINGLE_COIL) => {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let wire = u16::from_be_bytes([body[2], body[3]]);
            let mut frame = Frame::request(slave_id, fc, reg_address, 1);
            frame.data.push(codec::wire_to_coil_word(wire));
            Ok(frame)
        }
        (FrameType::Request, frame::FC_WRITE_SINGLE_REGISTER) => {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let value = u16::from_be_bytes([body[2], body[3]]);
            let mut frame = Frame::request(slave_id, fc, reg_address, 1);
            frame.data.push(value);
            Ok(frame)
        }
        (FrameType::Request, frame::FC_WRITE_MULTIPLE_COILS) => {
            require_len(body, 5)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let reg_count = u16::from_be_bytes([body[2], body[3]]);
            let byte_count = body[4] as usize;
            let data = &body[5..];
            require_len(data, byte_count)?;
            let mut frame = Frame::request(slave_id, fc, reg_address, reg_count);
            frame.data = codec::unpack_coils(&data[..byte_count], reg_count as usize);
            Ok(frame)
        }
        (FrameType::Request, frame::FC_WRITE_MULTIPLE_REGISTERS) => {
            require_len(body, 5)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let reg_count = u16::from_be_bytes([body[2], body[3]]);
            let byte_count = body[4] as usize;
            let data = &body[5..];
            require_len(data, byte_count)?;
            let mut frame = Frame::request(slave_id, fc, reg_address, reg_count);
            frame.data = codec::unpack_registers(&data[..byte_count]);
            Ok(frame)
        }
        (FrameType::Response, frame::FC_READ_COILS | frame::FC_READ_DISCRETE_INPUTS) => {
            require_len(body, 1)?;
            let byte_count = body[0] as usize;
            let data = &body[1..];
            require_len(data, byte_count)?;
            let reg_count = (byte_count * 8) as u16;
            let mut frame = Frame::response(slave_id, fc, 0, reg_count);
            frame.data = codec::unpack_coils(&data[..byte_count], reg_count as usize);
            Ok(frame)
        }
        (FrameType::Response, frame::FC_READ_HOLDING_REGISTERS | frame::FC_READ_INPUT_REGISTERS) => {
            require_len(body, 1)?;
            let byte_count = body[0] as usize;
            let data = &body[1..];
            require_len(data, byte_count)?;
            let mut frame = Frame::response(slave_id, fc, 0, (byte_count / 2) as u16);
            frame.data = codec::unpack_registers(&data[..byte_count]);
            Ok(frame)
        }
        (FrameType::Response, frame::FC_WRITE_SINGLE_COIL) => {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            Ok(Frame::response(slave_id, fc, reg_address, 1))
        }
        (FrameType::Response, frame::FC_WRITE_SINGLE_REGISTER) => {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            Ok(Frame::response(slave_id, fc, reg_address, 1))
        }
        (FrameType::Response, frame::FC_WRITE_MULTIPLE_COILS | frame::FC_WRITE_MULTIPLE_REGISTERS) => {
            require_len(body, 4)?;
            let reg_address = u16::from_be_bytes([body[0], body[1]]);
            let reg_count = u16::from_be_bytes([body[2], body[3]]);
            Ok(Frame::response(slave_id, fc, reg_address, reg_count))
        }
        (_, fc) => Err(CodecError::UnsupportedFunction(fc)),
    }
}

fn require_len(buf: &[u8], min: usize) -> Result<(), CodecError> {
    if buf.len() < min {
        Err(CodecError::TooShort(buf.len()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_crc() {
        assert_eq!(calc_crc16(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0xB663);
        assert_eq!(
            calc_crc16(&[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00]),
            0xFBF9
        );
    }

    #[test]
    fn scenario_read_single_holding_register() {
        let req_bytes = [0x01, 0x03, 0x00, 0x64, 0x00, 0x01];
        let crc = calc_crc16(&req_bytes);
        let mut wire = req_bytes.to_vec();
        wire.extend_from_slice(&crc.to_le_bytes());

        let req = decode_rtu(&wire, Role::Server).unwrap();
        assert_eq!(req.slave_id, 1);
        assert_eq!(req.fc, frame::FC_READ_HOLDING_REGISTERS);
        assert_eq!(req.reg_address, 100);
        assert_eq!(req.reg_count, 1);

        let mut rsp = Frame::response(1, frame::FC_READ_HOLDING_REGISTERS, 100, 1);
        rsp.data.push(1000);
        let encoded = encode_rtu(&rsp).unwrap();
        assert_eq!(encoded, vec![0x01, 0x03, 0x02, 0x03, 0xE8, 0xB8, 0xFA]);

        let decoded = decode_rtu(&encoded, Role::Client).unwrap();
        assert_eq!(decoded.data.as_slice(), &[1000]);
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(
            decode_rtu(&[0x01, 0x03, 0x00], Role::Server),
            Err(CodecError::TooShort(_))
        ));
    }

    #[test]
    fn rejects_bit_flip() {
        let req_bytes = [0x01, 0x03, 0x00, 0x64, 0x00, 0x01];
        let crc = calc_crc16(&req_bytes);
        let mut wire = req_bytes.to_vec();
        wire.extend_from_slice(&crc.to_le_bytes());
        wire[2] ^= 0x01;
        assert!(matches!(
            decode_rtu(&wire, Role::Server),
            Err(CodecError::CrcMismatch)
        ));
    }
}
