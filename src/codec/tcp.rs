//! Modbus TCP wire codec: the MBAP header (`transaction_id | protocol_id |
//! length | unit_id`) wrapped around the same PDU grammar used by RTU.
//!
//! Grounded on the teacher's `codec::tcp::AduDecoder` length-prefixed
//! framing: read the 16 bit big-endian length at a fixed header offset,
//! decode once that many bytes are buffered, and allow trailing bytes to
//! start the next frame (pipelining).

use crate::{
    codec::{rtu, Role},
    error::CodecError,
    frame::{self, Frame},
};

pub const HEADER_LEN: usize = 7;
pub const PROTOCOL_ID: u16 = 0x0000;

/// A decoded TCP ADU: the MBAP envelope plus the enclosed [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpAdu {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub frame: Frame,
}

/// Encodes a [`Frame`] as a complete MBAP ADU.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if `frame` fails
/// [`frame::is_valid_frame`].
pub fn encode_tcp(transaction_id: u16, unit_id: u8, frame: &Frame) -> Result<Vec<u8>, CodecError> {
    if !frame::is_valid_frame(frame) {
        return Err(CodecError::InvalidFrame);
    }

    let mut pdu = Vec::with_capacity(frame.data.len() * 2 + 6);
    rtu::encode_pdu(frame, &mut pdu)?;

    let length = pdu.len() as u16 + 1;
    let mut out = Vec::with_capacity(HEADER_LEN + pdu.len());
    out.extend_from_slice(&transaction_id.to_be_bytes());
    out.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.push(unit_id);
    out.extend_from_slice(&pdu);
    Ok(out)
}

/// Attempts to decode one complete ADU from the front of `bytes`, for the
/// given `role`. Returns the decoded [`TcpAdu`] and the number of bytes it
/// consumed; any remaining bytes may start the next ADU (TCP permits
/// pipelining multiple requests per connection).
///
/// Returns `Ok(None)` if `bytes` does not yet contain a complete header or
/// a complete PDU, so the caller can wait for more bytes.
///
/// # Errors
///
/// [`CodecError::InvalidProtocolId`] if the protocol id field is nonzero,
/// or [`CodecError::LengthMismatch`]/decode errors for a malformed PDU. A
/// declared MBAP length that disagrees with the decoded PDU's own length is
/// treated as [`CodecError::LengthMismatch`], not silently tolerated.
pub fn decode_tcp(bytes: &[u8], role: Role) -> Result<Option<(TcpAdu, usize)>, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Ok(None);
    }

    let transaction_id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let protocol_id = u16::from_be_bytes([bytes[2], bytes[3]]);
    if protocol_id != PROTOCOL_ID {
        return Err(CodecError::InvalidProtocolId(protocol_id));
    }
    let length = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    if length == 0 {
        return Err(CodecError::InvalidFrame);
    }
    let unit_id = bytes[6];

    let total_len = HEADER_LEN - 1 + length;
    if bytes.len() < total_len {
        return Ok(None);
    }

    let pdu = &bytes[HEADER_LEN..total_len];
    let frame_type = role.decodes();
    let frame = rtu::decode_pdu(unit_id, frame_type, pdu)?;

    if pdu.len() + 1 != length {
        return Err(CodecError::LengthMismatch {
            declared: length,
            actual: pdu.len() + 1,
        });
    }

    if !frame::is_valid_frame(&frame) {
        return Err(CodecError::InvalidFrame);
    }

    Ok(Some((
        TcpAdu {
            transaction_id,
            unit_id,
            frame,
        },
        total_len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_write_multiple_registers() {
        let mut req = Frame::request(1, frame::FC_WRITE_MULTIPLE_REGISTERS, 400, 2);
        req.data.push(225);
        req.data.push(450);
        let wire = encode_tcp(0x0102, 1, &req).unwrap();
        assert_eq!(
            wire,
            vec![
                0x01, 0x02, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x01, 0x90, 0x00, 0x02, 0x04,
                0x00, 0xE1, 0x01, 0xC2
            ]
        );

        let (adu, consumed) = decode_tcp(&wire, Role::Server).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(adu.transaction_id, 0x0102);
        assert_eq!(adu.unit_id, 1);
        assert_eq!(adu.frame.reg_address, 400);
        assert_eq!(adu.frame.data.as_slice(), &[225, 450]);

        let rsp = Frame::response(1, frame::FC_WRITE_MULTIPLE_REGISTERS, 400, 2);
        let rsp_wire = encode_tcp(0x0102, 1, &rsp).unwrap();
        assert_eq!(
            rsp_wire,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x01, 0x90, 0x00, 0x02]
        );
    }

    #[test]
    fn rejects_nonzero_protocol_id() {
        let mut bytes = vec![0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03];
        bytes.truncate(8);
        assert!(matches!(
            decode_tcp(&bytes, Role::Server),
            Err(CodecError::InvalidProtocolId(1))
        ));
    }

    #[test]
    fn waits_for_more_bytes() {
        let header_only = [0x00u8, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01];
        assert!(decode_tcp(&header_only, Role::Server).unwrap().is_none());
    }

    #[test]
    fn pipelines_trailing_bytes() {
        let req = Frame::request(1, frame::FC_READ_HOLDING_REGISTERS, 0, 1);
        let one = encode_tcp(1, 1, &req).unwrap();
        let two = encode_tcp(2, 1, &req).unwrap();
        let mut both = one.clone();
        both.extend_from_slice(&two);

        let (first, consumed) = decode_tcp(&both, Role::Server).unwrap().unwrap();
        assert_eq!(consumed, one.len());
        assert_eq!(first.transaction_id, 1);

        let (second, consumed2) = decode_tcp(&both[consumed..], Role::Server).unwrap().unwrap();
        assert_eq!(consumed2, two.len());
        assert_eq!(second.transaction_id, 2);
    }
}
