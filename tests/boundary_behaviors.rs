// SPDX-License-Identifier: MIT OR Apache-2.0

//! Boundary conditions on quantities and wire framing that the codecs and
//! frame validation must enforce exactly at their documented limits.

use modbus_core::{
    codec::{rtu, tcp, Role},
    error::CodecError,
    frame::{self, Frame, FC_READ_COILS, FC_READ_HOLDING_REGISTERS},
};

#[test]
fn register_read_count_125_is_valid_126_is_not() {
    let ok = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 125);
    assert!(frame::is_valid_frame(&ok));

    let over = Frame::request(1, FC_READ_HOLDING_REGISTERS, 0, 126);
    assert!(!frame::is_valid_frame(&over));
}

#[test]
fn coil_read_count_2000_is_valid_2001_is_not() {
    let ok = Frame::request(1, FC_READ_COILS, 0, 2000);
    assert!(frame::is_valid_frame(&ok));

    let over = Frame::request(1, FC_READ_COILS, 0, 2001);
    assert!(!frame::is_valid_frame(&over));
}

#[test]
fn zero_count_is_rejected_on_every_read_and_write_fc() {
    for fc in [
        frame::FC_READ_COILS,
        frame::FC_READ_DISCRETE_INPUTS,
        frame::FC_READ_HOLDING_REGISTERS,
        frame::FC_READ_INPUT_REGISTERS,
        frame::FC_WRITE_MULTIPLE_COILS,
        frame::FC_WRITE_MULTIPLE_REGISTERS,
    ] {
        let request = Frame::request(1, fc, 0, 0);
        assert!(!frame::is_valid_frame(&request), "fc {fc:#04x} should reject a zero count");
    }
}

#[test]
fn rtu_frames_of_three_bytes_or_fewer_are_rejected() {
    for len in 0..=3 {
        let bytes = vec![0u8; len];
        assert!(matches!(
            rtu::decode_rtu(&bytes, Role::Server),
            Err(CodecError::TooShort(_))
        ));
    }
}

#[test]
fn tcp_frames_with_nonzero_protocol_id_are_rejected() {
    let wire = vec![0x00, 0x01, 0x00, 0x02, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
    assert!(matches!(
        tcp::decode_tcp(&wire, Role::Server),
        Err(CodecError::InvalidProtocolId(2))
    ));
}
