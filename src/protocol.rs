//! Packet framing for the attenuator's vendor command set.
//!
//! Every exchange is a single 64-byte packet out followed by a single
//! 64-byte packet in. Byte 0 carries the opcode; the device echoes it back
//! in byte 0 of the reply and places a NUL-terminated ASCII string after it.

use crate::error::{AttenuatorError, Result};

pub const PACKET_SIZE: usize = 64;

/// Room left for text once the opcode and terminator are accounted for.
pub const MAX_PAYLOAD_LEN: usize = PACKET_SIZE - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    GetModelName = 40,
    GetSerialNumber = 41,
    SendScpi = 42,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op as u8
    }
}

pub fn encode_command(opcode: Opcode, payload: &str) -> Result<[u8; PACKET_SIZE]> {
    if !payload.is_ascii() {
        return Err(AttenuatorError::NonAscii(payload.to_string()));
    }
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_PAYLOAD_LEN {
        return Err(AttenuatorError::PayloadTooLong(bytes.len()));
    }

    let mut packet = [0u8; PACKET_SIZE];
    packet[0] = opcode.into();
    packet[1..=bytes.len()].copy_from_slice(bytes);
    Ok(packet)
}

pub fn decode_response(packet: &[u8]) -> String {
    let Some(body) = packet.get(1..) else {
        return String::new();
    };
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}
