//! Frame construction and the OneWire CRC-8.

use crate::constants::{
    FRAME_FILLER, FRAME_HEADER_PAD, FRAME_MARKER, FRAME_PAYLOAD_SIZE, FRAME_SIZE,
};
use crate::error::LhyError;

/// One 34-byte transmission unit: marker, header pad, 30 payload slots
/// (filler-padded), marker, CRC-8 over bytes 1..=31. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    pub fn build(payload: &[u8]) -> Result<Frame, LhyError> {
        if payload.len() > FRAME_PAYLOAD_SIZE {
            return Err(LhyError::Protocol(format!(
                "payload of {} bytes exceeds the {FRAME_PAYLOAD_SIZE}-byte frame capacity",
                payload.len()
            )));
        }
        let mut bytes = [FRAME_FILLER; FRAME_SIZE];
        bytes[0] = FRAME_MARKER;
        bytes[1] = FRAME_HEADER_PAD;
        bytes[2..2 + payload.len()].copy_from_slice(payload);
        bytes[FRAME_SIZE - 2] = FRAME_MARKER;
        bytes[FRAME_SIZE - 1] = crc8(&bytes[1..FRAME_SIZE - 2]);
        Ok(Frame { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }

    pub fn crc(&self) -> u8 {
        self.bytes[FRAME_SIZE - 1]
    }
}

/// CRC-8, LSB-first, polynomial 0x8C (Dallas/Maxim OneWire).
///
/// This exact bit order is load-bearing: the controller computes the same
/// sum on its side, and any variant CRC-8 desynchronizes with hardware.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 1;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}
