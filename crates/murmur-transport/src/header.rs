//! Frame header.
//!
//! Four plaintext bytes, sealed on their own before the payload:
//!
//! ```text
//! 0-1  payload length (u16, big-endian)
//! 2    flags
//! 3    reserved, must be zero
//! ```

use crate::{FRAME_HEADER_LENGTH, error::TransportError};

/// Frame flag bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Last frame of the connection
    pub const FINAL: u8 = 0b0000_0001;

    const KNOWN: u8 = Self::FINAL;

    /// No flags set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Flags with FINAL set.
    pub const fn final_frame() -> Self {
        Self(Self::FINAL)
    }

    /// Parse a flag byte, rejecting unknown bits.
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte & !Self::KNOWN == 0 { Some(Self(byte)) } else { None }
    }

    /// Raw flag byte.
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// True if FINAL is set.
    pub fn is_final(self) -> bool {
        self.0 & Self::FINAL != 0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes (MAC excluded)
    pub payload_length: u16,
    /// Frame flags
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Header for a payload of `payload_length` bytes.
    pub fn new(payload_length: u16, final_frame: bool) -> Self {
        let flags = if final_frame { FrameFlags::final_frame() } else { FrameFlags::empty() };
        Self { payload_length, flags }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> [u8; FRAME_HEADER_LENGTH] {
        let len = self.payload_length.to_be_bytes();
        [len[0], len[1], self.flags.to_byte(), 0]
    }

    /// Parse wire bytes.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader`: wrong length, unknown flag bits, or non-zero
    ///   reserved byte
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let bytes: [u8; FRAME_HEADER_LENGTH] =
            bytes.try_into().map_err(|_| TransportError::MalformedHeader)?;

        if bytes[3] != 0 {
            return Err(TransportError::MalformedHeader);
        }
        let flags = FrameFlags::from_byte(bytes[2]).ok_or(TransportError::MalformedHeader)?;

        Ok(Self { payload_length: u16::from_be_bytes([bytes[0], bytes[1]]), flags })
    }

    /// True if this is the last frame of the connection.
    pub fn is_final(&self) -> bool {
        self.flags.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(FrameHeader::new(0x0102, true).encode(), [0x01, 0x02, 0x01, 0x00]);
        assert_eq!(FrameHeader::new(7, false).encode(), [0x00, 0x07, 0x00, 0x00]);
    }

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::new(1234, true);
        let decoded = FrameHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_final());
    }

    #[test]
    fn unknown_flags_rejected() {
        assert_eq!(FrameHeader::decode(&[0, 1, 0x02, 0]), Err(TransportError::MalformedHeader));
        assert_eq!(FrameFlags::from_byte(0x80), None);
    }

    #[test]
    fn reserved_byte_must_be_zero() {
        assert_eq!(FrameHeader::decode(&[0, 1, 0, 1]), Err(TransportError::MalformedHeader));
    }

    #[test]
    fn wrong_length_rejected() {
        assert_eq!(FrameHeader::decode(&[0, 1, 0]), Err(TransportError::MalformedHeader));
    }
}
