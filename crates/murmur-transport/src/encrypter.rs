//! Encrypt side of a connection.
//!
//! Writes the tag lazily with the first frame, then one sealed header and one
//! sealed payload per frame. Every write is charged against the capacity the
//! transport advertised, and the full cost of a frame is checked before any
//! byte of it is emitted.

use std::io::Write;

use murmur_crypto::{
    AuthenticatedCipher, FrameIvKind, Role, SecretKey, TAG_LENGTH, derive_frame_key,
    derive_tag_key, encode_frame_iv, encode_tag,
};
use tracing::debug;

use crate::{
    FRAME_OVERHEAD, MAX_FRAME_NUMBER, effective_frame_length, error::TransportError,
    header::FrameHeader,
};

/// Frame writer bound to one stream of one direction.
///
/// # Invariants
///
/// - The tag precedes the first frame and is written exactly once
/// - Frame numbers start at 0 and increase by one; none exceeds 2^32 - 1
/// - `remaining_capacity` never goes below zero: a frame that would not fit is
///   rejected whole
/// - Nothing is written after a FINAL frame
pub struct ConnectionEncrypter<W: Write> {
    out: W,
    pending_tag: Option<[u8; TAG_LENGTH]>,
    cipher: AuthenticatedCipher,
    frame_number: u64,
    remaining: u64,
    max_frame_length: usize,
    bytes_written: u64,
    finished: bool,
    faulted: bool,
}

impl<W: Write> ConnectionEncrypter<W> {
    /// Key a new connection.
    ///
    /// `role` is the sending side; its tag and frame keys are derived from
    /// `secret`. `max_frame_length` is the transport's limit and is capped at
    /// [`crate::MAX_FRAME_LENGTH`].
    ///
    /// # Errors
    ///
    /// - `InvalidFrameLength`: the frame limit leaves no room for payload
    /// - `Crypto`: blank secret or stream number out of range
    pub fn new(
        out: W,
        capacity: u64,
        max_frame_length: usize,
        secret: &SecretKey,
        stream_number: u64,
        role: Role,
    ) -> Result<Self, TransportError> {
        let max_frame_length = effective_frame_length(max_frame_length);
        if max_frame_length <= FRAME_OVERHEAD {
            return Err(TransportError::InvalidFrameLength(max_frame_length));
        }

        let tag_key = derive_tag_key(secret, role)?;
        let mut tag = [0u8; TAG_LENGTH];
        encode_tag(&mut tag, &tag_key, stream_number)?;

        let frame_key = derive_frame_key(secret, stream_number, role)?;

        Ok(Self {
            out,
            pending_tag: Some(tag),
            cipher: AuthenticatedCipher::new(&frame_key),
            frame_number: 0,
            remaining: capacity,
            max_frame_length,
            bytes_written: 0,
            finished: false,
            faulted: false,
        })
    }

    /// Bytes the connection may still carry.
    pub fn remaining_capacity(&self) -> u64 {
        self.remaining
    }

    /// Largest payload a single frame can carry.
    pub fn max_payload_length(&self) -> usize {
        self.max_frame_length - FRAME_OVERHEAD
    }

    /// Largest payload that fits in the next frame while still leaving room
    /// for the empty FINAL frame that closes the connection.
    pub fn payload_budget(&self) -> usize {
        let tag = if self.pending_tag.is_some() { TAG_LENGTH as u64 } else { 0 };
        let reserved = tag + 2 * FRAME_OVERHEAD as u64;
        let available = self.remaining.saturating_sub(reserved);
        available.min(self.max_payload_length() as u64) as usize
    }

    /// Bytes emitted so far, tag included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Frames emitted so far.
    pub fn frames_written(&self) -> u64 {
        self.frame_number
    }

    /// True once a FINAL frame has been written or [`Self::finish`] ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Seal and write one frame.
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge`: payload exceeds [`Self::max_payload_length`]
    /// - `CapacityExceeded`: frame (and tag, if still pending) does not fit;
    ///   nothing is written
    /// - `AlreadyFinished`: a FINAL frame was already written
    /// - `FrameCounterExhausted`: no frame numbers left
    /// - `Io`: the sink failed; the encrypter is faulted from then on
    pub fn write_frame(&mut self, payload: &[u8], final_frame: bool) -> Result<(), TransportError> {
        if self.faulted {
            return Err(TransportError::Faulted);
        }
        if self.finished {
            return Err(TransportError::AlreadyFinished);
        }
        if payload.len() > self.max_payload_length() {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload_length(),
            });
        }
        if self.frame_number > MAX_FRAME_NUMBER {
            return Err(TransportError::FrameCounterExhausted);
        }

        let tag_cost = if self.pending_tag.is_some() { TAG_LENGTH } else { 0 };
        let needed = (tag_cost + FRAME_OVERHEAD + payload.len()) as u64;
        if needed > self.remaining {
            return Err(TransportError::CapacityExceeded { needed, remaining: self.remaining });
        }

        // Fits in u16: max_payload_length < MAX_FRAME_LENGTH
        let header = FrameHeader::new(payload.len() as u16, final_frame);
        let sealed_header = self.cipher.seal(
            &encode_frame_iv(self.frame_number, FrameIvKind::Header),
            &[],
            &header.encode(),
        )?;
        let sealed_payload = self.cipher.seal(
            &encode_frame_iv(self.frame_number, FrameIvKind::Payload),
            &[],
            payload,
        )?;

        let mut frame = Vec::with_capacity(needed as usize);
        if let Some(tag) = self.pending_tag {
            frame.extend_from_slice(&tag);
        }
        frame.extend_from_slice(&sealed_header);
        frame.extend_from_slice(&sealed_payload);

        if let Err(e) = self.out.write_all(&frame) {
            self.faulted = true;
            return Err(e.into());
        }

        debug!(
            frame_number = self.frame_number,
            payload_len = payload.len(),
            final_frame,
            "wrote frame"
        );

        self.pending_tag = None;
        self.remaining -= needed;
        self.bytes_written += needed;
        self.frame_number += 1;
        self.finished = final_frame;
        Ok(())
    }

    /// Close the connection and flush the sink.
    ///
    /// Writes an empty FINAL frame if any frame was written and none was final
    /// yet. A connection that never wrote a frame stays empty.
    pub fn finish(&mut self) -> Result<(), TransportError> {
        if self.faulted {
            return Err(TransportError::Faulted);
        }
        if !self.finished && self.pending_tag.is_none() {
            self.write_frame(&[], true)?;
        }
        self.finished = true;

        if let Err(e) = self.out.flush() {
            self.faulted = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Release the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_FRAME_LENGTH, TAG_LENGTH};

    fn secret() -> SecretKey {
        SecretKey::from_bytes([7u8; 32])
    }

    fn encrypter(capacity: u64) -> ConnectionEncrypter<Vec<u8>> {
        ConnectionEncrypter::new(Vec::new(), capacity, MAX_FRAME_LENGTH, &secret(), 0, Role::Alice)
            .unwrap()
    }

    #[test]
    fn first_frame_carries_tag() {
        let mut enc = encrypter(1_000_000);
        enc.write_frame(b"hello", false).unwrap();
        assert_eq!(enc.bytes_written(), (TAG_LENGTH + FRAME_OVERHEAD + 5) as u64);

        enc.write_frame(b"again", false).unwrap();
        assert_eq!(enc.bytes_written(), (TAG_LENGTH + 2 * (FRAME_OVERHEAD + 5)) as u64);
        assert_eq!(enc.into_inner().len(), TAG_LENGTH + 2 * (FRAME_OVERHEAD + 5));
    }

    #[test]
    fn capacity_is_charged() {
        let mut enc = encrypter(1_000);
        enc.write_frame(&[0u8; 100], false).unwrap();
        assert_eq!(enc.remaining_capacity(), 1_000 - (TAG_LENGTH + FRAME_OVERHEAD + 100) as u64);
    }

    #[test]
    fn oversized_frame_fails_closed() {
        let capacity = (TAG_LENGTH + FRAME_OVERHEAD + 10) as u64;
        let mut enc = encrypter(capacity);

        let result = enc.write_frame(&[0u8; 11], false);
        assert_eq!(
            result,
            Err(TransportError::CapacityExceeded { needed: capacity + 1, remaining: capacity })
        );
        assert_eq!(enc.bytes_written(), 0);

        enc.write_frame(&[0u8; 10], false).unwrap();
        assert_eq!(enc.remaining_capacity(), 0);
        assert_eq!(enc.into_inner().len() as u64, capacity);
    }

    #[test]
    fn payload_limit_enforced() {
        let mut enc = encrypter(1_000_000);
        let max = enc.max_payload_length();
        assert_eq!(max, MAX_FRAME_LENGTH - FRAME_OVERHEAD);

        assert_eq!(
            enc.write_frame(&vec![0u8; max + 1], false),
            Err(TransportError::PayloadTooLarge { len: max + 1, max })
        );
        enc.write_frame(&vec![0u8; max], false).unwrap();
    }

    #[test]
    fn transport_frame_limit_caps_payload() {
        let enc = ConnectionEncrypter::new(Vec::new(), 10_000, 100, &secret(), 0, Role::Bob).unwrap();
        assert_eq!(enc.max_payload_length(), 100 - FRAME_OVERHEAD);

        let too_small =
            ConnectionEncrypter::new(Vec::new(), 10_000, FRAME_OVERHEAD, &secret(), 0, Role::Bob);
        assert!(matches!(too_small, Err(TransportError::InvalidFrameLength(_))));
    }

    #[test]
    fn nothing_after_final() {
        let mut enc = encrypter(1_000_000);
        enc.write_frame(b"last", true).unwrap();
        assert!(enc.is_finished());
        assert_eq!(enc.write_frame(b"more", false), Err(TransportError::AlreadyFinished));
    }

    #[test]
    fn finish_closes_with_empty_final_frame() {
        let mut enc = encrypter(1_000_000);
        enc.write_frame(b"data", false).unwrap();
        let before = enc.bytes_written();

        enc.finish().unwrap();
        assert_eq!(enc.bytes_written(), before + FRAME_OVERHEAD as u64);
        assert_eq!(enc.frames_written(), 2);

        // Idempotent
        enc.finish().unwrap();
        assert_eq!(enc.frames_written(), 2);
    }

    #[test]
    fn finish_without_frames_writes_nothing() {
        let mut enc = encrypter(1_000_000);
        enc.finish().unwrap();
        assert_eq!(enc.bytes_written(), 0);
        assert!(enc.into_inner().is_empty());
    }

    #[test]
    fn payload_budget_reserves_final_frame() {
        let capacity = (TAG_LENGTH + 2 * FRAME_OVERHEAD + 50) as u64;
        let mut enc = encrypter(capacity);
        assert_eq!(enc.payload_budget(), 50);

        enc.write_frame(&[1u8; 50], false).unwrap();
        assert_eq!(enc.payload_budget(), 0);
        enc.finish().unwrap();
        assert_eq!(enc.remaining_capacity(), 0);
    }

    #[test]
    fn blank_secret_rejected() {
        let blank = SecretKey::from_bytes([0u8; 32]);
        let result = ConnectionEncrypter::new(Vec::new(), 1_000, MAX_FRAME_LENGTH, &blank, 0, Role::Alice);
        assert!(matches!(result, Err(TransportError::Crypto(_))));
    }

    #[test]
    fn sink_failure_faults() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut enc =
            ConnectionEncrypter::new(Broken, 1_000, MAX_FRAME_LENGTH, &secret(), 0, Role::Alice)
                .unwrap();
        assert_eq!(enc.write_frame(b"x", false), Err(TransportError::Io("gone".to_string())));
        assert_eq!(enc.write_frame(b"x", false), Err(TransportError::Faulted));
        assert_eq!(enc.finish(), Err(TransportError::Faulted));
    }
}
