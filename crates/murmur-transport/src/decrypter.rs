//! Decrypt side of a connection.
//!
//! The tag is read separately with [`read_tag`] so the caller can recognise
//! the sender before any keys exist. After that, frames are opened in order
//! with IVs derived from their position. Any authentication failure,
//! malformed header or early end of input faults the decrypter for good.

use std::io::Read;

use murmur_crypto::{
    AuthenticatedCipher, CryptoError, FrameIvKind, MAC_LENGTH, Role, SecretKey, TAG_LENGTH,
    derive_frame_key, encode_frame_iv,
};
use tracing::{debug, warn};

use crate::{
    FRAME_HEADER_LENGTH, FRAME_OVERHEAD, MAX_FRAME_NUMBER, effective_frame_length,
    error::TransportError, header::FrameHeader,
};

/// Read the connection tag from the start of `input`.
///
/// # Errors
///
/// - `Truncated`: input ended inside the tag
/// - `Io`: the source failed
pub fn read_tag<R: Read + ?Sized>(input: &mut R) -> Result<[u8; TAG_LENGTH], TransportError> {
    let mut tag = [0u8; TAG_LENGTH];
    input.read_exact(&mut tag)?;
    Ok(tag)
}

/// Frame reader bound to one stream of one direction.
pub struct ConnectionDecrypter<R: Read> {
    input: R,
    cipher: AuthenticatedCipher,
    frame_number: u64,
    max_frame_length: usize,
    finished: bool,
    faulted: bool,
}

impl<R: Read> ConnectionDecrypter<R> {
    /// Key a decrypter for frames sealed by `role`.
    ///
    /// `input` must be positioned just after the tag.
    pub fn new(
        input: R,
        max_frame_length: usize,
        secret: &SecretKey,
        stream_number: u64,
        role: Role,
    ) -> Result<Self, TransportError> {
        let max_frame_length = effective_frame_length(max_frame_length);
        if max_frame_length <= FRAME_OVERHEAD {
            return Err(TransportError::InvalidFrameLength(max_frame_length));
        }

        let frame_key = derive_frame_key(secret, stream_number, role)?;

        Ok(Self {
            input,
            cipher: AuthenticatedCipher::new(&frame_key),
            frame_number: 0,
            max_frame_length,
            finished: false,
            faulted: false,
        })
    }

    /// Frames opened so far.
    pub fn frames_read(&self) -> u64 {
        self.frame_number
    }

    /// True once the FINAL frame has been read.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read and open the next frame.
    ///
    /// Returns `Ok(None)` once the FINAL frame has been consumed. A FINAL frame
    /// with a payload yields that payload first.
    ///
    /// # Errors
    ///
    /// - `Truncated`: input ended before the FINAL frame
    /// - `AuthenticationFailed`: header or payload did not verify
    /// - `MalformedHeader`: verified header with unknown flags or a length
    ///   beyond the frame limit
    /// - `Faulted`: an earlier call failed
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.faulted {
            return Err(TransportError::Faulted);
        }
        if self.finished {
            return Ok(None);
        }

        match self.open_next() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                warn!(frame_number = self.frame_number, error = %e, "connection faulted");
                self.faulted = true;
                Err(e)
            },
        }
    }

    fn open_next(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.frame_number > MAX_FRAME_NUMBER {
            return Err(TransportError::FrameCounterExhausted);
        }

        let mut sealed_header = [0u8; FRAME_HEADER_LENGTH + MAC_LENGTH];
        self.input.read_exact(&mut sealed_header)?;
        let header_bytes = self
            .cipher
            .open(&encode_frame_iv(self.frame_number, FrameIvKind::Header), &[], &sealed_header)
            .map_err(authentication)?;
        let header = FrameHeader::decode(&header_bytes)?;

        let payload_length = usize::from(header.payload_length);
        if payload_length > self.max_frame_length - FRAME_OVERHEAD {
            return Err(TransportError::MalformedHeader);
        }

        let mut sealed_payload = vec![0u8; payload_length + MAC_LENGTH];
        self.input.read_exact(&mut sealed_payload)?;
        let payload = self
            .cipher
            .open(&encode_frame_iv(self.frame_number, FrameIvKind::Payload), &[], &sealed_payload)
            .map_err(authentication)?;

        debug!(
            frame_number = self.frame_number,
            payload_len = payload_length,
            final_frame = header.is_final(),
            "read frame"
        );

        self.frame_number += 1;
        if header.is_final() {
            self.finished = true;
            if payload.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(payload))
    }
}

fn authentication(err: CryptoError) -> TransportError {
    match err {
        CryptoError::AuthenticationFailed | CryptoError::BufferTooShort { .. } => {
            TransportError::AuthenticationFailed
        },
        other => TransportError::Crypto(other),
    }
}
