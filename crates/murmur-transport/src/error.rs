//! Error types for transport connections.
//!
//! Anything raised while decrypting a frame is a connection-level fault: the
//! decrypter refuses further reads and the caller discards the connection.

use std::io;

use murmur_crypto::CryptoError;
use thiserror::Error;

/// Errors from building, writing or reading a transport connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Key derivation or cipher argument fault
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Underlying sink or source failed
    #[error("transport I/O error: {0}")]
    Io(String),

    /// Frame would not fit in the remaining connection capacity
    #[error("capacity exceeded: frame needs {needed} bytes, {remaining} remain")]
    CapacityExceeded {
        /// Bytes the frame would cost
        needed: u64,
        /// Bytes left in the connection
        remaining: u64,
    },

    /// Payload larger than one frame can carry
    #[error("payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Largest payload per frame
        max: usize,
    },

    /// Transport frame length too small to carry any payload
    #[error("frame length {0} is smaller than the frame overhead")]
    InvalidFrameLength(usize),

    /// Input ended before the FINAL frame
    #[error("connection truncated")]
    Truncated,

    /// Frame header or payload failed authentication
    #[error("frame authentication failed")]
    AuthenticationFailed,

    /// Authenticated header carries unknown flags or an impossible length
    #[error("malformed frame header")]
    MalformedHeader,

    /// Write attempted after the FINAL frame
    #[error("connection already finished")]
    AlreadyFinished,

    /// Frame numbers would exceed the unsigned 32-bit range
    #[error("frame counter exhausted")]
    FrameCounterExhausted,

    /// Connection faulted earlier and accepts no further operations
    #[error("connection faulted")]
    Faulted,
}

impl TransportError {
    /// Returns true if the peer (or an attacker) sent bytes that cannot be a
    /// valid connection.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::MalformedHeader | Self::Truncated)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_maps_to_truncation() {
        let err: TransportError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err, TransportError::Truncated);
        assert!(err.is_corruption());
    }

    #[test]
    fn other_io_errors_keep_message() {
        let err: TransportError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone").into();
        assert_eq!(err, TransportError::Io("pipe gone".to_string()));
        assert!(!err.is_corruption());
    }

    #[test]
    fn crypto_errors_convert() {
        let err: TransportError = CryptoError::BlankSecret.into();
        assert_eq!(err, TransportError::Crypto(CryptoError::BlankSecret));
    }
}
