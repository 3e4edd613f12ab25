//! Errors raised by the cryptographic primitives.
//!
//! Everything here except [`CryptoError::AuthenticationFailed`] is an argument
//! fault: the caller passed something that can never be valid, and retrying
//! with the same input will fail the same way.

use thiserror::Error;

/// Errors from key derivation, agreement and authenticated encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The all-zero secret is reserved as invalid
    #[error("secret is blank")]
    BlankSecret,

    /// Key material of the wrong size
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// KDF context, stream number or period above 2^32 - 1
    #[error("context value {0} exceeds the unsigned 32-bit range")]
    ContextOutOfRange(u64),

    /// KDF label is empty or not NUL-terminated
    #[error("KDF label must be NUL-terminated")]
    MalformedLabel,

    /// Concatenation KDF field too long for its one-byte length prefix
    #[error("KDF field {field} is {len} bytes (max 255)")]
    FieldTooLong {
        /// Which field overflowed
        field: &'static str,
        /// Its length
        len: usize,
    },

    /// Output buffer smaller than required
    #[error("buffer too short: need {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Public key bytes are not a valid encoded curve point
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// Signature bytes malformed or verification failed
    #[error("invalid signature")]
    InvalidSignature,

    /// PBKDF2 iteration count of zero or above `i32::MAX`
    #[error("iteration count {0} out of range")]
    InvalidIterationCount(u32),

    /// AEAD tag did not verify
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD refused to encrypt (input length beyond the cipher's limit)
    #[error("encryption failed")]
    EncryptionFailed,
}
