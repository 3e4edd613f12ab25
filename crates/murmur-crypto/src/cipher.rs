//! Frame cipher: AES-256-GCM with deterministic IVs.
//!
//! All functions are pure. IVs are never random: they are built from the frame
//! number and the part of the frame being sealed, and the key is bound to one
//! stream of one direction, so no key/IV pair is ever used twice.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{FRAME_IV_LENGTH, MAC_LENGTH, error::CryptoError, secret::SecretKey};

/// Which part of a frame an IV seals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIvKind {
    /// The fixed-size frame header
    Header = 0,
    /// The frame payload
    Payload = 1,
}

/// Build the 12-byte IV for one part of one frame.
///
/// Structure:
/// - bytes 0-7: frame number (big-endian)
/// - byte 8: [`FrameIvKind`]
/// - bytes 9-11: zero
pub fn encode_frame_iv(frame_number: u64, kind: FrameIvKind) -> [u8; FRAME_IV_LENGTH] {
    let mut iv = [0u8; FRAME_IV_LENGTH];
    iv[0..8].copy_from_slice(&frame_number.to_be_bytes());
    iv[8] = kind as u8;
    iv
}

/// AEAD keyed once with a frame key.
pub struct AuthenticatedCipher {
    cipher: Aes256Gcm,
}

impl AuthenticatedCipher {
    /// Key the cipher. The key schedule is zeroized on drop.
    pub fn new(key: &SecretKey) -> Self {
        Self { cipher: Aes256Gcm::new(key.as_bytes().into()) }
    }

    /// Encrypt `plaintext`, returning `ciphertext || MAC`.
    pub fn seal(
        &self,
        iv: &[u8; FRAME_IV_LENGTH],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Verify and decrypt `ciphertext || MAC`.
    ///
    /// # Errors
    ///
    /// - `BufferTooShort`: input shorter than the MAC
    /// - `AuthenticationFailed`: wrong key, IV, AAD or tampered input
    pub fn open(
        &self,
        iv: &[u8; FRAME_IV_LENGTH],
        aad: &[u8],
        sealed: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < MAC_LENGTH {
            return Err(CryptoError::BufferTooShort { expected: MAC_LENGTH, actual: sealed.len() });
        }

        self.cipher
            .decrypt(Nonce::from_slice(iv), Payload { msg: sealed, aad })
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for AuthenticatedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedCipher").field("key", &"[REDACTED]").finish()
    }
}
