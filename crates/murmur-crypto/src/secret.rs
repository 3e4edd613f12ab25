//! Fixed-length secret keys with guaranteed erasure.

use zeroize::Zeroize;

use crate::{SECRET_KEY_LENGTH, error::CryptoError};

/// A 256-bit secret: root secret, period secret, tag key or frame key.
///
/// Zeroized on drop, on every exit path, so owners never have to remember to
/// erase it. The all-zero value is representable (it is what an erased key
/// looks like) but every derivation rejects it.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; SECRET_KEY_LENGTH],
}

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Copy key bytes out of a slice, rejecting any other length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.bytes
    }

    /// True if every byte is zero.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().fold(0u8, |acc, b| acc | b) == 0
    }

    /// Overwrite the key with zeros now instead of waiting for drop.
    pub fn erase(&mut self) {
        self.bytes.zeroize();
    }

    /// Reject the blank secret.
    pub(crate) fn check_usable(&self) -> Result<(), CryptoError> {
        if self.is_blank() { Err(CryptoError::BlankSecret) } else { Ok(()) }
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.iter().zip(other.bytes.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
    }
}

impl Eq for SecretKey {}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").field("bytes", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_detection() {
        assert!(SecretKey::from_bytes([0u8; SECRET_KEY_LENGTH]).is_blank());

        let mut bytes = [0u8; SECRET_KEY_LENGTH];
        bytes[31] = 1;
        assert!(!SecretKey::from_bytes(bytes).is_blank());
    }

    #[test]
    fn erase_blanks_the_key() {
        let mut key = SecretKey::from_bytes([7u8; SECRET_KEY_LENGTH]);
        key.erase();
        assert!(key.is_blank());
        assert_eq!(key.check_usable(), Err(CryptoError::BlankSecret));
    }

    #[test]
    fn try_from_slice_rejects_wrong_length() {
        assert_eq!(
            SecretKey::try_from_slice(&[1u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        );
        assert!(SecretKey::try_from_slice(&[1u8; 32]).is_ok());
    }

    #[test]
    fn debug_is_redacted() {
        let key = SecretKey::from_bytes([0xAB; SECRET_KEY_LENGTH]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn clones_do_not_alias() {
        let key = SecretKey::from_bytes([9u8; SECRET_KEY_LENGTH]);
        let mut copy = key.clone();
        copy.erase();
        assert!(!key.is_blank());
    }
}
