//! Randomness-consuming entry points.
//!
//! Everything deterministic lives in free functions ([`crate::kdf`],
//! [`crate::tag`], [`crate::cipher`]). `CryptoEngine` wraps the operations
//! that need fresh randomness or wall-clock timing, and owns the shared
//! [`SecureRandom`] handle they draw from.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    CODE_BITS, PBKDF_SALT_LENGTH, SECRET_KEY_LENGTH, STORAGE_IV_LENGTH,
    agreement::{AgreementKeyPair, SignatureKeyPair},
    cipher::AuthenticatedCipher,
    error::CryptoError,
    password::{
        calibration_kdf, choose_iteration_count_with, decrypt_with_password,
        encrypt_with_password_params,
    },
    random::SecureRandom,
    secret::SecretKey,
};

/// Tunables for password-based encryption.
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    /// Wall-clock cost targeted by PBKDF2 calibration
    pub pbkdf_target_millis: u64,
    /// Samples per iteration count in each calibration round
    pub pbkdf_samples: usize,
    /// Calibration rounds before giving up
    pub pbkdf_max_rounds: usize,
    /// Iteration count used when calibration does not converge
    pub pbkdf_fallback_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf_target_millis: 500,
            pbkdf_samples: 30,
            pbkdf_max_rounds: 10,
            pbkdf_fallback_iterations: 100_000,
        }
    }
}

/// Key generation and password encryption over a shared random source.
///
/// Cheap to clone; clones share the same [`SecureRandom`].
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    random: Arc<SecureRandom>,
    config: CryptoConfig,
}

impl CryptoEngine {
    /// Create an engine drawing from `random`.
    pub fn new(random: Arc<SecureRandom>, config: CryptoConfig) -> Self {
        Self { random, config }
    }

    /// Shared random source.
    pub fn random(&self) -> &Arc<SecureRandom> {
        &self.random
    }

    /// Active configuration.
    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// Fresh random 256-bit secret.
    pub fn generate_secret_key(&self) -> SecretKey {
        let mut bytes = [0u8; SECRET_KEY_LENGTH];
        self.random.fill_bytes(&mut bytes);
        SecretKey::from_bytes(bytes)
    }

    /// Fresh P-384 agreement key pair.
    pub fn generate_agreement_key_pair(&self) -> AgreementKeyPair {
        AgreementKeyPair::generate(&mut self.random.rng())
    }

    /// Fresh P-384 signature key pair.
    pub fn generate_signature_key_pair(&self) -> SignatureKeyPair {
        SignatureKeyPair::generate(&mut self.random.rng())
    }

    /// Random invitation code of [`CODE_BITS`] bits.
    pub fn generate_invitation_code(&self) -> u32 {
        self.random.next_u32() & ((1 << CODE_BITS) - 1)
    }

    /// Frame cipher keyed with `key`.
    pub fn frame_cipher(&self, key: &SecretKey) -> AuthenticatedCipher {
        AuthenticatedCipher::new(key)
    }

    /// Seal `plaintext` under `password` with a calibrated iteration count.
    pub fn encrypt_with_password(
        &self,
        plaintext: &[u8],
        password: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let iterations = self.choose_iteration_count(self.config.pbkdf_target_millis);

        let mut salt = [0u8; PBKDF_SALT_LENGTH];
        let mut iv = [0u8; STORAGE_IV_LENGTH];
        self.random.fill_bytes(&mut salt);
        self.random.fill_bytes(&mut iv);

        encrypt_with_password_params(plaintext, password, salt, iv, iterations)
    }

    /// Open a password-sealed blob; `None` means wrong password or corrupt
    /// data.
    pub fn decrypt_with_password(&self, input: &[u8], password: &str) -> Option<Vec<u8>> {
        decrypt_with_password(input, password)
    }

    /// Calibrate PBKDF2 against this machine's clock.
    pub fn choose_iteration_count(&self, target_millis: u64) -> u32 {
        choose_iteration_count_with(&self.config, target_millis, time_kdf)
    }
}

#[allow(clippy::disallowed_methods)]
fn time_kdf(iterations: u32) -> Duration {
    let start = Instant::now();
    calibration_kdf(iterations);
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CryptoEngine {
        let config = CryptoConfig { pbkdf_target_millis: 5, ..CryptoConfig::default() };
        CryptoEngine::new(Arc::new(SecureRandom::from_platform()), config)
    }

    #[test]
    fn secret_keys_are_fresh() {
        let engine = engine();
        let a = engine.generate_secret_key();
        let b = engine.generate_secret_key();
        assert_ne!(a, b);
        assert!(!a.is_blank());
    }

    #[test]
    fn invitation_code_fits() {
        let engine = engine();
        for _ in 0..100 {
            assert!(engine.generate_invitation_code() < 1 << CODE_BITS);
        }
    }

    #[test]
    fn password_roundtrip_through_engine() {
        let engine = engine();
        let sealed = engine.encrypt_with_password(b"local database key", "correct horse").unwrap();

        assert_eq!(
            engine.decrypt_with_password(&sealed, "correct horse").unwrap(),
            b"local database key"
        );
        assert_eq!(engine.decrypt_with_password(&sealed, "battery staple"), None);
    }

    #[test]
    fn salts_differ_between_seals() {
        let engine = engine();
        let a = engine.encrypt_with_password(b"x", "pw").unwrap();
        let b = engine.encrypt_with_password(b"x", "pw").unwrap();
        assert_ne!(&a[..PBKDF_SALT_LENGTH], &b[..PBKDF_SALT_LENGTH]);
    }

    #[test]
    fn calibration_returns_positive_count() {
        let engine = engine();
        assert!(engine.choose_iteration_count(1) >= 1);
    }

    #[test]
    fn engine_keys_agree() {
        let engine = engine();
        let alice = engine.generate_agreement_key_pair();
        let bob = engine.generate_agreement_key_pair();

        let a = crate::derive_master_secret(bob.public_key_bytes(), &alice, true).unwrap();
        let b = crate::derive_master_secret(alice.public_key_bytes(), &bob, false).unwrap();
        assert_eq!(a, b);
    }
}
