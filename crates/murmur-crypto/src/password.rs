//! Password-based encryption for data at rest.
//!
//! Output layout:
//!
//! ```text
//! salt(16) || u32_be(iterations) || iv(16) || AES-256-GCM(plaintext) || mac(16)
//! ```
//!
//! The key is PBKDF2-HMAC-SHA-384 over the password. The iteration count is
//! stored next to the ciphertext, so a blob sealed on a fast machine still
//! opens on a slow one.

use std::time::Duration;

use aes_gcm::{
    AesGcm, KeyInit, Nonce,
    aead::{Aead, consts::U16},
    aes::Aes256,
};
use sha2::Sha384;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::{
    MAC_LENGTH, PBKDF_SALT_LENGTH, SECRET_KEY_LENGTH, STORAGE_IV_LENGTH, engine::CryptoConfig,
    error::CryptoError,
};

/// AES-256-GCM with a 128-bit nonce
type StorageCipher = AesGcm<Aes256, U16>;

const ITERATIONS_LENGTH: usize = 4;
const HEADER_LENGTH: usize = PBKDF_SALT_LENGTH + ITERATIONS_LENGTH + STORAGE_IV_LENGTH;

/// Largest iteration count accepted, for interoperability with signed 32-bit
/// readers.
pub const MAX_ITERATIONS: u32 = i32::MAX as u32;

/// Seal `plaintext` under `password` with caller-provided randomness.
///
/// # Errors
///
/// - `InvalidIterationCount`: zero or above [`MAX_ITERATIONS`]
pub fn encrypt_with_password_params(
    plaintext: &[u8],
    password: &str,
    salt: [u8; PBKDF_SALT_LENGTH],
    iv: [u8; STORAGE_IV_LENGTH],
    iterations: u32,
) -> Result<Vec<u8>, CryptoError> {
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(CryptoError::InvalidIterationCount(iterations));
    }

    let mut key = password_to_key(password, &salt, iterations);
    let cipher = StorageCipher::new((&key).into());
    key.zeroize();

    let sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(HEADER_LENGTH + sealed.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&iterations.to_be_bytes());
    output.extend_from_slice(&iv);
    output.extend_from_slice(&sealed);
    Ok(output)
}

/// Open a blob produced by password encryption.
///
/// Returns `None` for a wrong password, a corrupted or truncated blob, or an
/// out-of-range iteration count. Never panics on any input.
pub fn decrypt_with_password(input: &[u8], password: &str) -> Option<Vec<u8>> {
    if input.len() < HEADER_LENGTH + MAC_LENGTH {
        return None;
    }

    let (salt, rest) = input.split_at(PBKDF_SALT_LENGTH);
    let (iterations, rest) = rest.split_at(ITERATIONS_LENGTH);
    let (iv, sealed) = rest.split_at(STORAGE_IV_LENGTH);

    let iterations = u32::from_be_bytes([iterations[0], iterations[1], iterations[2], iterations[3]]);
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return None;
    }

    let mut key = password_to_key(password, salt, iterations);
    let cipher = StorageCipher::new((&key).into());
    key.zeroize();

    cipher.decrypt(Nonce::<U16>::from_slice(iv), sealed).ok()
}

fn password_to_key(password: &str, salt: &[u8], iterations: u32) -> [u8; SECRET_KEY_LENGTH] {
    let mut key = [0u8; SECRET_KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha384>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Run PBKDF2 over fixed inputs for `iterations` rounds. Used to time the KDF
/// during calibration.
pub(crate) fn calibration_kdf(iterations: u32) {
    let key = password_to_key("password", &[0u8; PBKDF_SALT_LENGTH], iterations);
    std::hint::black_box(key);
}

/// Pick a PBKDF2 iteration count that costs about `target_millis`.
///
/// `sampler(n)` must return the time taken by one `n`-iteration derivation.
/// Samples at 1 and 2 iterations are collected in rounds of
/// `config.pbkdf_samples`; the medians give a per-iteration cost and a fixed
/// setup cost. Rounds repeat until both estimates are positive, up to
/// `config.pbkdf_max_rounds`, after which `config.pbkdf_fallback_iterations` is
/// returned. The result is clamped to `[1, MAX_ITERATIONS]`.
pub fn choose_iteration_count_with(
    config: &CryptoConfig,
    target_millis: u64,
    mut sampler: impl FnMut(u32) -> Duration,
) -> u32 {
    let samples = config.pbkdf_samples.max(1);
    let mut quick: Vec<i128> = Vec::with_capacity(samples);
    let mut slow: Vec<i128> = Vec::with_capacity(samples);

    for round in 1..=config.pbkdf_max_rounds {
        for _ in 0..samples {
            quick.push(sampler(1).as_nanos() as i128);
            slow.push(sampler(2).as_nanos() as i128);
        }

        let quick_median = median(&mut quick);
        let slow_median = median(&mut slow);
        let iteration_nanos = slow_median - quick_median;
        let init_nanos = quick_median - iteration_nanos;

        debug!(round, iteration_nanos, init_nanos, "PBKDF2 calibration round");

        if iteration_nanos > 0 && init_nanos > 0 {
            let target_nanos = i128::from(target_millis) * 1_000_000;
            let iterations = ((target_nanos - init_nanos) / iteration_nanos)
                .clamp(1, i128::from(MAX_ITERATIONS)) as u32;

            info!(iterations, target_millis, "PBKDF2 iteration count chosen");
            return iterations;
        }
    }

    warn!(
        rounds = config.pbkdf_max_rounds,
        fallback = config.pbkdf_fallback_iterations,
        "PBKDF2 calibration did not converge, using fallback"
    );
    config.pbkdf_fallback_iterations.clamp(1, MAX_ITERATIONS)
}

/// Standard median: the middle element, or the mean of the two middle
/// elements for even lengths. Sorts `samples` in place.
fn median(samples: &mut [i128]) -> i128 {
    if samples.is_empty() {
        return 0;
    }
    samples.sort_unstable();
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 { (samples[mid - 1] + samples[mid]) / 2 } else { samples[mid] }
}
