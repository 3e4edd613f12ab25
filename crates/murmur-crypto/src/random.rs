//! Process-wide secure random source.
//!
//! `SecureRandom` combines two independent sources: the OS generator
//! (getrandom) and a ChaCha20 stream seeded from a [`SeedProvider`]. Output is
//! the XOR of both, so it stays unpredictable as long as either source is.
//!
//! There is no global instance. One `SecureRandom` is built at startup and
//! shared as `Arc<SecureRandom>`; the inner generator is serialized by a mutex,
//! so handles can be used from any worker thread.

#![allow(clippy::disallowed_types, reason = "Generator state is locked for single fills only")]

use std::sync::Mutex;

use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::Zeroize;

/// Supplies the 32-byte seed for the internal ChaCha20 stream.
pub trait SeedProvider {
    /// Produce a fresh seed.
    fn seed(&self) -> [u8; 32];
}

/// Seeds from the OS generator.
///
/// # Panics
///
/// Panics if the OS RNG fails. Without platform entropy there is nothing
/// secure to fall back to.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformSeedProvider;

impl SeedProvider for PlatformSeedProvider {
    #[allow(clippy::expect_used)]
    fn seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        getrandom::fill(&mut seed).expect("invariant: OS RNG failure is unrecoverable");
        seed
    }
}

/// Thread-safe mixing generator. Share it as `Arc<SecureRandom>`.
pub struct SecureRandom {
    stream: Mutex<ChaCha20Rng>,
}

impl SecureRandom {
    /// Build a generator whose internal stream is seeded by `provider`.
    pub fn new(provider: &impl SeedProvider) -> Self {
        let mut seed = provider.seed();
        let stream = ChaCha20Rng::from_seed(seed);
        seed.zeroize();
        Self { stream: Mutex::new(stream) }
    }

    /// Build a generator seeded from the OS.
    pub fn from_platform() -> Self {
        Self::new(&PlatformSeedProvider)
    }

    /// Fill `buffer` with secure random bytes.
    ///
    /// # Panics
    ///
    /// Panics if the OS RNG fails or the internal mutex is poisoned. Both mean
    /// the process can no longer produce keys safely.
    #[allow(clippy::expect_used)]
    pub fn fill_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");

        let mut mix = vec![0u8; buffer.len()];
        self.stream.lock().expect("Mutex poisoned").fill_bytes(&mut mix);
        for (out, m) in buffer.iter_mut().zip(mix.iter()) {
            *out ^= m;
        }
        mix.zeroize();
    }

    /// Random 32-bit integer.
    pub fn next_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.fill_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// Borrow as an `RngCore + CryptoRng` for APIs that take a generator.
    pub fn rng(&self) -> SecureRng<'_> {
        SecureRng(self)
    }
}

impl std::fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureRandom").finish_non_exhaustive()
    }
}

/// `RngCore` adapter over a shared [`SecureRandom`].
#[derive(Debug, Clone, Copy)]
pub struct SecureRng<'a>(&'a SecureRandom);

impl RngCore for SecureRng<'_> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.0.fill_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for SecureRng<'_> {}
