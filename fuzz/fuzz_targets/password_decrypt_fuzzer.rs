//! Fuzz target for password-store decryption
//!
//! The iteration field is forced small so each run stays fast; zero is kept
//! reachable to exercise rejection.
//!
//! # Invariants
//!
//! - Decryption never panics, whatever the input
//! - Anything that opens re-seals to the same bytes under the same parameters

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_crypto::{decrypt_with_password, encrypt_with_password_params};

#[derive(Debug, Arbitrary)]
struct Scenario {
    blob: Vec<u8>,
    iterations: u8,
    password: String,
}

const ITERATIONS_OFFSET: usize = 16;

fuzz_target!(|scenario: Scenario| {
    let mut blob = scenario.blob;
    let iterations = u32::from(scenario.iterations % 8);
    if blob.len() >= ITERATIONS_OFFSET + 4 {
        blob[ITERATIONS_OFFSET..ITERATIONS_OFFSET + 4].copy_from_slice(&iterations.to_be_bytes());
    }

    let Some(plaintext) = decrypt_with_password(&blob, &scenario.password) else {
        return;
    };

    let salt = blob[..16].try_into().unwrap();
    let iv = blob[20..36].try_into().unwrap();
    let resealed =
        encrypt_with_password_params(&plaintext, &scenario.password, salt, iv, iterations).unwrap();
    assert_eq!(resealed, blob);
});
